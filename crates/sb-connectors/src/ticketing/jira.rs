//! Jira ticketing connector.
//!
//! Scoped by the `project_keys` axis. Supports Jira Cloud (API v3, ADF
//! descriptions) and Server (API v2, plain text).

use std::sync::Arc;

use async_trait::async_trait;
use sb_core::crypto::CryptoError;
use sb_core::retry::{Backoff, RetryPolicy};
use sb_core::tool::{
    ExtraFields, FieldKind, FieldSpec, InputSchema, TabularResult, Tool, ToolInput,
};
use sb_core::{
    CacheHandle, ConnectorDescriptor, ConnectorError, ConnectorResult, QueryTargetOptions,
    ScopeTargetDefinition, ScopeTargetSelector, SecretContext, Target,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::jql;
use crate::http::{AuthConfig, HttpClient, HttpSettings, RateLimitConfig};

pub const JIRA_ID: &str = "jira";
pub const PROJECT_KEYS: &str = "project_keys";

const DEFAULT_MAX_RESULTS: u32 = 50;
const PROJECT_PAGE_SIZE: u32 = 50;

/// Jira-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    #[serde(flatten)]
    pub http: HttpSettings,
    /// Account email for basic authentication.
    pub email: String,
    pub api_token_encrypted: Option<String>,
    /// Whether this is Jira Server (vs Cloud). Affects API behavior.
    pub is_server: bool,
    pub max_results: u32,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            email: String::new(),
            api_token_encrypted: None,
            is_server: false,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl JiraConfig {
    fn api_path(&self, path: &str) -> String {
        if self.is_server {
            format!("/rest/api/2{}", path)
        } else {
            format!("/rest/api/3{}", path)
        }
    }
}

#[derive(Debug, Clone)]
pub struct JiraSecrets {
    auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraTarget {
    pub project_keys: Vec<String>,
}

impl Target for JiraTarget {}

#[derive(Debug, Deserialize)]
struct SearchIssuesInput {
    #[serde(default)]
    query: String,
    status: Option<String>,
    max_results: Option<u32>,
}

impl ToolInput for SearchIssuesInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![
                FieldSpec::optional("query", FieldKind::String)
                    .describe("Free text matched against summary and description"),
                FieldSpec::optional("status", FieldKind::String),
                FieldSpec::optional("max_results", FieldKind::UnsignedInteger),
            ],
        )
    }
}

#[derive(Debug, Deserialize)]
struct IssueKeyInput {
    issue_key: String,
}

impl ToolInput for IssueKeyInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![FieldSpec::required("issue_key", FieldKind::String)
                .describe("For example SEC-42")],
        )
    }
}

#[derive(Debug, Deserialize)]
struct AddCommentInput {
    issue_key: String,
    body: String,
}

impl ToolInput for AddCommentInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![
                FieldSpec::required("issue_key", FieldKind::String),
                FieldSpec::required("body", FieldKind::String),
            ],
        )
    }
}

/// Calls against one Jira site, restricted to the selected projects.
struct JiraApi {
    config: JiraConfig,
    client: HttpClient,
    projects: Vec<String>,
}

impl JiraApi {
    fn ensure_in_scope(&self, issue_key: &str) -> ConnectorResult<()> {
        match jql::project_of(issue_key) {
            Some(project) if self.projects.iter().any(|p| p == project) => Ok(()),
            Some(_) => Err(ConnectorError::InvalidRequest(format!(
                "issue {} is outside the selected projects",
                issue_key
            ))),
            None => Err(ConnectorError::InvalidRequest(format!(
                "'{}' is not an issue key",
                issue_key
            ))),
        }
    }

    fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.client.base_url(), key)
    }

    #[instrument(skip(self, input))]
    async fn search_issues(&self, input: SearchIssuesInput) -> ConnectorResult<TabularResult> {
        let jql = jql::build_search(&self.projects, &input.query, input.status.as_deref())?;
        let request = JiraSearchRequest {
            jql,
            max_results: input
                .max_results
                .unwrap_or(self.config.max_results)
                .clamp(1, 100),
            fields: ["summary", "status", "priority", "assignee", "updated"]
                .into_iter()
                .map(String::from)
                .collect(),
        };

        debug!(jql = %request.jql, "Executing JQL search");
        let response: JiraSearchResponse = self
            .client
            .post_json(&self.config.api_path("/search"), &request)
            .await?;

        let mut table =
            TabularResult::new(["key", "summary", "status", "priority", "assignee", "updated"]);
        for issue in response.issues {
            let fields = issue.fields;
            table.push_row(vec![
                json!(issue.key),
                json!(fields.summary),
                json!(fields.status.map(|s| s.name)),
                json!(fields.priority.map(|p| p.name)),
                json!(fields.assignee.map(|a| a.display_name)),
                json!(fields.updated),
            ]);
        }
        Ok(table)
    }

    #[instrument(skip(self))]
    async fn get_issue(&self, issue_key: &str) -> ConnectorResult<Value> {
        self.ensure_in_scope(issue_key)?;
        let issue: JiraIssue = self
            .client
            .get_json(&self.config.api_path(&format!("/issue/{}", issue_key)))
            .await?;

        let fields = issue.fields;
        Ok(json!({
            "key": issue.key,
            "summary": fields.summary,
            "description": fields
                .description
                .as_ref()
                .map(extract_description_text)
                .unwrap_or_default(),
            "status": fields.status.map(|s| s.name),
            "priority": fields.priority.map(|p| p.name),
            "assignee": fields.assignee.map(|a| a.display_name),
            "reporter": fields.reporter.map(|r| r.display_name),
            "labels": fields.labels,
            "created": fields.created,
            "updated": fields.updated,
            "url": self.browse_url(&issue.key),
        }))
    }

    #[instrument(skip(self, body))]
    async fn add_comment(&self, issue_key: &str, body: &str) -> ConnectorResult<Value> {
        self.ensure_in_scope(issue_key)?;
        if body.trim().is_empty() {
            return Err(ConnectorError::InvalidRequest(
                "comment body must not be empty".to_string(),
            ));
        }

        let payload = if self.config.is_server {
            json!({ "body": body })
        } else {
            json!({ "body": JiraDescription::text(body) })
        };
        let created: JiraCommentResponse = self
            .client
            .post_json(
                &self.config.api_path(&format!("/issue/{}/comment", issue_key)),
                &payload,
            )
            .await?;

        info!(issue_key = %issue_key, comment_id = %created.id, "Added Jira comment");
        Ok(json!({
            "issue_key": issue_key,
            "comment_id": created.id,
            "url": self.browse_url(issue_key),
        }))
    }
}

/// Extracts text from ADF (Atlassian Document Format) or plain text.
fn extract_description_text(desc: &Value) -> String {
    if let Some(text) = desc.as_str() {
        return text.to_string();
    }

    let Some(content) = desc.get("content").and_then(|c| c.as_array()) else {
        return String::new();
    };
    content
        .iter()
        .filter_map(|block| block.get("content").and_then(|c| c.as_array()))
        .map(|inner| {
            inner
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The Jira connector descriptor.
#[derive(Debug, Clone, Default)]
pub struct JiraDescriptor;

impl JiraDescriptor {
    pub fn new() -> Self {
        Self
    }

    fn client(config: &JiraConfig, secrets: &JiraSecrets) -> ConnectorResult<HttpClient> {
        Ok(HttpClient::new(&config.http, secrets.auth.clone())?
            .with_rate_limit(RateLimitConfig {
                max_requests: 100,
                period: std::time::Duration::from_secs(60),
                burst_size: 20,
            })?
            .with_retry_policy(RetryPolicy::on_statuses(
                3,
                Backoff::default(),
                &[429, 503],
            )))
    }

    async fn list_projects(
        &self,
        config: &JiraConfig,
        client: &HttpClient,
    ) -> ConnectorResult<Vec<String>> {
        if config.is_server {
            let projects: Vec<JiraProject> = client.get_json(&config.api_path("/project")).await?;
            return Ok(projects.into_iter().map(|p| p.key).collect());
        }

        let mut keys = Vec::new();
        let mut start_at = 0u32;
        loop {
            let page: JiraProjectPage = client
                .get_json_with_query(
                    &config.api_path("/project/search"),
                    &[("startAt", start_at), ("maxResults", PROJECT_PAGE_SIZE)],
                )
                .await?;
            let fetched = page.values.len() as u32;
            keys.extend(page.values.into_iter().map(|p| p.key));
            if page.is_last || fetched == 0 {
                break;
            }
            start_at += fetched;
        }
        Ok(keys)
    }
}

#[async_trait]
impl ConnectorDescriptor for JiraDescriptor {
    type Config = JiraConfig;
    type Secrets = JiraSecrets;
    type Target = JiraTarget;

    fn id(&self) -> &str {
        JIRA_ID
    }

    fn display_name(&self) -> &str {
        "Jira"
    }

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition> {
        vec![ScopeTargetDefinition::multi(PROJECT_KEYS)]
    }

    /// An override token is sent as a bearer token. Otherwise the stored API
    /// token is used with the account email for basic authentication.
    async fn resolve_secrets(
        &self,
        config: &JiraConfig,
        context: &SecretContext,
    ) -> Result<Option<JiraSecrets>, CryptoError> {
        if let Some(token) = context.override_token() {
            return Ok(Some(JiraSecrets {
                auth: AuthConfig::bearer(token.clone()),
            }));
        }
        if config.email.trim().is_empty() {
            return Ok(None);
        }
        let password = context
            .resolve_credential(config.api_token_encrypted.as_deref())
            .await?;
        Ok(password.map(|password| JiraSecrets {
            auth: AuthConfig::Basic {
                username: config.email.clone(),
                password,
            },
        }))
    }

    async fn check_connection(&self, config: &JiraConfig, secrets: &JiraSecrets) -> bool {
        let client = match Self::client(config, secrets) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Jira client could not be built");
                return false;
            }
        };
        match client.get_json::<Value>(&config.api_path("/myself")).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Jira connectivity check failed");
                false
            }
        }
    }

    async fn get_query_target_options(
        &self,
        config: &JiraConfig,
        secrets: &JiraSecrets,
    ) -> ConnectorResult<QueryTargetOptions> {
        let client = Self::client(config, secrets)?;
        let keys = self.list_projects(config, &client).await?;
        Ok(QueryTargetOptions::new(
            self.target_definitions(),
            vec![ScopeTargetSelector::new(PROJECT_KEYS, keys)],
        ))
    }

    fn build_tools(
        &self,
        config: &JiraConfig,
        target: JiraTarget,
        secrets: &JiraSecrets,
        _cache: Option<CacheHandle>,
    ) -> ConnectorResult<Vec<Tool>> {
        let api = Arc::new(JiraApi {
            config: config.clone(),
            client: Self::client(config, secrets)?,
            projects: target.project_keys,
        });

        let search_api = Arc::clone(&api);
        let search = Tool::new(
            JIRA_ID,
            "search_issues",
            "Searches issues in the selected Jira projects",
            move |input: SearchIssuesInput| {
                let api = Arc::clone(&search_api);
                async move { api.search_issues(input).await }
            },
        )?;

        let get_api = Arc::clone(&api);
        let get_issue = Tool::new(
            JIRA_ID,
            "get_issue",
            "Fetches one issue from the selected Jira projects",
            move |input: IssueKeyInput| {
                let api = Arc::clone(&get_api);
                async move { api.get_issue(&input.issue_key).await }
            },
        )?;

        let comment_api = api;
        let add_comment = Tool::new(
            JIRA_ID,
            "add_comment",
            "Adds a comment to an issue in the selected Jira projects",
            move |input: AddCommentInput| {
                let api = Arc::clone(&comment_api);
                async move { api.add_comment(&input.issue_key, &input.body).await }
            },
        )?;

        Ok(vec![search, get_issue, add_comment])
    }
}

// Jira API types

#[derive(Debug, Serialize)]
struct JiraSearchRequest {
    jql: String,
    #[serde(rename = "maxResults")]
    max_results: u32,
    fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JiraSearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: JiraFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JiraFields {
    summary: Option<String>,
    description: Option<Value>,
    status: Option<JiraNamed>,
    priority: Option<JiraNamed>,
    assignee: Option<JiraUser>,
    reporter: Option<JiraUser>,
    labels: Vec<String>,
    created: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JiraNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JiraUser {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct JiraCommentResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JiraProject {
    key: String,
}

#[derive(Debug, Deserialize)]
struct JiraProjectPage {
    #[serde(default)]
    values: Vec<JiraProject>,
    #[serde(rename = "isLast", default = "default_true")]
    is_last: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct JiraDescription {
    #[serde(rename = "type")]
    doc_type: &'static str,
    version: u32,
    content: Vec<JiraParagraph>,
}

impl JiraDescription {
    /// One ADF paragraph per blank-line separated block.
    fn text(text: &str) -> Self {
        let mut paragraphs: Vec<&str> = text.split("\n\n").filter(|p| !p.is_empty()).collect();
        if paragraphs.is_empty() {
            paragraphs.push(text);
        }
        Self {
            doc_type: "doc",
            version: 1,
            content: paragraphs
                .into_iter()
                .map(|paragraph| JiraParagraph {
                    content_type: "paragraph",
                    content: vec![JiraText {
                        text_type: "text",
                        text: paragraph.to_string(),
                    }],
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct JiraParagraph {
    #[serde(rename = "type")]
    content_type: &'static str,
    content: Vec<JiraText>,
}

#[derive(Debug, Serialize)]
struct JiraText {
    #[serde(rename = "type")]
    text_type: &'static str,
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::testing::test_key;
    use sb_core::{PlaintextDecryptor, SecureString, ToolError};

    fn config() -> JiraConfig {
        JiraConfig {
            http: HttpSettings::with_base_url("https://example.atlassian.net"),
            email: "soc@example.com".to_string(),
            api_token_encrypted: Some("jira-token".to_string()),
            ..JiraConfig::default()
        }
    }

    fn context() -> SecretContext {
        SecretContext::new("tenant-1", test_key(), Arc::new(PlaintextDecryptor))
    }

    fn secrets() -> JiraSecrets {
        JiraSecrets {
            auth: AuthConfig::None,
        }
    }

    fn tools(projects: &[&str]) -> Vec<Tool> {
        let target = JiraTarget {
            project_keys: projects.iter().map(|p| p.to_string()).collect(),
        };
        JiraDescriptor::new()
            .build_tools(&config(), target, &secrets(), None)
            .unwrap()
    }

    fn tool<'a>(tools: &'a [Tool], name: &str) -> &'a Tool {
        tools.iter().find(|t| t.name() == name).unwrap()
    }

    #[test]
    fn test_config_from_settings() {
        let config: JiraConfig = serde_json::from_value(json!({
            "base_url": "https://jira.internal",
            "email": "soc@example.com",
            "is_server": true
        }))
        .unwrap();
        assert_eq!(config.http.base_url, "https://jira.internal");
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.max_results, DEFAULT_MAX_RESULTS);
        assert_eq!(config.api_path("/issue"), "/rest/api/2/issue");
        assert_eq!(JiraConfig::default().api_path("/issue"), "/rest/api/3/issue");
    }

    #[tokio::test]
    async fn test_resolve_secrets_basic_auth() {
        let secrets = JiraDescriptor::new()
            .resolve_secrets(&config(), &context())
            .await
            .unwrap()
            .unwrap();
        match secrets.auth {
            AuthConfig::Basic { username, password } => {
                assert_eq!(username, "soc@example.com");
                assert_eq!(password.expose_secret(), "jira-token");
            }
            other => panic!("unexpected auth: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_secrets_override_uses_bearer() {
        let context = context().with_override_token(SecureString::from("oauth-token"));
        let secrets = JiraDescriptor::new()
            .resolve_secrets(&JiraConfig::default(), &context)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(secrets.auth, AuthConfig::Token { ref scheme, .. } if scheme == "Bearer"));
    }

    #[tokio::test]
    async fn test_resolve_secrets_not_configured() {
        let mut config = config();
        config.api_token_encrypted = None;
        let secrets = JiraDescriptor::new()
            .resolve_secrets(&config, &context())
            .await
            .unwrap();
        assert!(secrets.is_none());

        let secrets = JiraDescriptor::new()
            .resolve_secrets(&JiraConfig::default(), &context())
            .await
            .unwrap();
        assert!(secrets.is_none());
    }

    #[test]
    fn test_build_tools() {
        let tools = tools(&["SEC"]);
        let names: Vec<_> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["search_issues", "get_issue", "add_comment"]);
        assert!(tools.iter().all(|t| t.connector_id() == JIRA_ID));

        let definition = tool(&tools, "add_comment").definition();
        assert_eq!(
            definition["parameters"]["required"],
            json!(["issue_key", "body"])
        );
    }

    #[tokio::test]
    async fn test_get_issue_outside_selection() {
        let tools = tools(&["SEC"]);
        let err = tool(&tools, "get_issue")
            .execute_json(json!({"issue_key": "HR-1"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::Execution(ConnectorError::InvalidRequest(msg)) if msg.contains("outside")
        ));
    }

    #[tokio::test]
    async fn test_search_without_projects() {
        let tools = tools(&[]);
        let err = tool(&tools, "search_issues")
            .execute_json(json!({"query": "phishing"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(ConnectorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_search_rejects_extra_fields() {
        let tools = tools(&["SEC"]);
        let err = tool(&tools, "search_issues")
            .execute_json(json!({"query": "phishing", "jql": "project = HR"}))
            .await
            .unwrap_err();
        assert_eq!(err.issues().len(), 1);
        assert_eq!(err.issues()[0].field, "jql");
    }

    #[tokio::test]
    async fn test_search_rejects_negative_max_results() {
        let tools = tools(&["SEC"]);
        for max_results in [json!(-1), json!(5_000_000_000u64)] {
            let err = tool(&tools, "search_issues")
                .execute_json(json!({"query": "x", "max_results": max_results}))
                .await
                .unwrap_err();
            assert_eq!(err.issues().len(), 1);
            assert_eq!(err.issues()[0].field, "max_results");
        }
    }

    #[test]
    fn test_description_formatting() {
        let text = "First paragraph\n\nSecond paragraph";
        let desc = serde_json::to_value(JiraDescription::text(text)).unwrap();
        assert_eq!(desc["type"], "doc");
        assert_eq!(desc["content"].as_array().unwrap().len(), 2);
        assert_eq!(desc["content"][1]["content"][0]["text"], "Second paragraph");
        assert_eq!(extract_description_text(&desc), "First paragraph\nSecond paragraph");
        assert_eq!(extract_description_text(&json!("plain")), "plain");
    }
}
