//! Slack messaging connector.
//!
//! Scoped by the `channels` axis: messages can only be posted to, and history
//! only read from, the selected channel IDs. Uses the Web API with a bot token.

use std::sync::Arc;

use async_trait::async_trait;
use sb_core::crypto::CryptoError;
use sb_core::tool::{
    ExtraFields, FieldKind, FieldSpec, InputSchema, TabularResult, Tool, ToolInput,
};
use sb_core::{
    CacheHandle, ConnectorDescriptor, ConnectorError, ConnectorResult, QueryTargetOptions,
    ScopeTargetDefinition, ScopeTargetSelector, SecretContext, Target,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::http::{AuthConfig, HttpClient, HttpSettings, RateLimitConfig};

pub const SLACK_ID: &str = "slack";
pub const CHANNELS: &str = "channels";

pub const DEFAULT_BASE_URL: &str = "https://slack.com/api";

/// Slack truncates messages longer than this.
const MAX_MESSAGE_LENGTH: usize = 40_000;
const DEFAULT_HISTORY_LIMIT: u32 = 50;
const CHANNEL_PAGE_SIZE: u32 = 200;

/// Slack-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    #[serde(flatten)]
    pub http: HttpSettings,
    /// Bot user OAuth token (`xoxb-...`).
    pub bot_token_encrypted: Option<String>,
    /// Include private channels the bot is a member of in the options.
    pub include_private: bool,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            http: HttpSettings::with_base_url(DEFAULT_BASE_URL),
            bot_token_encrypted: None,
            include_private: false,
        }
    }
}

impl SlackConfig {
    /// Transport settings with the public API URL filled in when unset.
    fn http_settings(&self) -> HttpSettings {
        let mut http = self.http.clone();
        if http.base_url.trim().is_empty() {
            http.base_url = DEFAULT_BASE_URL.to_string();
        }
        http
    }
}

#[derive(Debug, Clone)]
pub struct SlackSecrets {
    auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackTarget {
    pub channels: Vec<String>,
}

impl Target for SlackTarget {}

#[derive(Debug, Deserialize)]
struct SendMessageInput {
    channel: String,
    text: String,
    thread_ts: Option<String>,
}

impl ToolInput for SendMessageInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![
                FieldSpec::required("channel", FieldKind::String)
                    .describe("Channel ID, e.g. C0123456789"),
                FieldSpec::required("text", FieldKind::String),
                FieldSpec::optional("thread_ts", FieldKind::String)
                    .describe("Timestamp of the parent message to reply in a thread"),
            ],
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChannelHistoryInput {
    channel: String,
    limit: Option<u32>,
    oldest: Option<String>,
}

impl ToolInput for ChannelHistoryInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Ignore,
            vec![
                FieldSpec::required("channel", FieldKind::String),
                FieldSpec::optional("limit", FieldKind::UnsignedInteger),
                FieldSpec::optional("oldest", FieldKind::String)
                    .describe("Only messages after this Slack timestamp"),
            ],
        )
    }
}

/// Unwraps Slack's `{"ok": ..., "error": ...}` envelope.
///
/// Slack reports most failures with HTTP 200 and `ok: false`, so the error
/// code has to be mapped here rather than from the status.
fn unwrap_envelope<T: DeserializeOwned>(body: Value) -> ConnectorResult<T> {
    let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        let code = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        return Err(error_for_code(code));
    }
    serde_json::from_value(body).map_err(|e| ConnectorError::InvalidResponse(e.to_string()))
}

fn error_for_code(code: &str) -> ConnectorError {
    match code {
        "ratelimited" | "rate_limited" => ConnectorError::RateLimited(0),
        "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" | "token_expired" => {
            ConnectorError::AuthenticationFailed(code.to_string())
        }
        "missing_scope" | "not_in_channel" | "restricted_action" => {
            ConnectorError::AuthorizationDenied(code.to_string())
        }
        "channel_not_found" | "thread_not_found" => ConnectorError::NotFound(code.to_string()),
        "invalid_arguments" | "msg_too_long" | "no_text" | "invalid_ts_oldest" => {
            ConnectorError::InvalidRequest(code.to_string())
        }
        other => ConnectorError::RequestFailed(format!("Slack API error: {}", other)),
    }
}

/// Calls against one Slack workspace, restricted to the selected channels.
struct SlackApi {
    client: HttpClient,
    channels: Vec<String>,
}

impl SlackApi {
    fn ensure_in_scope(&self, channel: &str) -> ConnectorResult<()> {
        if self.channels.iter().any(|c| c == channel) {
            Ok(())
        } else {
            Err(ConnectorError::InvalidRequest(format!(
                "channel {} is outside the selected channels",
                channel
            )))
        }
    }

    #[instrument(skip(self, input), fields(channel = %input.channel))]
    async fn send_message(&self, input: SendMessageInput) -> ConnectorResult<Value> {
        self.ensure_in_scope(&input.channel)?;
        if input.text.trim().is_empty() {
            return Err(ConnectorError::InvalidRequest(
                "message text must not be empty".to_string(),
            ));
        }
        if input.text.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ConnectorError::InvalidRequest(format!(
                "message text exceeds {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }

        let payload = PostMessageRequest {
            channel: &input.channel,
            text: &input.text,
            thread_ts: input.thread_ts.as_deref(),
        };
        let body: Value = self.client.post_json("/chat.postMessage", &payload).await?;
        let posted: PostMessageResponse = unwrap_envelope(body)?;

        info!(ts = %posted.ts, "Posted Slack message");
        Ok(json!({
            "channel": posted.channel,
            "ts": posted.ts,
        }))
    }

    #[instrument(skip(self, input), fields(channel = %input.channel))]
    async fn channel_history(&self, input: ChannelHistoryInput) -> ConnectorResult<TabularResult> {
        self.ensure_in_scope(&input.channel)?;

        let limit = input.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 200).to_string();
        let mut query = vec![("channel", input.channel.as_str()), ("limit", limit.as_str())];
        if let Some(oldest) = input.oldest.as_deref() {
            query.push(("oldest", oldest));
        }

        let body: Value = self
            .client
            .get_json_with_query("/conversations.history", &query)
            .await?;
        let history: HistoryResponse = unwrap_envelope(body)?;
        debug!(count = history.messages.len(), "Fetched Slack history");

        let mut table = TabularResult::new(["ts", "user", "text"]);
        for message in history.messages {
            table.push_row(vec![
                json!(message.ts),
                json!(message.user.or(message.bot_id)),
                json!(message.text),
            ]);
        }
        Ok(table)
    }
}

/// The Slack connector descriptor.
#[derive(Debug, Clone, Default)]
pub struct SlackDescriptor;

impl SlackDescriptor {
    pub fn new() -> Self {
        Self
    }

    /// Web API tier 3 allows roughly 50 calls per minute.
    fn client(config: &SlackConfig, secrets: &SlackSecrets) -> ConnectorResult<HttpClient> {
        HttpClient::new(&config.http_settings(), secrets.auth.clone())?
            .with_rate_limit(RateLimitConfig {
                max_requests: 50,
                period: std::time::Duration::from_secs(60),
                burst_size: 5,
            })
    }

    async fn list_channels(
        &self,
        config: &SlackConfig,
        client: &HttpClient,
    ) -> ConnectorResult<Vec<String>> {
        let types = if config.include_private {
            "public_channel,private_channel"
        } else {
            "public_channel"
        };
        let limit = CHANNEL_PAGE_SIZE.to_string();

        let mut ids = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = vec![
                ("types", types),
                ("exclude_archived", "true"),
                ("limit", limit.as_str()),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }
            let body: Value = client
                .get_json_with_query("/conversations.list", &query)
                .await?;
            let page: ConversationsPage = unwrap_envelope(body)?;
            ids.extend(page.channels.into_iter().map(|c| c.id));

            match page.response_metadata.and_then(|m| m.next_cursor) {
                Some(next) if !next.is_empty() => cursor = next,
                _ => break,
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ConnectorDescriptor for SlackDescriptor {
    type Config = SlackConfig;
    type Secrets = SlackSecrets;
    type Target = SlackTarget;

    fn id(&self) -> &str {
        SLACK_ID
    }

    fn display_name(&self) -> &str {
        "Slack"
    }

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition> {
        vec![ScopeTargetDefinition::multi(CHANNELS)]
    }

    async fn resolve_secrets(
        &self,
        config: &SlackConfig,
        context: &SecretContext,
    ) -> Result<Option<SlackSecrets>, CryptoError> {
        if let Some(token) = context.override_token() {
            return Ok(Some(SlackSecrets {
                auth: AuthConfig::bearer(token.clone()),
            }));
        }
        let token = context
            .resolve_credential(config.bot_token_encrypted.as_deref())
            .await?;
        Ok(token.map(|token| SlackSecrets {
            auth: AuthConfig::bearer(token),
        }))
    }

    async fn check_connection(&self, config: &SlackConfig, secrets: &SlackSecrets) -> bool {
        let client = match Self::client(config, secrets) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Slack client could not be built");
                return false;
            }
        };
        let result = match client.post_json::<_, Value>("/auth.test", &json!({})).await {
            Ok(body) => unwrap_envelope::<Value>(body).map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Slack connectivity check failed");
                false
            }
        }
    }

    async fn get_query_target_options(
        &self,
        config: &SlackConfig,
        secrets: &SlackSecrets,
    ) -> ConnectorResult<QueryTargetOptions> {
        let client = Self::client(config, secrets)?;
        let ids = self.list_channels(config, &client).await?;
        Ok(QueryTargetOptions::new(
            self.target_definitions(),
            vec![ScopeTargetSelector::new(CHANNELS, ids)],
        ))
    }

    fn build_tools(
        &self,
        config: &SlackConfig,
        target: SlackTarget,
        secrets: &SlackSecrets,
        _cache: Option<CacheHandle>,
    ) -> ConnectorResult<Vec<Tool>> {
        let api = Arc::new(SlackApi {
            client: Self::client(config, secrets)?,
            channels: target.channels,
        });

        let send_api = Arc::clone(&api);
        let send_message = Tool::new(
            SLACK_ID,
            "send_message",
            "Posts a message to one of the selected Slack channels",
            move |input: SendMessageInput| {
                let api = Arc::clone(&send_api);
                async move { api.send_message(input).await }
            },
        )?;

        let history_api = api;
        let channel_history = Tool::new(
            SLACK_ID,
            "channel_history",
            "Reads recent messages from one of the selected Slack channels",
            move |input: ChannelHistoryInput| {
                let api = Arc::clone(&history_api);
                async move { api.channel_history(input).await }
            },
        )?;

        Ok(vec![send_message, channel_history])
    }
}

// Slack API types

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    channel: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    ts: String,
    user: Option<String>,
    bot_id: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ConversationsPage {
    #[serde(default)]
    channels: Vec<SlackChannel>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::testing::test_key;
    use sb_core::{PlaintextDecryptor, SecureString, ToolError};

    fn context() -> SecretContext {
        SecretContext::new("tenant-1", test_key(), Arc::new(PlaintextDecryptor))
    }

    fn tools(channels: &[&str]) -> Vec<Tool> {
        let target = SlackTarget {
            channels: channels.iter().map(|c| c.to_string()).collect(),
        };
        let secrets = SlackSecrets {
            auth: AuthConfig::bearer(SecureString::from("xoxb-test")),
        };
        SlackDescriptor::new()
            .build_tools(&SlackConfig::default(), target, &secrets, None)
            .unwrap()
    }

    fn tool<'a>(tools: &'a [Tool], name: &str) -> &'a Tool {
        tools.iter().find(|t| t.name() == name).unwrap()
    }

    #[test]
    fn test_default_base_url() {
        assert_eq!(SlackConfig::default().http.base_url, DEFAULT_BASE_URL);

        let config: SlackConfig =
            serde_json::from_value(json!({ "bot_token_encrypted": "abc" })).unwrap();
        assert_eq!(config.http_settings().base_url, DEFAULT_BASE_URL);

        let settings = json!({ "base_url": "https://slack.proxy.internal/api" });
        let config: SlackConfig = serde_json::from_value(settings).unwrap();
        assert_eq!(config.http_settings().base_url, "https://slack.proxy.internal/api");
    }

    #[tokio::test]
    async fn test_resolve_secrets() {
        let config = SlackConfig {
            bot_token_encrypted: Some("xoxb-stored".to_string()),
            ..SlackConfig::default()
        };
        let secrets = SlackDescriptor::new()
            .resolve_secrets(&config, &context())
            .await
            .unwrap()
            .unwrap();
        match secrets.auth {
            AuthConfig::Token { scheme, token } => {
                assert_eq!(scheme, "Bearer");
                assert_eq!(token.expose_secret(), "xoxb-stored");
            }
            other => panic!("unexpected auth: {:?}", other),
        }

        let context = context().with_override_token(SecureString::from("xoxp-user"));
        let secrets = SlackDescriptor::new()
            .resolve_secrets(&config, &context)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            secrets.auth,
            AuthConfig::Token { ref token, .. } if token.expose_secret() == "xoxp-user"
        ));
    }

    #[tokio::test]
    async fn test_resolve_secrets_not_configured() {
        let secrets = SlackDescriptor::new()
            .resolve_secrets(&SlackConfig::default(), &context())
            .await
            .unwrap();
        assert!(secrets.is_none());
    }

    #[test]
    fn test_envelope_errors() {
        let failed = |code: &str| {
            unwrap_envelope::<Value>(json!({"ok": false, "error": code})).unwrap_err()
        };

        assert_eq!(failed("ratelimited"), ConnectorError::RateLimited(0));
        assert!(matches!(failed("invalid_auth"), ConnectorError::AuthenticationFailed(_)));
        assert!(matches!(failed("channel_not_found"), ConnectorError::NotFound(_)));

        let err = unwrap_envelope::<Value>(json!({"error": "fatal_error"})).unwrap_err();
        assert!(matches!(err, ConnectorError::RequestFailed(msg) if msg.contains("fatal_error")));
    }

    #[test]
    fn test_envelope_success() {
        let body = json!({"ok": true, "channel": "C1", "ts": "1700000000.000100"});
        let posted: PostMessageResponse = unwrap_envelope(body).unwrap();
        assert_eq!(posted.channel, "C1");
        assert_eq!(posted.ts, "1700000000.000100");
    }

    #[test]
    fn test_build_tools() {
        let tools = tools(&["C1"]);
        let names: Vec<_> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["send_message", "channel_history"]);
        assert_eq!(
            tool(&tools, "send_message").definition()["parameters"]["required"],
            json!(["channel", "text"])
        );
    }

    #[tokio::test]
    async fn test_send_message_outside_selection() {
        let tools = tools(&["C1"]);
        let err = tool(&tools, "send_message")
            .execute_json(json!({"channel": "C2", "text": "hello"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::Execution(ConnectorError::InvalidRequest(msg)) if msg.contains("outside")
        ));
    }

    #[tokio::test]
    async fn test_send_message_rejects_blank_text() {
        let tools = tools(&["C1"]);
        let err = tool(&tools, "send_message")
            .execute_json(json!({"channel": "C1", "text": "   "}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(ConnectorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_history_outside_selection() {
        let tools = tools(&[]);
        let err = tool(&tools, "channel_history")
            .execute_json(json!({"channel": "C1", "limit": 10}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(ConnectorError::InvalidRequest(_))));
    }
}
