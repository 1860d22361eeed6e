//! Elastic Security connector.
//!
//! Scoped by the `indices` axis. Offers search, SQL, and field mapping
//! tools, plus the security alert feed and a data dictionary built from the
//! index mappings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sb_core::crypto::CryptoError;
use sb_core::retry::RetryPolicy;
use sb_core::tool::{ExtraFields, FieldKind, FieldSpec, InputSchema, Tool, ToolInput};
use sb_core::{
    Alert, AlertFilter, CacheHandle, Capability, ConnectorDescriptor, ConnectorError,
    ConnectorResult, DataDictionary, DataDictionaryEntry, QueryTargetOptions,
    ScopeTargetDefinition, ScopeTargetSelector, SecretContext, Target,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::cached::get_or_fetch;
use crate::http::{AuthConfig, HttpClient, HttpSettings};

pub const ELASTIC_ID: &str = "elastic";
pub const INDICES: &str = "indices";

/// Elastic Security connector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    #[serde(flatten)]
    pub http: HttpSettings,
    /// Sent as `Authorization: ApiKey <key>`.
    pub api_key_encrypted: Option<String>,
    /// Index pattern holding detection alerts.
    pub alerts_index: String,
    /// Index pattern documented by the data dictionary.
    pub dictionary_index: String,
    pub max_hits: u32,
    pub mapping_cache_ttl_secs: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            api_key_encrypted: None,
            alerts_index: ".alerts-security.alerts-default".to_string(),
            dictionary_index: "logs-*".to_string(),
            max_hits: 100,
            mapping_cache_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElasticSecrets {
    auth: AuthConfig,
    /// Scopes cached lookups to the tenant whose credentials fetched them.
    tenant_user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticTarget {
    pub indices: Vec<String>,
}

impl Target for ElasticTarget {}

#[derive(Debug, Deserialize)]
struct SearchEventsInput {
    #[serde(default)]
    query: Option<String>,
    start: Option<String>,
    end: Option<String>,
    size: Option<u32>,
}

impl ToolInput for SearchEventsInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![
                FieldSpec::optional("query", FieldKind::String)
                    .describe("Lucene query string; all events when omitted"),
                FieldSpec::optional("start", FieldKind::String)
                    .describe("Range start, e.g. now-24h or an RFC 3339 timestamp"),
                FieldSpec::optional("end", FieldKind::String),
                FieldSpec::optional("size", FieldKind::UnsignedInteger),
            ],
        )
    }
}

#[derive(Debug, Deserialize)]
struct SqlQueryInput {
    query: String,
    fetch_size: Option<u32>,
}

impl ToolInput for SqlQueryInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![
                FieldSpec::required("query", FieldKind::String)
                    .describe("Elasticsearch SQL over one of the selected indices"),
                FieldSpec::optional("fetch_size", FieldKind::UnsignedInteger),
            ],
        )
    }
}

#[derive(Debug, Deserialize)]
struct FieldMappingInput {
    index: String,
}

impl ToolInput for FieldMappingInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Ignore,
            vec![FieldSpec::required("index", FieldKind::String)],
        )
    }
}

/// Rejects index names that would widen the request path.
fn validate_index_name(index: &str) -> ConnectorResult<()> {
    if index.is_empty()
        || index
            .chars()
            .any(|c| matches!(c, ',' | '/' | '\\' | ' ' | '"' | '#' | '?'))
    {
        return Err(ConnectorError::InvalidRequest(format!(
            "invalid index name '{}'",
            index
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SqlToken {
    /// Bare word: keyword, identifier, number, or operator run.
    Word(String),
    /// Double-quoted or backquoted identifier.
    Quoted(String),
    /// Single-quoted string literal.
    Literal,
    Punct(char),
}

fn is_sql_punct(c: char) -> bool {
    matches!(c, ',' | '(' | ')' | ';')
}

fn ends_word(c: char) -> bool {
    c.is_whitespace() || is_sql_punct(c) || matches!(c, '"' | '`' | '\'')
}

/// Splits SQL into identifiers, literals, and list punctuation.
fn sql_tokens(sql: &str) -> Vec<SqlToken> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            c if is_sql_punct(c) => tokens.push(SqlToken::Punct(c)),
            '"' | '`' | '\'' => {
                let mut text = String::new();
                while let Some(next) = chars.next() {
                    if next == c {
                        // A doubled quote is an escaped quote.
                        if chars.peek() == Some(&c) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    text.push(next);
                }
                tokens.push(if c == '\'' {
                    SqlToken::Literal
                } else {
                    SqlToken::Quoted(text)
                });
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if ends_word(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(SqlToken::Word(word));
            }
        }
    }
    tokens
}

fn is_keyword(token: &SqlToken, keyword: &str) -> bool {
    matches!(token, SqlToken::Word(w) if w.eq_ignore_ascii_case(keyword))
}

/// Words that end a table reference rather than alias it.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "JOIN", "INNER", "LEFT", "RIGHT", "FULL",
    "OUTER", "CROSS", "ON", "UNION", "PIVOT", "FROM",
];

/// Every table named after a FROM or JOIN, including comma-separated lists.
///
/// Anything in a table position that is not an identifier (a subquery's
/// parenthesis excepted) is returned as is, so it never matches an index.
fn referenced_tables(sql: &str) -> Vec<String> {
    let tokens = sql_tokens(sql);
    let mut tables = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if !(is_keyword(&tokens[i], "FROM") || is_keyword(&tokens[i], "JOIN")) {
            i += 1;
            continue;
        }
        i += 1;
        loop {
            match tokens.get(i) {
                Some(SqlToken::Word(w)) | Some(SqlToken::Quoted(w)) => tables.push(w.clone()),
                // The subquery's own FROM is picked up by the outer scan.
                Some(SqlToken::Punct('(')) => break,
                Some(SqlToken::Literal) => tables.push("'literal'".to_string()),
                Some(SqlToken::Punct(c)) => tables.push(c.to_string()),
                None => tables.push(String::new()),
            }
            i += 1;

            // Optional alias, with or without AS.
            if tokens.get(i).is_some_and(|t| is_keyword(t, "AS")) {
                i += 2;
            } else if let Some(SqlToken::Word(w)) | Some(SqlToken::Quoted(w)) = tokens.get(i) {
                let ends_reference = matches!(tokens.get(i), Some(SqlToken::Word(_)))
                    && CLAUSE_KEYWORDS.iter().any(|k| w.eq_ignore_ascii_case(k));
                if !ends_reference {
                    i += 1;
                }
            }

            if tokens.get(i) == Some(&SqlToken::Punct(',')) {
                i += 1;
            } else {
                break;
            }
        }
    }
    tables
}

/// Checks that `sql` reads from at least one table and only from `indices`.
fn ensure_sql_within(sql: &str, indices: &[String]) -> ConnectorResult<()> {
    let tables = referenced_tables(sql);
    if tables.is_empty() {
        return Err(ConnectorError::InvalidRequest(format!(
            "query must read FROM one of the selected indices: {}",
            indices.join(", ")
        )));
    }
    for table in &tables {
        if !indices.iter().any(|index| index.eq_ignore_ascii_case(table)) {
            return Err(ConnectorError::InvalidRequest(format!(
                "table '{}' is not one of the selected indices: {}",
                table,
                indices.join(", ")
            )));
        }
    }
    Ok(())
}

/// Flattens mapping `properties` into dotted field names and their types.
fn flatten_properties(
    properties: &Map<String, Value>,
    prefix: &str,
    out: &mut BTreeMap<String, String>,
) {
    for (name, spec) in properties {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        if let Some(children) = spec.get("properties").and_then(Value::as_object) {
            flatten_properties(children, &path, out);
        } else if let Some(field_type) = spec.get("type").and_then(Value::as_str) {
            out.insert(path, field_type.to_string());
        }
    }
}

/// Fields of every index in a `_mapping` response.
fn mapping_fields(response: &Value) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    if let Some(indices) = response.as_object() {
        for mapping in indices.values() {
            if let Some(properties) = mapping
                .pointer("/mappings/properties")
                .and_then(Value::as_object)
            {
                flatten_properties(properties, "", &mut fields);
            }
        }
    }
    fields
}

fn parse_timestamp(doc: &Value) -> DateTime<Utc> {
    doc.get("@timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Alert documents carry ECS fields either dotted or nested.
fn parse_alert(hit: ElasticHit) -> Alert {
    let doc = Value::Object(hit.source);
    let field = |dotted: &str| {
        let pointer = format!("/{}", dotted.replace('.', "/"));
        doc.get(dotted)
            .or_else(|| doc.pointer(&pointer))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let title = field("kibana.alert.rule.name").unwrap_or_else(|| "Unknown Alert".to_string());
    let description = field("kibana.alert.reason").unwrap_or_default();
    let severity = field("kibana.alert.severity")
        .unwrap_or_else(|| "medium".to_string())
        .to_lowercase();
    let timestamp = parse_timestamp(&doc);

    Alert {
        id: hit.id.unwrap_or_default(),
        title,
        description,
        severity,
        timestamp,
        source: ELASTIC_ID.to_string(),
        raw_data: match doc {
            Value::Object(map) => map.into_iter().collect::<HashMap<_, _>>(),
            _ => HashMap::new(),
        },
    }
}

fn alerts_query(filter: &AlertFilter) -> Value {
    let mut range = Map::new();
    if let Some(since) = filter.since {
        range.insert("gte".to_string(), json!(since.to_rfc3339()));
    }
    if let Some(until) = filter.until {
        range.insert("lte".to_string(), json!(until.to_rfc3339()));
    }

    let mut must = Vec::new();
    if !range.is_empty() {
        must.push(json!({ "range": { "@timestamp": range } }));
    }
    if !filter.severities.is_empty() {
        must.push(json!({ "terms": { "kibana.alert.severity": filter.severities } }));
    }

    json!({
        "query": { "bool": { "must": must } },
        "size": filter.limit,
        "sort": [{ "@timestamp": "desc" }]
    })
}

fn mapping_cache_key(tenant_user_id: &str, base_url: &str, index: &str) -> String {
    format!("elastic:mapping:{}:{}:{}", tenant_user_id, base_url, index)
}

/// Calls against one cluster, restricted to the selected indices.
struct ElasticApi {
    config: ElasticConfig,
    client: HttpClient,
    indices: Vec<String>,
    tenant_user_id: String,
    cache: Option<CacheHandle>,
}

impl ElasticApi {
    fn selected_path(&self) -> ConnectorResult<String> {
        if self.indices.is_empty() {
            return Err(ConnectorError::InvalidRequest(
                "no Elastic indices are selected".to_string(),
            ));
        }
        for index in &self.indices {
            validate_index_name(index)?;
        }
        Ok(self.indices.join(","))
    }

    #[instrument(skip(self, input))]
    async fn search_events(&self, input: SearchEventsInput) -> ConnectorResult<Value> {
        let path = format!("/{}/_search", self.selected_path()?);

        let mut must = vec![json!({
            "query_string": { "query": input.query.as_deref().unwrap_or("*") }
        })];
        if input.start.is_some() || input.end.is_some() {
            let mut range = Map::new();
            if let Some(start) = input.start {
                range.insert("gte".to_string(), json!(start));
            }
            if let Some(end) = input.end {
                range.insert("lte".to_string(), json!(end));
            }
            must.push(json!({ "range": { "@timestamp": range } }));
        }
        let body = json!({
            "query": { "bool": { "must": must } },
            "size": input.size.unwrap_or(self.config.max_hits).min(self.config.max_hits),
            "sort": [{ "@timestamp": "desc" }]
        });

        let result: ElasticSearchResponse = self.client.post_json(&path, &body).await?;
        let events: Vec<Value> = result
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                let mut event = hit.source;
                event.insert("_index".to_string(), json!(hit.index));
                event.insert("_id".to_string(), json!(hit.id));
                Value::Object(event)
            })
            .collect();

        Ok(json!({
            "total": result.hits.total.map(|t| t.value).unwrap_or(events.len() as u64),
            "took_ms": result.took,
            "events": events,
        }))
    }

    /// Returns the SQL response as is: `columns` objects carrying `name`
    /// plus positional `rows`.
    #[instrument(skip(self, input))]
    async fn sql_query(&self, input: SqlQueryInput) -> ConnectorResult<Value> {
        ensure_sql_within(&input.query, &self.indices)?;
        let body = json!({
            "query": input.query,
            "fetch_size": input.fetch_size.unwrap_or(self.config.max_hits),
        });
        self.client.post_json("/_sql?format=json", &body).await
    }

    #[instrument(skip(self))]
    async fn get_field_mapping(&self, index: &str) -> ConnectorResult<Value> {
        if !self.indices.iter().any(|i| i == index) {
            return Err(ConnectorError::InvalidRequest(format!(
                "index {} is not selected",
                index
            )));
        }
        validate_index_name(index)?;

        let key = mapping_cache_key(&self.tenant_user_id, self.client.base_url(), index);
        let ttl = Duration::from_secs(self.config.mapping_cache_ttl_secs);
        let client = &self.client;
        let path = format!("/{}/_mapping", index);
        let fields: BTreeMap<String, String> =
            get_or_fetch(self.cache.as_ref(), &key, ttl, || async move {
                let response: Value = client.get_json(&path).await?;
                Ok(mapping_fields(&response))
            })
            .await?;

        Ok(json!({ "index": index, "fields": fields }))
    }
}

/// The Elastic Security connector descriptor.
#[derive(Debug, Clone, Default)]
pub struct ElasticDescriptor;

impl ElasticDescriptor {
    pub fn new() -> Self {
        Self
    }

    fn client(config: &ElasticConfig, secrets: &ElasticSecrets) -> ConnectorResult<HttpClient> {
        Ok(HttpClient::new(&config.http, secrets.auth.clone())?
            .with_retry_policy(RetryPolicy::on_statuses(3, Default::default(), &[429, 503])))
    }
}

#[async_trait]
impl ConnectorDescriptor for ElasticDescriptor {
    type Config = ElasticConfig;
    type Secrets = ElasticSecrets;
    type Target = ElasticTarget;

    fn id(&self) -> &str {
        ELASTIC_ID
    }

    fn display_name(&self) -> &str {
        "Elastic Security"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Tools,
            Capability::QueryTargets,
            Capability::Alerts,
            Capability::DataDictionary,
        ]
    }

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition> {
        vec![ScopeTargetDefinition::multi(INDICES)]
    }

    async fn resolve_secrets(
        &self,
        config: &ElasticConfig,
        context: &SecretContext,
    ) -> Result<Option<ElasticSecrets>, CryptoError> {
        let tenant_user_id = context.tenant_user_id().to_string();
        if let Some(token) = context.override_token() {
            return Ok(Some(ElasticSecrets {
                auth: AuthConfig::bearer(token.clone()),
                tenant_user_id,
            }));
        }
        let key = context
            .resolve_credential(config.api_key_encrypted.as_deref())
            .await?;
        Ok(key.map(|token| ElasticSecrets {
            auth: AuthConfig::Token {
                scheme: "ApiKey".to_string(),
                token,
            },
            tenant_user_id,
        }))
    }

    async fn check_connection(&self, config: &ElasticConfig, secrets: &ElasticSecrets) -> bool {
        let client = match Self::client(config, secrets) {
            Ok(client) => client.with_retry_policy(RetryPolicy::no_retry()),
            Err(e) => {
                warn!(error = %e, "Elastic client could not be built");
                return false;
            }
        };
        match client.get_json::<Value>("/_cluster/health").await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Elastic connectivity check failed");
                false
            }
        }
    }

    /// Open indices, excluding hidden and system ones (leading dot).
    async fn get_query_target_options(
        &self,
        config: &ElasticConfig,
        secrets: &ElasticSecrets,
    ) -> ConnectorResult<QueryTargetOptions> {
        let client = Self::client(config, secrets)?;
        let rows: Vec<CatIndex> = client
            .get_json("/_cat/indices?format=json&h=index,status&expand_wildcards=open")
            .await?;

        let mut indices: Vec<String> = rows
            .into_iter()
            .map(|row| row.index)
            .filter(|index| !index.starts_with('.'))
            .collect();
        indices.sort();
        indices.dedup();

        Ok(QueryTargetOptions::new(
            self.target_definitions(),
            vec![ScopeTargetSelector::new(INDICES, indices)],
        ))
    }

    fn build_tools(
        &self,
        config: &ElasticConfig,
        target: ElasticTarget,
        secrets: &ElasticSecrets,
        cache: Option<CacheHandle>,
    ) -> ConnectorResult<Vec<Tool>> {
        let api = Arc::new(ElasticApi {
            config: config.clone(),
            client: Self::client(config, secrets)?,
            indices: target.indices,
            tenant_user_id: secrets.tenant_user_id.clone(),
            cache,
        });

        let search_api = Arc::clone(&api);
        let search = Tool::new(
            ELASTIC_ID,
            "search_events",
            "Searches events in the selected indices",
            move |input: SearchEventsInput| {
                let api = Arc::clone(&search_api);
                async move { api.search_events(input).await }
            },
        )?;

        let sql_api = Arc::clone(&api);
        let sql = Tool::new(
            ELASTIC_ID,
            "sql_query",
            "Runs an Elasticsearch SQL query against a selected index",
            move |input: SqlQueryInput| {
                let api = Arc::clone(&sql_api);
                async move { api.sql_query(input).await }
            },
        )?;

        let mapping_api = api;
        let mapping = Tool::new(
            ELASTIC_ID,
            "get_field_mapping",
            "Lists the fields and types of a selected index",
            move |input: FieldMappingInput| {
                let api = Arc::clone(&mapping_api);
                async move { api.get_field_mapping(&input.index).await }
            },
        )?;

        Ok(vec![search, sql, mapping])
    }

    /// Degrades to an empty feed when rate limiting outlasts the retries.
    async fn get_alerts(
        &self,
        config: &ElasticConfig,
        secrets: &ElasticSecrets,
        filter: &AlertFilter,
    ) -> ConnectorResult<Vec<Alert>> {
        validate_index_name(&config.alerts_index)?;
        let client = Self::client(config, secrets)?.with_retry_policy(RetryPolicy::no_retry());
        let path = format!("/{}/_search", config.alerts_index);
        let body = alerts_query(filter);

        let (client, path, body) = (&client, &path, &body);
        let alerts = RetryPolicy::on_statuses(3, Default::default(), &[429, 503])
            .run_or_partial(
                "elastic alerts",
                || async move {
                    let response: ElasticSearchResponse = client.post_json(path, body).await?;
                    Ok(response
                        .hits
                        .hits
                        .into_iter()
                        .map(parse_alert)
                        .filter(|alert| filter.matches(alert))
                        .take(filter.limit)
                        .collect::<Vec<_>>())
                },
                Vec::new(),
            )
            .await?;

        info!(count = alerts.len(), "Fetched Elastic alerts");
        Ok(alerts)
    }

    async fn merge_data_dictionary(
        &self,
        config: &ElasticConfig,
        secrets: &ElasticSecrets,
        dictionary: &mut DataDictionary,
    ) -> ConnectorResult<usize> {
        let client = Self::client(config, secrets)?;
        let response: Value = client
            .get_json(&format!("/{}/_mapping", config.dictionary_index))
            .await?;

        let mut added = 0;
        for (field, field_type) in mapping_fields(&response) {
            let entry = DataDictionaryEntry {
                description: format!("{} field from {}", field_type, config.dictionary_index),
                field_type,
                source: ELASTIC_ID.to_string(),
            };
            if dictionary.insert(field, entry) {
                added += 1;
            }
        }
        debug!(added, "Merged Elastic data dictionary");
        Ok(added)
    }
}

// Elastic API types

#[derive(Debug, Deserialize)]
struct CatIndex {
    index: String,
}

#[derive(Debug, Deserialize)]
struct ElasticSearchResponse {
    #[serde(default)]
    took: u64,
    hits: ElasticHits,
}

#[derive(Debug, Deserialize)]
struct ElasticHits {
    total: Option<ElasticTotal>,
    #[serde(default)]
    hits: Vec<ElasticHit>,
}

#[derive(Debug, Deserialize)]
struct ElasticTotal {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct ElasticHit {
    #[serde(rename = "_id")]
    id: Option<String>,
    #[serde(rename = "_index")]
    index: Option<String>,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}
