//! Test doubles for the registry and tool pipeline.
//!
//! [`StaticDescriptor`] is a configurable in-memory connector with no network
//! access. It lets callers exercise registration, availability handling,
//! target selection, and tool execution end-to-end.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::alert::{Alert, AlertFilter};
use crate::cache::CacheHandle;
use crate::crypto::{CryptoError, PlaintextDecryptor};
use crate::descriptor::{Capability, ConnectorDescriptor, SecretContext};
use crate::error::{ConnectorError, ConnectorResult};
use crate::registry::ConnectorRegistry;
use crate::secure_string::SecureString;
use crate::store::InMemoryConfigurationStore;
use crate::target::{QueryTargetOptions, ScopeTargetDefinition, ScopeTargetSelector, Target};
use crate::tool::{ExtraFields, FieldKind, FieldSpec, InputSchema, TabularResult, Tool, ToolInput};

/// Tenant id used by the test helpers.
pub const TENANT: &str = "tenant-1";

/// A fixed tenant key. Only meaningful with [`PlaintextDecryptor`].
pub fn test_key() -> SecureString {
    SecureString::from("test-tenant-key")
}

/// A registry over an empty in-memory store with plaintext secrets.
pub fn test_registry() -> ConnectorRegistry {
    ConnectorRegistry::new(
        Arc::new(InMemoryConfigurationStore::new()),
        Arc::new(PlaintextDecryptor),
    )
}

/// Settings for [`StaticDescriptor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    pub api_key_encrypted: Option<String>,
    pub label: String,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            api_key_encrypted: None,
            label: "static".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticSecrets {
    pub token: Option<SecureString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticTarget {
    pub sites: Vec<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl Target for StaticTarget {}

#[derive(Debug, Deserialize)]
struct EchoInput {
    message: String,
    #[serde(default)]
    repeat: Option<i64>,
}

impl ToolInput for EchoInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Ignore,
            vec![
                FieldSpec::required("message", FieldKind::String),
                FieldSpec::optional("repeat", FieldKind::Integer),
            ],
        )
    }
}

#[derive(Debug, Deserialize)]
struct EmptyInput {}

impl ToolInput for EmptyInput {
    fn schema() -> InputSchema {
        InputSchema::structured(ExtraFields::Ignore, Vec::new())
    }
}

/// In-memory connector with scriptable availability.
///
/// Axes: `sites` (multi) and `region` (single). Tools: `echo`, `table`, `fail`.
#[derive(Debug, Clone)]
pub struct StaticDescriptor {
    id: String,
    display_name: String,
    available: bool,
    credential_required: bool,
    undeclared_selector: bool,
    sites: Vec<String>,
}

impl StaticDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: format!("Static {}", id),
            id,
            available: true,
            credential_required: false,
            undeclared_selector: false,
            sites: vec!["hq".to_string(), "lab".to_string()],
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Makes the connectivity check fail.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Reports "not configured" unless a credential resolves.
    pub fn requiring_credential(mut self) -> Self {
        self.credential_required = true;
        self
    }

    /// Returns a selector whose type has no definition.
    pub fn with_undeclared_selector(mut self) -> Self {
        self.undeclared_selector = true;
        self
    }

    pub fn with_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sites = sites.into_iter().map(Into::into).collect();
        self
    }
}

/// An alert stamped now, attributed to `source`.
pub fn sample_alert(source: &str) -> Alert {
    Alert {
        id: "alert-1".to_string(),
        title: "Suspicious login".to_string(),
        description: "Login from a new country".to_string(),
        severity: "high".to_string(),
        timestamp: Utc::now(),
        source: source.to_string(),
        raw_data: HashMap::new(),
    }
}

#[async_trait]
impl ConnectorDescriptor for StaticDescriptor {
    type Config = StaticConfig;
    type Secrets = StaticSecrets;
    type Target = StaticTarget;

    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Tools,
            Capability::QueryTargets,
            Capability::Alerts,
        ]
    }

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition> {
        vec![
            ScopeTargetDefinition::multi("sites"),
            ScopeTargetDefinition::single("region"),
        ]
    }

    async fn resolve_secrets(
        &self,
        config: &StaticConfig,
        context: &SecretContext,
    ) -> Result<Option<StaticSecrets>, CryptoError> {
        let token = context
            .resolve_credential(config.api_key_encrypted.as_deref())
            .await?;
        if self.credential_required && token.is_none() {
            return Ok(None);
        }
        Ok(Some(StaticSecrets { token }))
    }

    async fn check_connection(&self, _config: &StaticConfig, _secrets: &StaticSecrets) -> bool {
        self.available
    }

    async fn get_query_target_options(
        &self,
        _config: &StaticConfig,
        _secrets: &StaticSecrets,
    ) -> ConnectorResult<QueryTargetOptions> {
        let mut selectors = vec![
            ScopeTargetSelector::new("sites", self.sites.clone()),
            ScopeTargetSelector::new("region", vec!["us".to_string(), "eu".to_string()]),
        ];
        if self.undeclared_selector {
            selectors.push(ScopeTargetSelector::new("boards", vec!["1".to_string()]));
        }
        Ok(QueryTargetOptions::new(self.target_definitions(), selectors))
    }

    fn build_tools(
        &self,
        _config: &StaticConfig,
        target: StaticTarget,
        _secrets: &StaticSecrets,
        _cache: Option<CacheHandle>,
    ) -> ConnectorResult<Vec<Tool>> {
        let sites = target.sites.clone();
        let echo = Tool::new_sync(
            self.id.clone(),
            "echo",
            "Echoes the message for the selected sites",
            move |input: EchoInput| {
                Ok::<_, ConnectorError>(json!({
                    "message": input.message.repeat(input.repeat.unwrap_or(1).max(1) as usize),
                    "sites": sites,
                }))
            },
        )?;

        let rows = target.sites.clone();
        let table = Tool::new_sync(
            self.id.clone(),
            "table",
            "Lists the selected sites as a table",
            move |_: EmptyInput| {
                let table = TabularResult::new(["site", "index"]).with_rows(
                    rows.iter()
                        .enumerate()
                        .map(|(i, site)| vec![json!(site), json!(i)])
                        .collect(),
                );
                Ok::<_, ConnectorError>(table)
            },
        )?;

        let fail = Tool::new(
            self.id.clone(),
            "fail",
            "Always rate limited",
            |_: EmptyInput| async { Err::<serde_json::Value, _>(ConnectorError::RateLimited(1)) },
        )?;

        Ok(vec![echo, table, fail])
    }

    async fn get_alerts(
        &self,
        _config: &StaticConfig,
        _secrets: &StaticSecrets,
        filter: &AlertFilter,
    ) -> ConnectorResult<Vec<Alert>> {
        Ok(std::iter::once(sample_alert(&self.id))
            .filter(|a| filter.matches(a))
            .take(filter.limit)
            .collect())
    }
}
