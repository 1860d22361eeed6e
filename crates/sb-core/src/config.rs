//! Hub configuration loaded from YAML.
//!
//! ```yaml
//! logging:
//!   level: info
//!   json_format: false
//! cache:
//!   max_capacity: 10000
//! disabled_connectors: [slack]
//! connectors:
//!   jira:
//!     base_url: https://example.atlassian.net
//!     email: soc@example.com
//!     api_token_encrypted: "..."
//! ```
//!
//! `SB_LOG_LEVEL`, `SB_LOG_JSON`, and `SB_DISABLED_CONNECTORS` override the
//! file when set.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use sb_observability::LoggingConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, Level};

use crate::cache::{CacheHandle, MokaSharedCache};
use crate::registry::CatalogEntry;
use crate::store::ConfigurationStore;

pub const ENV_LOG_LEVEL: &str = "SB_LOG_LEVEL";
pub const ENV_LOG_JSON: &str = "SB_LOG_JSON";
pub const ENV_DISABLED_CONNECTORS: &str = "SB_DISABLED_CONNECTORS";

/// Errors loading or applying hub configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: &'static str, value: String },

    #[error("Failed to seed configuration for '{connector_id}': {message}")]
    Seed {
        connector_id: String,
        message: String,
    },
}

/// Shared cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 10_000,
        }
    }
}

/// Top-level configuration for a process hosting the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub logging: LoggingConfig,
    pub cache: CacheSettings,
    /// Catalog ids left out of initialization.
    pub disabled_connectors: Vec<String>,
    /// Seed settings per connector id.
    pub connectors: HashMap<String, Value>,
}

impl HubConfig {
    /// Loads configuration from a file and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_env_overrides()?;
        debug!(path = %path.display(), "Loaded hub configuration");
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level =
                level
                    .trim()
                    .parse::<Level>()
                    .map_err(|_| ConfigError::InvalidOverride {
                        key: ENV_LOG_LEVEL,
                        value: level.clone(),
                    })?;
        }

        if let Some(json) = lookup(ENV_LOG_JSON) {
            self.logging.json_format = match json.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidOverride {
                        key: ENV_LOG_JSON,
                        value: json,
                    })
                }
            };
        }

        if let Some(disabled) = lookup(ENV_DISABLED_CONNECTORS) {
            self.disabled_connectors = disabled
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    pub fn is_enabled(&self, connector_id: &str) -> bool {
        !self.disabled_connectors.iter().any(|id| id == connector_id)
    }

    /// Catalog rows that are not disabled, in catalog order.
    pub fn filter_catalog(&self, catalog: &[CatalogEntry]) -> Vec<CatalogEntry> {
        catalog
            .iter()
            .filter(|entry| {
                let enabled = self.is_enabled(entry.id);
                if !enabled {
                    info!(connector_id = %entry.id, "Connector disabled by configuration");
                }
                enabled
            })
            .copied()
            .collect()
    }

    /// The shared cache described by `cache`, if enabled.
    pub fn build_cache(&self) -> Option<CacheHandle> {
        self.cache
            .enabled
            .then(|| Arc::new(MokaSharedCache::new(self.cache.max_capacity)) as CacheHandle)
    }

    /// Writes the `connectors` section into `store`; returns documents written.
    pub async fn seed_store(&self, store: &dyn ConfigurationStore) -> Result<usize, ConfigError> {
        let mut ids: Vec<_> = self.connectors.keys().collect();
        ids.sort();
        for id in &ids {
            store
                .put_configuration(id, self.connectors[*id].clone())
                .await
                .map_err(|e| ConfigError::Seed {
                    connector_id: id.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(ids.len())
    }
}
