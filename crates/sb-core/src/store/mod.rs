//! Configuration store: one settings document per connector id.

mod memory;

pub use memory::InMemoryConfigurationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a configuration store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Persisted settings for one connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationDocument {
    pub connector_id: String,
    /// Vendor settings; deserialized into the descriptor's config type.
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigurationDocument {
    pub fn new(connector_id: impl Into<String>, settings: Value) -> Self {
        let now = Utc::now();
        Self {
            connector_id: connector_id.into(),
            settings,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Where connector configuration lives.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn get_configuration(
        &self,
        connector_id: &str,
    ) -> Result<Option<ConfigurationDocument>, StoreError>;

    /// Makes sure a document exists for `connector_id`.
    ///
    /// Creates it from `defaults` when missing; otherwise adds any top-level
    /// default keys the stored settings lack without touching stored values.
    /// Returns true if the document was created.
    async fn ensure_configuration_entry_present(
        &self,
        connector_id: &str,
        defaults: Value,
    ) -> Result<bool, StoreError>;

    /// Creates or replaces the settings for `connector_id`.
    async fn put_configuration(
        &self,
        connector_id: &str,
        settings: Value,
    ) -> Result<ConfigurationDocument, StoreError>;

    /// All documents, ordered by connector id.
    async fn list_configurations(&self) -> Result<Vec<ConfigurationDocument>, StoreError>;
}
