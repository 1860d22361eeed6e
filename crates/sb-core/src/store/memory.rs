//! In-memory configuration store.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ConfigurationDocument, ConfigurationStore, StoreError};

/// [`ConfigurationStore`] held in process memory.
#[derive(Clone, Default)]
pub struct InMemoryConfigurationStore {
    documents: Arc<RwLock<HashMap<String, ConfigurationDocument>>>,
}

impl InMemoryConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with settings per connector id.
    pub fn with_settings<I, S>(settings: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let documents = settings
            .into_iter()
            .map(|(id, value)| {
                let id = id.into();
                (id.clone(), ConfigurationDocument::new(id, value))
            })
            .collect();
        Self {
            documents: Arc::new(RwLock::new(documents)),
        }
    }

    /// Parses a YAML mapping of connector id to settings.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, StoreError> {
        let parsed: HashMap<String, Value> =
            serde_yaml::from_str(yaml).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::with_settings(parsed))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&contents)
    }

    /// Gets a snapshot of all documents.
    pub async fn snapshot(&self) -> Vec<ConfigurationDocument> {
        self.documents.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryConfigurationStore {
    async fn get_configuration(
        &self,
        connector_id: &str,
    ) -> Result<Option<ConfigurationDocument>, StoreError> {
        Ok(self.documents.read().await.get(connector_id).cloned())
    }

    async fn ensure_configuration_entry_present(
        &self,
        connector_id: &str,
        defaults: Value,
    ) -> Result<bool, StoreError> {
        let mut documents = self.documents.write().await;

        let existing = match documents.entry(connector_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(ConfigurationDocument::new(connector_id, defaults));
                return Ok(true);
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if let (Value::Object(stored), Value::Object(defaults)) = (&mut existing.settings, defaults)
        {
            let mut changed = false;
            for (key, value) in defaults {
                if !stored.contains_key(&key) {
                    stored.insert(key, value);
                    changed = true;
                }
            }
            if changed {
                existing.updated_at = Utc::now();
            }
        }
        Ok(false)
    }

    async fn put_configuration(
        &self,
        connector_id: &str,
        settings: Value,
    ) -> Result<ConfigurationDocument, StoreError> {
        let mut documents = self.documents.write().await;
        let document = match documents.get_mut(connector_id) {
            Some(existing) => {
                existing.settings = settings;
                existing.updated_at = Utc::now();
                existing.clone()
            }
            None => {
                let document = ConfigurationDocument::new(connector_id, settings);
                documents.insert(connector_id.to_string(), document.clone());
                document
            }
        };
        Ok(document)
    }

    async fn list_configurations(&self) -> Result<Vec<ConfigurationDocument>, StoreError> {
        let mut documents = self.snapshot().await;
        documents.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));
        Ok(documents)
    }
}
