//! The connector registry.
//!
//! Built once at startup from a static catalog, then shared read-only (for
//! example behind an `Arc`). Each `get` produces a fresh, tenant-scoped
//! connector instance whose connectivity has been checked.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sb_observability::connector_span;
use serde_json::Value;
use tracing::{debug, error, info, warn, Instrument};

use crate::cache::CacheHandle;
use crate::connector::{Connector, DynConnector};
use crate::crypto::SecretDecryptor;
use crate::descriptor::{ConnectorDescriptor, DynDescriptor, SecretContext};
use crate::error::{ConnectorResult, RegistryError, RegistryErrorKind};
use crate::secure_string::SecureString;
use crate::store::ConfigurationStore;

/// Constructs one descriptor. Catalog tables hold these as plain function pointers.
pub type DescriptorFactory = fn() -> ConnectorResult<Arc<dyn DynDescriptor>>;

/// One row of the compile-time connector catalog.
#[derive(Clone, Copy)]
pub struct CatalogEntry {
    /// Id the constructed descriptor must report.
    pub id: &'static str,
    pub factory: DescriptorFactory,
}

impl CatalogEntry {
    pub const fn new(id: &'static str, factory: DescriptorFactory) -> Self {
        Self { id, factory }
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry").field("id", &self.id).finish()
    }
}

/// A registered descriptor.
#[derive(Clone)]
pub struct RegistryEntry {
    descriptor: Arc<dyn DynDescriptor>,
    registered_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn id(&self) -> &str {
        self.descriptor.id()
    }

    pub fn descriptor(&self) -> &Arc<dyn DynDescriptor> {
        &self.descriptor
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("id", &self.id())
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// A catalog row that did not make it into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedConnector {
    pub id: String,
    pub reason: String,
}

/// Outcome of [`ConnectorRegistry::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitializationSummary {
    pub registered: Vec<String>,
    pub skipped: Vec<SkippedConnector>,
}

/// Process-wide catalog of connector descriptors.
pub struct ConnectorRegistry {
    entries: Vec<RegistryEntry>,
    store: Arc<dyn ConfigurationStore>,
    decryptor: Arc<dyn SecretDecryptor>,
    cache: Option<CacheHandle>,
}

impl ConnectorRegistry {
    pub fn new(store: Arc<dyn ConfigurationStore>, decryptor: Arc<dyn SecretDecryptor>) -> Self {
        Self {
            entries: Vec::new(),
            store,
            decryptor,
            cache: None,
        }
    }

    /// Adds `descriptor` under its id and seeds its configuration document.
    ///
    /// A second registration of the same id fails and leaves the first intact.
    pub async fn register(
        &mut self,
        descriptor: Arc<dyn DynDescriptor>,
    ) -> Result<(), RegistryError> {
        let connector_id = descriptor.id().to_string();
        if self.contains(&connector_id) {
            return Err(RegistryError::DuplicateRegistration { connector_id });
        }

        let defaults = descriptor.default_configuration()?;
        let created = self
            .store
            .ensure_configuration_entry_present(&connector_id, defaults)
            .await
            .map_err(|e| RegistryError::Configuration {
                connector_id: connector_id.clone(),
                message: e.to_string(),
            })?;

        debug!(
            connector_id = %connector_id,
            configuration_created = created,
            "Connector registered"
        );
        self.entries.push(RegistryEntry {
            descriptor,
            registered_at: Utc::now(),
        });
        Ok(())
    }

    /// Registers every catalog row and stores the shared cache handle.
    ///
    /// Rows whose factory fails, whose descriptor reports a different id, or
    /// whose registration fails are logged and left out.
    pub async fn initialize(
        &mut self,
        catalog: &[CatalogEntry],
        cache: Option<CacheHandle>,
    ) -> InitializationSummary {
        self.cache = cache;
        let mut summary = InitializationSummary::default();

        for entry in catalog {
            let descriptor = match (entry.factory)() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!(
                        connector_id = %entry.id,
                        error = %e,
                        "Connector failed to load, skipping"
                    );
                    summary.skipped.push(SkippedConnector {
                        id: entry.id.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if descriptor.id() != entry.id {
                error!(
                    connector_id = %entry.id,
                    descriptor_id = %descriptor.id(),
                    "Catalog id does not match descriptor id, skipping"
                );
                summary.skipped.push(SkippedConnector {
                    id: entry.id.to_string(),
                    reason: format!("descriptor reports id '{}'", descriptor.id()),
                });
                continue;
            }

            match self.register(descriptor).await {
                Ok(()) => summary.registered.push(entry.id.to_string()),
                Err(e) => {
                    warn!(
                        connector_id = %entry.id,
                        error = %e,
                        "Connector registration failed, skipping"
                    );
                    summary.skipped.push(SkippedConnector {
                        id: entry.id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            registered = summary.registered.len(),
            skipped = summary.skipped.len(),
            "Connector registry initialized"
        );
        summary
    }

    pub fn contains(&self, connector_id: &str) -> bool {
        self.entries.iter().any(|e| e.id() == connector_id)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(RegistryEntry::id).collect()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptor(&self, connector_id: &str) -> Option<&Arc<dyn DynDescriptor>> {
        self.entry(connector_id).map(RegistryEntry::descriptor)
    }

    pub fn cache(&self) -> Option<&CacheHandle> {
        self.cache.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn ConfigurationStore> {
        &self.store
    }

    fn entry(&self, connector_id: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.id() == connector_id)
    }

    /// Builds a checked connector instance for one tenant.
    pub async fn get(
        &self,
        connector_id: &str,
        tenant_user_id: &str,
        encryption_key: &SecureString,
    ) -> Result<Box<dyn DynConnector>, RegistryError> {
        let context = SecretContext::new(
            tenant_user_id,
            encryption_key.clone(),
            Arc::clone(&self.decryptor),
        );
        self.instantiate(connector_id, context).await
    }

    /// Like [`get`](Self::get), with a token that takes precedence over
    /// stored credentials.
    pub async fn get_with_override(
        &self,
        connector_id: &str,
        tenant_user_id: &str,
        encryption_key: &SecureString,
        override_token: SecureString,
    ) -> Result<Box<dyn DynConnector>, RegistryError> {
        let context = SecretContext::new(
            tenant_user_id,
            encryption_key.clone(),
            Arc::clone(&self.decryptor),
        )
        .with_override_token(override_token);
        self.instantiate(connector_id, context).await
    }

    /// Like [`get`](Self::get), returning the concrete typed instance.
    pub async fn get_typed<D: ConnectorDescriptor>(
        &self,
        connector_id: &str,
        tenant_user_id: &str,
        encryption_key: &SecureString,
    ) -> Result<Connector<D>, RegistryError> {
        let connector = self.get(connector_id, tenant_user_id, encryption_key).await?;
        connector
            .into_any()
            .downcast::<Connector<D>>()
            .map(|typed| *typed)
            .map_err(|_| RegistryError::Configuration {
                connector_id: connector_id.to_string(),
                message: format!(
                    "connector is not backed by {}",
                    std::any::type_name::<D>()
                ),
            })
    }

    /// Every usable connector for the tenant, in registration order.
    ///
    /// Connectors that report themselves unavailable are skipped; any other
    /// error aborts the listing.
    pub async fn get_connectors(
        &self,
        tenant_user_id: &str,
        encryption_key: &SecureString,
    ) -> Result<Vec<Box<dyn DynConnector>>, RegistryError> {
        let mut connectors = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match self.get(entry.id(), tenant_user_id, encryption_key).await {
                Ok(connector) => connectors.push(connector),
                Err(e) if e.kind() == RegistryErrorKind::NotAvailable => {
                    info!(
                        connector_id = %entry.id(),
                        reason = %e,
                        "Connector not available, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(connectors)
    }

    async fn load_settings(&self, connector_id: &str) -> Result<Option<Value>, RegistryError> {
        let document = self
            .store
            .get_configuration(connector_id)
            .await
            .map_err(|e| RegistryError::Configuration {
                connector_id: connector_id.to_string(),
                message: e.to_string(),
            })?;

        if document.is_none() {
            debug!(connector_id = %connector_id, "No stored configuration, using defaults");
        }
        Ok(document.map(|d| d.settings))
    }

    async fn instantiate(
        &self,
        connector_id: &str,
        context: SecretContext,
    ) -> Result<Box<dyn DynConnector>, RegistryError> {
        let entry = self
            .entry(connector_id)
            .ok_or_else(|| RegistryError::NotRegistered {
                connector_id: connector_id.to_string(),
            })?;

        let span = connector_span!(connector_id, context.tenant_user_id());
        async {
            let settings = self.load_settings(connector_id).await?;
            entry
                .descriptor
                .instantiate(settings, context, self.cache.clone())
                .await
        }
        .instrument(span)
        .await
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("entries", &self.entries)
            .field("has_cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}
