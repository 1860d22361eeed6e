//! Connector descriptors: one per vendor integration.
//!
//! A [`ConnectorDescriptor`] is typed over its configuration, secrets, and
//! target. The registry holds descriptors of many vendors at once, so each is
//! erased behind [`DynDescriptor`] with [`into_dyn`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sb_observability::connector_span;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, Instrument};

use crate::alert::{Alert, AlertFilter, DataDictionary};
use crate::cache::CacheHandle;
use crate::connector::{Connector, DynConnector};
use crate::crypto::{CryptoError, SecretDecryptor};
use crate::error::{ConnectorError, ConnectorResult, RegistryError};
use crate::secure_string::SecureString;
use crate::target::{QueryTargetOptions, ScopeTargetDefinition, Target};
use crate::tool::Tool;

/// Optional surfaces a connector offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Tools,
    QueryTargets,
    Alerts,
    DataDictionary,
}

/// Everything a descriptor needs to resolve secrets for one tenant.
#[derive(Clone)]
pub struct SecretContext {
    tenant_user_id: String,
    encryption_key: SecureString,
    override_token: Option<SecureString>,
    decryptor: Arc<dyn SecretDecryptor>,
}

impl SecretContext {
    pub fn new(
        tenant_user_id: impl Into<String>,
        encryption_key: SecureString,
        decryptor: Arc<dyn SecretDecryptor>,
    ) -> Self {
        Self {
            tenant_user_id: tenant_user_id.into(),
            encryption_key,
            override_token: None,
            decryptor,
        }
    }

    /// Supplies an interactively obtained token that wins over stored credentials.
    pub fn with_override_token(mut self, token: SecureString) -> Self {
        self.override_token = Some(token);
        self
    }

    pub fn tenant_user_id(&self) -> &str {
        &self.tenant_user_id
    }

    /// The override token, if one was supplied and is not blank.
    pub fn override_token(&self) -> Option<&SecureString> {
        self.override_token.as_ref().filter(|t| !t.is_blank())
    }

    /// Decrypts `ciphertext` with this tenant's key.
    pub async fn decrypt(&self, ciphertext: &str) -> Result<SecureString, CryptoError> {
        self.decryptor
            .decrypt(ciphertext, &self.encryption_key)
            .await
    }

    /// Resolves the credential to use: the override token if present,
    /// otherwise the decrypted stored ciphertext. `None` when neither exists.
    pub async fn resolve_credential(
        &self,
        stored_ciphertext: Option<&str>,
    ) -> Result<Option<SecureString>, CryptoError> {
        if let Some(token) = self.override_token() {
            return Ok(Some(token.clone()));
        }
        match stored_ciphertext.map(str::trim) {
            Some(ciphertext) if !ciphertext.is_empty() => {
                let secret = self.decrypt(ciphertext).await?;
                Ok(Some(secret).filter(|s| !s.is_blank()))
            }
            _ => Ok(None),
        }
    }
}

impl fmt::Debug for SecretContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretContext")
            .field("tenant_user_id", &self.tenant_user_id)
            .field("has_override_token", &self.override_token.is_some())
            .finish_non_exhaustive()
    }
}

/// A vendor integration.
///
/// Descriptors are created once at process start and never mutated. Every
/// request builds a fresh [`Connector`] from the stored configuration and
/// freshly resolved secrets.
#[async_trait]
pub trait ConnectorDescriptor: Send + Sync + 'static {
    /// Vendor settings, deserialized from the configuration document.
    type Config: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static;
    /// Decrypted credentials for one tenant.
    type Secrets: Clone + Send + Sync + 'static;
    /// The caller's scoping selection.
    type Target: Target;

    /// Unique registry key.
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Tools, Capability::QueryTargets]
    }

    /// Declared scoping axes.
    fn target_definitions(&self) -> Vec<ScopeTargetDefinition>;

    /// Configuration used to seed the store at registration.
    fn default_config(&self) -> Self::Config {
        Self::Config::default()
    }

    /// Resolves credentials for the tenant in `context`.
    ///
    /// `Ok(None)` means the connector is not configured for this tenant.
    async fn resolve_secrets(
        &self,
        config: &Self::Config,
        context: &SecretContext,
    ) -> Result<Option<Self::Secrets>, CryptoError>;

    /// Cheap availability probe. Ordinary connectivity failures are `false`.
    async fn check_connection(&self, config: &Self::Config, secrets: &Self::Secrets) -> bool;

    /// Live selectable values for each declared axis.
    async fn get_query_target_options(
        &self,
        config: &Self::Config,
        secrets: &Self::Secrets,
    ) -> ConnectorResult<QueryTargetOptions>;

    /// Tools closed over `target` and `secrets`.
    fn build_tools(
        &self,
        config: &Self::Config,
        target: Self::Target,
        secrets: &Self::Secrets,
        cache: Option<CacheHandle>,
    ) -> ConnectorResult<Vec<Tool>>;

    async fn get_alerts(
        &self,
        _config: &Self::Config,
        _secrets: &Self::Secrets,
        _filter: &AlertFilter,
    ) -> ConnectorResult<Vec<Alert>> {
        Err(ConnectorError::NotSupported(format!(
            "{} does not provide alerts",
            self.id()
        )))
    }

    /// Adds vendor field documentation to `dictionary`; returns entries added.
    async fn merge_data_dictionary(
        &self,
        _config: &Self::Config,
        _secrets: &Self::Secrets,
        _dictionary: &mut DataDictionary,
    ) -> ConnectorResult<usize> {
        Err(ConnectorError::NotSupported(format!(
            "{} does not provide a data dictionary",
            self.id()
        )))
    }
}

/// Object-safe view of a descriptor, as stored by the registry.
#[async_trait]
pub trait DynDescriptor: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability>;

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition>;

    /// Default configuration as JSON settings.
    fn default_configuration(&self) -> Result<Value, RegistryError>;

    /// Builds and checks a connector instance for one tenant.
    ///
    /// `settings` of `None` falls back to the default configuration.
    async fn instantiate(
        &self,
        settings: Option<Value>,
        context: SecretContext,
        cache: Option<CacheHandle>,
    ) -> Result<Box<dyn DynConnector>, RegistryError>;
}

/// Erases a typed descriptor. See [`into_dyn`].
pub struct DescriptorHandle<D>(Arc<D>);

impl<D: ConnectorDescriptor> DescriptorHandle<D> {
    pub fn new(descriptor: D) -> Self {
        Self(Arc::new(descriptor))
    }

    pub fn descriptor(&self) -> &Arc<D> {
        &self.0
    }

    fn parse_config(&self, settings: Option<Value>) -> Result<D::Config, RegistryError> {
        match settings {
            None => Ok(self.0.default_config()),
            Some(settings) => {
                serde_json::from_value(settings).map_err(|e| RegistryError::Configuration {
                    connector_id: self.0.id().to_string(),
                    message: format!("invalid settings: {}", e),
                })
            }
        }
    }

    /// Builds and checks a typed instance.
    pub async fn instantiate_typed(
        &self,
        settings: Option<Value>,
        context: SecretContext,
        cache: Option<CacheHandle>,
    ) -> Result<Connector<D>, RegistryError> {
        let descriptor = &self.0;
        let connector_id = descriptor.id().to_string();
        let config = self.parse_config(settings)?;

        let secrets = match descriptor.resolve_secrets(&config, &context).await {
            Ok(Some(secrets)) => secrets,
            Ok(None) => {
                return Err(RegistryError::NotAvailable {
                    connector_id,
                    reason: "no usable credential is configured".to_string(),
                })
            }
            Err(e) => {
                return Err(RegistryError::InvalidToken {
                    connector_id,
                    reason: e.to_string(),
                })
            }
        };

        if !descriptor.check_connection(&config, &secrets).await {
            return Err(RegistryError::NotAvailable {
                connector_id,
                reason: "connectivity check failed".to_string(),
            });
        }

        debug!("Connector instantiated");
        Ok(Connector::new(
            Arc::clone(descriptor),
            config,
            secrets,
            cache,
            context.tenant_user_id().to_string(),
        ))
    }
}

#[async_trait]
impl<D: ConnectorDescriptor> DynDescriptor for DescriptorHandle<D> {
    fn id(&self) -> &str {
        self.0.id()
    }

    fn display_name(&self) -> &str {
        self.0.display_name()
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.0.capabilities()
    }

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition> {
        self.0.target_definitions()
    }

    fn default_configuration(&self) -> Result<Value, RegistryError> {
        serde_json::to_value(self.0.default_config()).map_err(|e| {
            RegistryError::Configuration {
                connector_id: self.0.id().to_string(),
                message: format!("default settings cannot be serialized: {}", e),
            }
        })
    }

    async fn instantiate(
        &self,
        settings: Option<Value>,
        context: SecretContext,
        cache: Option<CacheHandle>,
    ) -> Result<Box<dyn DynConnector>, RegistryError> {
        let span = connector_span!(self.0.id(), context.tenant_user_id());
        let connector = self
            .instantiate_typed(settings, context, cache)
            .instrument(span)
            .await;
        if let Err(err) = &connector {
            debug!(kind = %err.kind(), error = %err, "Connector not instantiated");
        }
        Ok(Box::new(connector?))
    }
}

/// Erases `descriptor` for registration.
pub fn into_dyn<D: ConnectorDescriptor>(descriptor: D) -> Arc<dyn DynDescriptor> {
    Arc::new(DescriptorHandle::new(descriptor))
}
