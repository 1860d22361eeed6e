//! Live connector instances, built per request by the registry.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::alert::{Alert, AlertFilter, DataDictionary};
use crate::cache::CacheHandle;
use crate::descriptor::{Capability, ConnectorDescriptor};
use crate::error::{ConnectorError, RegistryError};
use crate::target::{QueryTargetOptions, ScopeTargetDefinition, TargetError, TargetSelection};
use crate::tool::Tool;

/// A connector bound to one tenant's configuration and secrets.
///
/// Instances are never reused across requests; drop them when done.
pub struct Connector<D: ConnectorDescriptor> {
    descriptor: Arc<D>,
    config: D::Config,
    secrets: D::Secrets,
    cache: Option<CacheHandle>,
    tenant_user_id: String,
}

impl<D: ConnectorDescriptor> Connector<D> {
    pub(crate) fn new(
        descriptor: Arc<D>,
        config: D::Config,
        secrets: D::Secrets,
        cache: Option<CacheHandle>,
        tenant_user_id: String,
    ) -> Self {
        Self {
            descriptor,
            config,
            secrets,
            cache,
            tenant_user_id,
        }
    }

    pub fn id(&self) -> &str {
        self.descriptor.id()
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub fn config(&self) -> &D::Config {
        &self.config
    }

    pub fn tenant_user_id(&self) -> &str {
        &self.tenant_user_id
    }

    fn vendor_error(&self, source: ConnectorError) -> RegistryError {
        RegistryError::connector(self.id(), source)
    }

    pub async fn check_connection(&self) -> bool {
        self.descriptor
            .check_connection(&self.config, &self.secrets)
            .await
    }

    /// Queries live target options.
    ///
    /// Fails with `InvalidQueryTargetType` if the vendor returned a selector
    /// for an axis that has no definition.
    pub async fn get_query_target_options(&self) -> Result<QueryTargetOptions, RegistryError> {
        let options = self
            .descriptor
            .get_query_target_options(&self.config, &self.secrets)
            .await
            .map_err(|e| self.vendor_error(e))?;

        if let Some(selector) = options.undeclared_selector() {
            return Err(RegistryError::InvalidQueryTargetType {
                connector_id: self.id().to_string(),
                target_type: selector.target_type.clone(),
            });
        }
        Ok(options)
    }

    /// Converts a generic selection into this connector's target type.
    pub fn target_from_selection(
        &self,
        selection: &TargetSelection,
    ) -> Result<D::Target, RegistryError> {
        selection
            .into_target(&self.descriptor.target_definitions())
            .map_err(|e| match e {
                TargetError::UnknownType(target_type) => RegistryError::InvalidQueryTargetType {
                    connector_id: self.id().to_string(),
                    target_type,
                },
                other => RegistryError::InvalidTarget {
                    connector_id: self.id().to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Tools scoped to `target`.
    pub fn get_tools(&self, target: D::Target) -> Result<Vec<Tool>, RegistryError> {
        self.descriptor
            .build_tools(&self.config, target, &self.secrets, self.cache.clone())
            .map_err(|e| self.vendor_error(e))
    }

    pub async fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, RegistryError> {
        self.descriptor
            .get_alerts(&self.config, &self.secrets, filter)
            .await
            .map_err(|e| self.vendor_error(e))
    }

    pub async fn merge_data_dictionary(
        &self,
        dictionary: &mut DataDictionary,
    ) -> Result<usize, RegistryError> {
        self.descriptor
            .merge_data_dictionary(&self.config, &self.secrets, dictionary)
            .await
            .map_err(|e| self.vendor_error(e))
    }
}

impl<D: ConnectorDescriptor> fmt::Debug for Connector<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id())
            .field("tenant_user_id", &self.tenant_user_id)
            .finish_non_exhaustive()
    }
}

/// Object-safe connector surface used for heterogeneous collections.
#[async_trait]
pub trait DynConnector: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability>;

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition>;

    fn tenant_user_id(&self) -> &str;

    async fn check_connection(&self) -> bool;

    async fn get_query_target_options(&self) -> Result<QueryTargetOptions, RegistryError>;

    /// Tools for a generic selection; see [`TargetSelection::into_target`].
    fn get_tools_for(&self, selection: &TargetSelection) -> Result<Vec<Tool>, RegistryError>;

    async fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, RegistryError>;

    async fn merge_data_dictionary(
        &self,
        dictionary: &mut DataDictionary,
    ) -> Result<usize, RegistryError>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl dyn DynConnector {
    /// Borrows the concrete instance if this connector was built by `D`.
    pub fn downcast_ref<D: ConnectorDescriptor>(&self) -> Option<&Connector<D>> {
        self.as_any().downcast_ref::<Connector<D>>()
    }
}

impl fmt::Debug for dyn DynConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynConnector")
            .field("id", &self.id())
            .field("tenant_user_id", &self.tenant_user_id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<D: ConnectorDescriptor> DynConnector for Connector<D> {
    fn id(&self) -> &str {
        self.descriptor.id()
    }

    fn display_name(&self) -> &str {
        self.descriptor.display_name()
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.descriptor.capabilities()
    }

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition> {
        self.descriptor.target_definitions()
    }

    fn tenant_user_id(&self) -> &str {
        &self.tenant_user_id
    }

    async fn check_connection(&self) -> bool {
        Connector::check_connection(self).await
    }

    async fn get_query_target_options(&self) -> Result<QueryTargetOptions, RegistryError> {
        Connector::get_query_target_options(self).await
    }

    fn get_tools_for(&self, selection: &TargetSelection) -> Result<Vec<Tool>, RegistryError> {
        let target = self.target_from_selection(selection)?;
        self.get_tools(target)
    }

    async fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, RegistryError> {
        Connector::get_alerts(self, filter).await
    }

    async fn merge_data_dictionary(
        &self,
        dictionary: &mut DataDictionary,
    ) -> Result<usize, RegistryError> {
        Connector::merge_data_dictionary(self, dictionary).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
