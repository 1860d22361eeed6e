//! The compile-time connector catalog.
//!
//! Adding a connector means adding a row here; the registry never discovers
//! descriptors any other way.

use std::sync::Arc;

use sb_core::{
    into_dyn, CatalogEntry, ConfigError, ConfigurationStore, ConnectorRegistry, ConnectorResult,
    DynDescriptor, HubConfig, InitializationSummary, SecretDecryptor,
};
use tracing::info;

use crate::collaboration::slack::{SlackDescriptor, SLACK_ID};
use crate::siem::elastic::{ElasticDescriptor, ELASTIC_ID};
use crate::threat_intel::virustotal::{VirusTotalDescriptor, VIRUSTOTAL_ID};
use crate::ticketing::jira::{JiraDescriptor, JIRA_ID};

fn jira() -> ConnectorResult<Arc<dyn DynDescriptor>> {
    Ok(into_dyn(JiraDescriptor::new()))
}

fn elastic() -> ConnectorResult<Arc<dyn DynDescriptor>> {
    Ok(into_dyn(ElasticDescriptor::new()))
}

fn slack() -> ConnectorResult<Arc<dyn DynDescriptor>> {
    Ok(into_dyn(SlackDescriptor::new()))
}

fn virustotal() -> ConnectorResult<Arc<dyn DynDescriptor>> {
    Ok(into_dyn(VirusTotalDescriptor::new()))
}

/// Every connector shipped with this crate, in registration order.
pub static CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: JIRA_ID,
        factory: jira,
    },
    CatalogEntry {
        id: ELASTIC_ID,
        factory: elastic,
    },
    CatalogEntry {
        id: SLACK_ID,
        factory: slack,
    },
    CatalogEntry {
        id: VIRUSTOTAL_ID,
        factory: virustotal,
    },
];

/// Builds a registry from hub configuration.
///
/// Seeds `store` with the configured connector settings, drops disabled
/// catalog rows, and initializes the registry with the configured cache.
pub async fn bootstrap(
    config: &HubConfig,
    store: Arc<dyn ConfigurationStore>,
    decryptor: Arc<dyn SecretDecryptor>,
) -> Result<(ConnectorRegistry, InitializationSummary), ConfigError> {
    let seeded = config.seed_store(store.as_ref()).await?;
    info!(documents = seeded, "Seeded connector configuration");

    let catalog = config.filter_catalog(CATALOG);
    let mut registry = ConnectorRegistry::new(store, decryptor);
    let summary = registry.initialize(&catalog, config.build_cache()).await;
    Ok((registry, summary))
}
