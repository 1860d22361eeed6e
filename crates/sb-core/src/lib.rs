//! # sb-core
//!
//! Connector registry and tool contract for Switchboard.
//!
//! This crate provides the connector descriptor abstraction, the per-tenant
//! connector lifecycle, the typed tool contract, the query target model, and
//! the retry policy shared by every vendor connector.

pub mod alert;
pub mod cache;
pub mod config;
pub mod connector;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod retry;
pub mod secure_string;
pub mod store;
pub mod target;
pub mod testing;
pub mod tool;

pub use alert::{Alert, AlertFilter, DataDictionary, DataDictionaryEntry};
pub use cache::{CacheError, CacheHandle, MokaSharedCache, SharedCache};
pub use config::{CacheSettings, ConfigError, HubConfig};
pub use connector::{Connector, DynConnector};
pub use crypto::{AesGcmSecretDecryptor, CryptoError, PlaintextDecryptor, SecretDecryptor};
pub use descriptor::{
    into_dyn, Capability, ConnectorDescriptor, DescriptorHandle, DynDescriptor, SecretContext,
};
pub use error::{
    ConnectorError, ConnectorResult, FieldIssue, RegistryError, RegistryErrorKind, ToolError,
};
pub use registry::{
    CatalogEntry, ConnectorRegistry, DescriptorFactory, InitializationSummary, RegistryEntry,
    SkippedConnector,
};
pub use retry::{Backoff, RetryPolicy};
pub use secure_string::SecureString;
pub use store::{ConfigurationDocument, ConfigurationStore, InMemoryConfigurationStore, StoreError};
pub use target::{
    NoTarget, QueryTargetOptions, ScopeTargetDefinition, ScopeTargetSelector, Target,
    TargetError, TargetSelection,
};
pub use tool::{
    ExtraFields, FieldKind, FieldSpec, FinalToolOutput, InputSchema, IntoToolResult,
    TabularResult, Tool, ToolInput, ToolResult,
};
