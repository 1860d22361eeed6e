//! SIEM connectors.

pub mod elastic;

pub use elastic::{ElasticConfig, ElasticDescriptor, ElasticTarget};
