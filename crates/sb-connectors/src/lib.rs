//! # sb-connectors
//!
//! Vendor connectors for Switchboard: ticketing, SIEM, collaboration, and
//! threat intelligence.
//!
//! Every connector is a [`sb_core::ConnectorDescriptor`] listed in the static
//! [`CATALOG`]; [`bootstrap`] wires the catalog into a registry from hub
//! configuration.

pub mod cached;
pub mod catalog;
pub mod collaboration;
pub mod http;
pub mod siem;
pub mod threat_intel;
pub mod ticketing;

pub use catalog::{bootstrap, CATALOG};
pub use http::{AuthConfig, HttpClient, HttpSettings, RateLimitConfig, SharedRateLimiter};

pub use collaboration::{SlackConfig, SlackDescriptor};
pub use siem::{ElasticConfig, ElasticDescriptor};
pub use threat_intel::{VirusTotalConfig, VirusTotalDescriptor};
pub use ticketing::{JiraConfig, JiraDescriptor};
