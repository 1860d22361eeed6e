//! Threat intelligence connectors.

pub mod virustotal;

pub use virustotal::{IndicatorReport, ThreatVerdict, VirusTotalConfig, VirusTotalDescriptor};
