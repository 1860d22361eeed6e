//! # sb-observability
//!
//! Logging infrastructure for Switchboard.
//!
//! This crate installs the structured `tracing` subscriber and provides the
//! span macros used by the registry and the tool execution pipeline.

pub mod logging;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
