//! Logging infrastructure for Switchboard.
//!
//! This module provides structured logging using the tracing ecosystem.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Crates whose events are enabled by the default filter.
const FILTERED_CRATES: &[&str] = &["sb_core", "sb_connectors", "sb_observability"];

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(with = "level_format")]
    pub level: Level,
    /// Whether to use JSON format.
    pub json_format: bool,
    /// Whether to include span events.
    pub include_spans: bool,
    /// Whether to include file/line info.
    pub include_location: bool,
    /// Whether to include thread IDs.
    pub include_thread_ids: bool,
    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: true,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Creates a development configuration with more verbose output.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            json_format: false,
            include_spans: true,
            include_location: true,
            include_thread_ids: true,
            include_target: true,
        }
    }

    /// Creates a production configuration with JSON output.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json_format: true,
            include_spans: false,
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }

    /// Builds the default directive string, e.g. `sb_core=info,sb_connectors=info`.
    pub fn default_directives(&self) -> String {
        FILTERED_CRATES
            .iter()
            .map(|krate| format!("{}={}", krate, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Initializes the logging system with default configuration.
pub fn init_logging() -> bool {
    init_logging_with_config(LoggingConfig::default())
}

/// Initializes the logging system with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Returns `false` when
/// a global subscriber was already installed.
pub fn init_logging_with_config(config: LoggingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    }
}

/// Creates a span for work done on behalf of one connector and tenant.
#[macro_export]
macro_rules! connector_span {
    ($connector_id:expr) => {
        tracing::info_span!("connector", connector_id = %$connector_id)
    };
    ($connector_id:expr, $tenant:expr) => {
        tracing::info_span!("connector", connector_id = %$connector_id, tenant = %$tenant)
    };
}

/// Creates a span for a single tool execution.
#[macro_export]
macro_rules! tool_span {
    ($connector_id:expr, $tool_name:expr) => {
        tracing::info_span!("tool", connector_id = %$connector_id, tool = %$tool_name)
    };
}

mod level_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&level.to_string().to_lowercase())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Level>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.json_format);
    }

    #[test]
    fn test_production_config() {
        let config = LoggingConfig::production();
        assert_eq!(config.level, Level::INFO);
        assert!(config.json_format);
    }

    #[test]
    fn test_development_config() {
        let config = LoggingConfig::development();
        assert_eq!(config.level, Level::DEBUG);
        assert!(!config.json_format);
    }

    #[test]
    fn test_default_directives() {
        let config = LoggingConfig::development();
        assert_eq!(
            config.default_directives(),
            "sb_core=DEBUG,sb_connectors=DEBUG,sb_observability=DEBUG"
        );
    }

    #[test]
    fn test_level_round_trips_through_json() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{"level": "warn", "json_format": true}"#).unwrap();
        assert_eq!(config.level, Level::WARN);
        assert!(config.json_format);
        assert!(config.include_target);

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["level"], "warn");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let result: Result<LoggingConfig, _> = serde_json::from_str(r#"{"level": "loud"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let _ = init_logging_with_config(LoggingConfig::default());
        assert!(!init_logging_with_config(LoggingConfig::default()));
    }
}
