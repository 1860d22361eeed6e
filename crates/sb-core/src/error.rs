//! Error types shared by the registry, connectors, and tools.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a vendor call or its transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnectorError {
    /// HTTP status code this error stands for, if it came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ConnectorError::RateLimited(_) => Some(429),
            ConnectorError::AuthenticationFailed(_) => Some(401),
            ConnectorError::AuthorizationDenied(_) => Some(403),
            ConnectorError::NotFound(_) => Some(404),
            ConnectorError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-provided back-off hint carried by a rate-limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ConnectorError::RateLimited(secs) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Discriminant of a [`RegistryError`], used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryErrorKind {
    NotRegistered,
    NotAvailable,
    DuplicateRegistration,
    InvalidToken,
    InvalidQueryTargetType,
    InvalidTarget,
    Configuration,
    Connector,
}

impl fmt::Display for RegistryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistryErrorKind::NotRegistered => "not_registered",
            RegistryErrorKind::NotAvailable => "not_available",
            RegistryErrorKind::DuplicateRegistration => "duplicate_registration",
            RegistryErrorKind::InvalidToken => "invalid_token",
            RegistryErrorKind::InvalidQueryTargetType => "invalid_query_target_type",
            RegistryErrorKind::InvalidTarget => "invalid_target",
            RegistryErrorKind::Configuration => "configuration",
            RegistryErrorKind::Connector => "connector",
        };
        f.write_str(name)
    }
}

/// Errors raised by the connector registry and connector instances.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Connector '{connector_id}' is not registered")]
    NotRegistered { connector_id: String },

    #[error("Connector '{connector_id}' is not available: {reason}")]
    NotAvailable { connector_id: String, reason: String },

    #[error("Connector '{connector_id}' is already registered")]
    DuplicateRegistration { connector_id: String },

    #[error("Invalid token for connector '{connector_id}': {reason}")]
    InvalidToken { connector_id: String, reason: String },

    #[error("Connector '{connector_id}' has no query target type '{target_type}'")]
    InvalidQueryTargetType {
        connector_id: String,
        target_type: String,
    },

    #[error("Invalid target for connector '{connector_id}': {reason}")]
    InvalidTarget {
        connector_id: String,
        reason: String,
    },

    #[error("Configuration error for connector '{connector_id}': {message}")]
    Configuration {
        connector_id: String,
        message: String,
    },

    #[error("Connector '{connector_id}' failed: {source}")]
    Connector {
        connector_id: String,
        #[source]
        source: ConnectorError,
    },
}

impl RegistryError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> RegistryErrorKind {
        match self {
            RegistryError::NotRegistered { .. } => RegistryErrorKind::NotRegistered,
            RegistryError::NotAvailable { .. } => RegistryErrorKind::NotAvailable,
            RegistryError::DuplicateRegistration { .. } => {
                RegistryErrorKind::DuplicateRegistration
            }
            RegistryError::InvalidToken { .. } => RegistryErrorKind::InvalidToken,
            RegistryError::InvalidQueryTargetType { .. } => {
                RegistryErrorKind::InvalidQueryTargetType
            }
            RegistryError::InvalidTarget { .. } => RegistryErrorKind::InvalidTarget,
            RegistryError::Configuration { .. } => RegistryErrorKind::Configuration,
            RegistryError::Connector { .. } => RegistryErrorKind::Connector,
        }
    }

    /// Returns the id of the connector this error is about.
    pub fn connector_id(&self) -> &str {
        match self {
            RegistryError::NotRegistered { connector_id }
            | RegistryError::NotAvailable { connector_id, .. }
            | RegistryError::DuplicateRegistration { connector_id }
            | RegistryError::InvalidToken { connector_id, .. }
            | RegistryError::InvalidQueryTargetType { connector_id, .. }
            | RegistryError::InvalidTarget { connector_id, .. }
            | RegistryError::Configuration { connector_id, .. }
            | RegistryError::Connector { connector_id, .. } => connector_id,
        }
    }

    /// Returns true for the self-reported "not configured / not reachable" case.
    pub fn is_not_available(&self) -> bool {
        self.kind() == RegistryErrorKind::NotAvailable
    }

    pub(crate) fn connector(connector_id: &str, source: ConnectorError) -> Self {
        RegistryError::Connector {
            connector_id: connector_id.to_string(),
            source,
        }
    }
}

/// One field-level problem found while coercing tool input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable description of the problem.
    pub reason: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while defining or executing a tool.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid definition for tool '{tool}': {reason}")]
    InvalidDefinition { tool: String, reason: String },

    #[error("Invalid input for tool '{tool}': {}", join_issues(.issues))]
    InvalidInput {
        tool: String,
        issues: Vec<FieldIssue>,
    },

    #[error(transparent)]
    Execution(#[from] ConnectorError),

    #[error("Tool '{tool}' returned a result that cannot be serialized: {reason}")]
    InvalidOutput { tool: String, reason: String },
}

impl ToolError {
    /// Field-level issues when this is an input error.
    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            ToolError::InvalidInput { issues, .. } => issues,
            _ => &[],
        }
    }
}

impl From<ToolError> for ConnectorError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Execution(inner) => inner,
            other => ConnectorError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ConnectorError::RateLimited(5).status_code(), Some(429));
        assert_eq!(
            ConnectorError::AuthorizationDenied("Forbidden".into()).status_code(),
            Some(403)
        );
        assert_eq!(
            ConnectorError::Http {
                status: 503,
                message: "unavailable".into()
            }
            .status_code(),
            Some(503)
        );
        assert_eq!(ConnectorError::Timeout("slow".into()).status_code(), None);
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(
            ConnectorError::RateLimited(7).retry_after(),
            Some(Duration::from_secs(7))
        );
        assert_eq!(ConnectorError::NotFound("x".into()).retry_after(), None);
    }

    #[test]
    fn test_registry_error_kind_and_id() {
        let err = RegistryError::NotAvailable {
            connector_id: "jira".to_string(),
            reason: "connectivity check failed".to_string(),
        };
        assert_eq!(err.kind(), RegistryErrorKind::NotAvailable);
        assert_eq!(err.connector_id(), "jira");
        assert!(err.is_not_available());
        assert_eq!(err.kind().to_string(), "not_available");
    }

    #[test]
    fn test_invalid_input_message_lists_every_field() {
        let err = ToolError::InvalidInput {
            tool: "search".to_string(),
            issues: vec![
                FieldIssue::new("query", "field required"),
                FieldIssue::new("limit", "expected an integer"),
            ],
        };
        let message = err.to_string();
        assert_eq!(
            message,
            "Invalid input for tool 'search': query: field required; limit: expected an integer"
        );
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_execution_error_is_transparent() {
        let err = ToolError::from(ConnectorError::RateLimited(3));
        assert_eq!(err.to_string(), "Rate limited: retry after 3 seconds");
        assert_eq!(
            ConnectorError::from(err),
            ConnectorError::RateLimited(3)
        );
    }
}
