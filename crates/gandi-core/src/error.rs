//! Error types for hosting API operations.
//!
//! Remote failures (transport problems, XML-RPC faults) and local contract
//! violations share one error type. Contract violations are always raised
//! before any request leaves the process. An operation that finishes in the
//! `ERROR` step is not an error: it is reported through [`crate::Step`].

use crate::types::EntityKind;
use thiserror::Error;

/// Main error type for hosting operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Hosting endpoint is unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Request timed out
    #[error("Timeout waiting for service: {0}")]
    Timeout(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (including rejected credentials)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The remote service answered with an XML-RPC fault
    #[error("Remote fault {code}: {message}")]
    Fault {
        /// Fault code reported by the service
        code: i64,
        /// Fault string reported by the service
        message: String,
    },

    /// Response could not be parsed
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A mandatory creation field was not supplied
    #[error("Missing mandatory key for {kind}: {field}")]
    MissingField {
        /// Kind being created
        kind: EntityKind,
        /// Missing field name
        field: String,
    },

    /// Attempt to change a field outside the kind's updatable set
    #[error("Attribute {field} of {kind} is not updatable")]
    NotUpdatable {
        /// Kind being updated
        kind: EntityKind,
        /// Offending field name
        field: String,
    },

    /// Operation not offered by this entity kind
    #[error("{kind} does not support {operation}")]
    Unsupported {
        /// Kind the operation was attempted on
        kind: EntityKind,
        /// Operation name
        operation: &'static str,
    },

    /// No relationship with that name exists on the entity
    #[error("{kind} has no relationship named {name}")]
    UnknownRelation {
        /// Kind of the entity
        kind: EntityKind,
        /// Requested relationship name
        name: String,
    },
}

/// Specialized result type for hosting operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::HttpError(_) => "HTTP_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Fault { .. } => "REMOTE_FAULT",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::MissingField { .. } => "MISSING_FIELD",
            Self::NotUpdatable { .. } => "NOT_UPDATABLE",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::UnknownRelation { .. } => "UNKNOWN_RELATION",
        }
    }

    /// Returns true for errors raised locally before any remote call.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. }
                | Self::NotUpdatable { .. }
                | Self::Unsupported { .. }
                | Self::UnknownRelation { .. }
        )
    }
}

// Conversions from external error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ServiceUnavailable(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<chrono::ParseError> for Error {
    fn from(err: chrono::ParseError) -> Self {
        Self::ParseError(err.to_string())
    }
}
