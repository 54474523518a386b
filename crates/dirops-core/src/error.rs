//! Error types for directory operations.
//!
//! Every failure the engine can surface is a variant of [`Error`]. Each variant carries enough
//! structure (a stable code plus a message) for a front-end to render it and to decide whether
//! retrying makes sense.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why establishing a directory session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectFailure {
    /// The controller rejected the bind credentials.
    AuthenticationRejected,
    /// The controller could not be reached.
    Unreachable,
    /// The bind did not complete in time.
    TimedOut,
    /// Any other bind failure.
    Other,
}

impl ConnectFailure {
    /// Short, human-readable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationRejected => "authentication failed",
            Self::Unreachable => "server unreachable",
            Self::TimedOut => "timed out",
            Self::Other => "connection failed",
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a membership modification was refused by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifyFailure {
    /// The bound identity lacks the rights to modify the group.
    PermissionDenied,
    /// The group or the member entry does not exist.
    NoSuchObject,
    /// The controller could not be reached while modifying.
    Unreachable,
    /// The member value is already present on the group.
    AlreadyMember,
    /// Any other modify failure.
    Other,
}

impl ModifyFailure {
    /// Short, human-readable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission denied",
            Self::NoSuchObject => "object not found",
            Self::Unreachable => "server unreachable",
            Self::AlreadyMember => "already a member",
            Self::Other => "modify failed",
        }
    }
}

impl fmt::Display for ModifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Bind or controller failure
    #[error("Connection error ({reason}): {message}")]
    Connection {
        /// Failure classification
        reason: ConnectFailure,
        /// Message reported by the adapter
        message: String,
    },

    /// Overlapping connect attempts
    #[error("Concurrent operation rejected: {0}")]
    ConcurrentOperation(String),

    /// Operation attempted without a connected session
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Malformed search input
    #[error("Invalid query: {0}")]
    Query(String),

    /// The audit sink did not accept a record
    #[error("Audit sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Membership modification refused by the directory
    #[error("Modify failed ({reason}): {message}")]
    Modify {
        /// Failure classification
        reason: ModifyFailure,
        /// Message reported by the directory
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed distinguished name
    #[error("Invalid distinguished name: {0}")]
    InvalidDn(String),

    /// A group's simple name could not be derived without guessing
    #[error("Ambiguous group name: {0}")]
    AmbiguousGroupName(String),

    /// Directory operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Other directory protocol failure
    #[error("Directory error during {operation}: {message}")]
    Directory {
        /// Operation that failed
        operation: String,
        /// Error message
        message: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for serialization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Optional correlation ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error detail structure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Whether a caller may reasonably retry
    pub retryable: bool,
}

impl Error {
    /// Builds a connection error.
    #[must_use]
    pub fn connection(reason: ConnectFailure, message: impl Into<String>) -> Self {
        Self::Connection {
            reason,
            message: message.into(),
        }
    }

    /// Builds a modify error.
    #[must_use]
    pub fn modify(reason: ModifyFailure, message: impl Into<String>) -> Self {
        Self::Modify {
            reason,
            message: message.into(),
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::ConcurrentOperation(_) => "CONCURRENT_OPERATION",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::Query(_) => "QUERY_ERROR",
            Self::SinkUnavailable(_) => "SINK_UNAVAILABLE",
            Self::Modify { .. } => "MODIFY_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidDn(_) => "INVALID_DN",
            Self::AmbiguousGroupName(_) => "AMBIGUOUS_GROUP_NAME",
            Self::Timeout(_) => "TIMEOUT",
            Self::Directory { .. } => "DIRECTORY_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true when the caller may retry by issuing the operation again.
    ///
    /// Only session establishment is retryable; membership changes are never retried
    /// blindly because an ambiguous failure may already have been applied.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout(_))
    }

    /// Converts the error into an `ErrorResponse`.
    #[must_use]
    pub fn into_error_response(self) -> ErrorResponse {
        self.into_error_response_with_id(None)
    }

    /// Converts the error into an `ErrorResponse` with a correlation ID.
    #[must_use]
    pub fn into_error_response_with_id(self, request_id: Option<String>) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                retryable: self.is_retryable(),
            },
            request_id,
        }
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid controller URL: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(err: uuid::Error) -> Self {
        Self::InternalError(format!("invalid identifier: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::connection(ConnectFailure::Unreachable, "dc1").error_code(),
            "CONNECTION_ERROR"
        );
        assert_eq!(
            Error::ConcurrentOperation("connect".to_string()).error_code(),
            "CONCURRENT_OPERATION"
        );
        assert_eq!(
            Error::NotConnected("search".to_string()).error_code(),
            "NOT_CONNECTED"
        );
        assert_eq!(Error::Query("(".to_string()).error_code(), "QUERY_ERROR");
        assert_eq!(
            Error::SinkUnavailable("disk full".to_string()).error_code(),
            "SINK_UNAVAILABLE"
        );
        assert_eq!(
            Error::modify(ModifyFailure::PermissionDenied, "denied").error_code(),
            "MODIFY_ERROR"
        );
        assert_eq!(
            Error::AmbiguousGroupName("ou=x".to_string()).error_code(),
            "AMBIGUOUS_GROUP_NAME"
        );
        assert_eq!(
            Error::Directory {
                operation: "search".to_string(),
                message: "busy".to_string()
            }
            .error_code(),
            "DIRECTORY_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection(ConnectFailure::AuthenticationRejected, "invalid credentials");
        assert_eq!(
            err.to_string(),
            "Connection error (authentication failed): invalid credentials"
        );

        let err = Error::modify(ModifyFailure::NoSuchObject, "no such group");
        assert_eq!(
            err.to_string(),
            "Modify failed (object not found): no such group"
        );
    }

    #[test]
    fn test_retryable_only_for_session_errors() {
        assert!(Error::connection(ConnectFailure::TimedOut, "slow").is_retryable());
        assert!(Error::Timeout("bind".to_string()).is_retryable());
        assert!(!Error::modify(ModifyFailure::Unreachable, "gone").is_retryable());
        assert!(!Error::Query("bad".to_string()).is_retryable());
        assert!(!Error::SinkUnavailable("closed".to_string()).is_retryable());
    }

    #[test]
    fn test_into_error_response() {
        let err = Error::NotConnected("connect first".to_string());
        let response = err.clone().into_error_response();

        assert_eq!(response.error.code, "NOT_CONNECTED");
        assert_eq!(response.error.message, "Not connected: connect first");
        assert!(!response.error.retryable);
        assert!(response.request_id.is_none());

        let response_with_id = err.into_error_response_with_id(Some("op-1".to_string()));
        assert_eq!(response_with_id.request_id, Some("op-1".to_string()));
    }

    #[test]
    fn test_modify_errors_are_never_retryable() {
        for reason in [
            ModifyFailure::PermissionDenied,
            ModifyFailure::NoSuchObject,
            ModifyFailure::Unreachable,
            ModifyFailure::Other,
        ] {
            let err = Error::modify(reason, "directory modify timed out");
            assert!(!err.is_retryable());
            assert!(!err.into_error_response().error.retryable);
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let converted: Error = err.into();
        assert!(matches!(converted, Error::ConfigError(_)));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = Error::modify(ModifyFailure::PermissionDenied, "insufficient rights")
            .into_error_response();

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("MODIFY_ERROR"));
        assert!(json.contains("insufficient rights"));
        assert!(!json.contains("request_id"));
    }
}
