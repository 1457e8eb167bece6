//! Error types for directory manager operations.
//!
//! This module provides the error hierarchy shared by the connection pool,
//! the identifier allocator, and the directory operations layer, including
//! error codes for programmatic handling and structured error responses.

use serde::Serialize;
use thiserror::Error;

/// Main error type for directory manager operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The directory transport could not be established
    #[error("Directory connection failed: {0}")]
    Connect(String),

    /// The directory rejected a bind
    #[error("Directory bind rejected: {0}")]
    Auth(String),

    /// The connection pool was exhausted within the deadline
    #[error("Connection pool exhausted: {0}")]
    PoolTimeout(String),

    /// The connection pool has been shut down
    #[error("Connection pool is closed")]
    PoolClosed,

    /// The numeric identifier space overflowed
    #[error("Identifier space exhausted: {0}")]
    AllocatorExhausted(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Directory entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Directory entry already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Input validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Directory protocol error
    #[error("Directory protocol error: {0}")]
    Protocol(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized result type for directory manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for serialization.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Optional request ID for tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error detail structure.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECT_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::PoolTimeout(_) => "POOL_TIMEOUT",
            Self::PoolClosed => "POOL_CLOSED",
            Self::AllocatorExhausted(_) => "ALLOCATOR_EXHAUSTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the caller may reasonably retry the operation.
    ///
    /// Pool exhaustion and transport failures are transient; everything else
    /// requires the caller to change something first.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolTimeout(_) | Self::Timeout(_) | Self::Connect(_)
        )
    }

    /// Returns true if this error should be logged as a serious error.
    ///
    /// Pool exhaustion is expected backpressure and is deliberately excluded.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::Internal(_)
                | Self::Config(_)
                | Self::Protocol(_)
                | Self::Auth(_)
                | Self::AllocatorExhausted(_)
        )
    }

    /// Converts the error into an [`ErrorResponse`].
    #[must_use]
    pub fn into_error_response(self) -> ErrorResponse {
        self.into_error_response_with_id(None)
    }

    /// Converts the error into an [`ErrorResponse`] with a request ID.
    #[must_use]
    pub fn into_error_response_with_id(self, request_id: Option<String>) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
            request_id,
        }
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}
