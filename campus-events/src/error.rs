//! Error types, failure taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes shared by every tier of the pipeline
///
/// Each [`Error`] maps onto exactly one class, which decides how the
/// pipeline reacts: retry, discard, evict, or retain for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network failure or timeout on any tier; retried where a retry loop exists
    TransientIo,
    /// Malformed record; discarded and logged, never retried
    PermanentValidation,
    /// Full mailbox or backlog; resolved by eviction or rejection, never by blocking
    ResourceExhaustion,
    /// Digest recomputation disagrees with the stored digest
    IntegrityMismatch,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientIo => write!(f, "transient_io"),
            Self::PermanentValidation => write!(f, "permanent_validation"),
            Self::ResourceExhaustion => write!(f, "resource_exhaustion"),
            Self::IntegrityMismatch => write!(f, "integrity_mismatch"),
        }
    }
}

/// Main error type for the pipeline
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hot cache could not be reached (refused, timed out, pool exhausted)
    #[error("Hot cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Persistent store operation failed
    #[error("Persistent store error: {0}")]
    Store(String),

    /// Cold storage operation failed
    #[error("Blob storage error: {0}")]
    Blob(String),

    /// Record or request failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stored digest does not match the recomputed digest
    #[error("Integrity mismatch for record {record_id}: stored {stored}, computed {computed}")]
    IntegrityMismatch {
        /// Record whose digest failed
        record_id: uuid::Uuid,
        /// Digest carried by the record
        stored: String,
        /// Digest recomputed from the record's fields
        computed: String,
    },

    /// Task queue backlog is at capacity
    #[error("Task queue '{0}' is full")]
    QueueFull(String),

    /// Task queue no longer accepts work
    #[error("Task queue '{0}' is closed")]
    QueueClosed(String),

    /// Redis error
    #[cfg(feature = "cache")]
    #[error("Redis error: {0}")]
    Redis(Box<redis::RedisError>),

    /// PostgreSQL error
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(Box<sqlx::Error>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify the error into the pipeline's failure taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Serialization(_) | Error::Validation(_) | Error::Config(_) => {
                ErrorClass::PermanentValidation
            }
            Error::IntegrityMismatch { .. } => ErrorClass::IntegrityMismatch,
            Error::QueueFull(_) | Error::QueueClosed(_) => ErrorClass::ResourceExhaustion,
            #[cfg(feature = "database")]
            Error::Database(e) => match e.as_ref() {
                sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
                    ErrorClass::PermanentValidation
                }
                _ => ErrorClass::TransientIo,
            },
            _ => ErrorClass::TransientIo,
        }
    }

    /// Whether a retry loop should attempt the operation again
    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::TransientIo
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(feature = "cache")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Redis(Box::new(err))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(Box::new(err))
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create error response with a code
    pub fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::QueueFull(_) | Error::QueueClosed(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BACKPRESSURE",
                "Event pipeline is saturated".to_string(),
            ),
            other => {
                tracing::error!(class = %other.class(), "Pipeline error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Event pipeline failure".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse::with_code(status, code, message))).into_response()
    }
}
