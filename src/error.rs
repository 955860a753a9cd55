//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror. Nothing here is meant to
//! reach an end user of a wrapped endpoint: the cache layer converts these into
//! misses or no-ops. Only the admin API and the CLI surface them.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the caching layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection to the store failed or a command errored
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store command exceeded the operation timeout
    #[error("Store command timed out after {0}ms")]
    Timeout(u64),

    /// Value could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Serialized value exceeds the namespace size cap
    #[error("Value of {size} bytes exceeds the {limit} byte cap of namespace '{namespace}'")]
    ValueTooLarge {
        namespace: String,
        size: usize,
        limit: usize,
    },

    /// Unknown namespace or invalid configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A cursor sweep stopped before the cursor returned to zero
    #[error("Scan aborted at cursor {cursor} after {completed} keys: {reason}")]
    PartialScan {
        cursor: u64,
        completed: usize,
        reason: String,
    },

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// True for errors caused by the remote store rather than by the caller.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            CacheError::StoreUnavailable(_) | CacheError::Timeout(_) | CacheError::PartialScan { .. }
        )
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) | CacheError::Configuration(_) => StatusCode::BAD_REQUEST,
            CacheError::ValueTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CacheError::StoreUnavailable(_)
            | CacheError::Timeout(_)
            | CacheError::PartialScan { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Serialization(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CacheError>;
