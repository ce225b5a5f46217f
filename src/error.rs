//! Error types for the cache and lock layers
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the store client, cache layer and lock manager.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connectivity or timeout failure talking to the store
    #[error("Transport error: {0}")]
    Transport(String),

    /// Missing or invalid store configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Cached payload could not be encoded or decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CacheError {
    /// Returns true for failures caused by the store being unreachable.
    pub fn is_transport(&self) -> bool {
        matches!(self, CacheError::Transport(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Decode(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CacheError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            CacheError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CacheError::Transport(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            CacheError::Configuration(msg) | CacheError::Decode(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache and lock layers.
pub type Result<T> = std::result::Result<T, CacheError>;
