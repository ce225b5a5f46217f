//! Request DTOs for the demo service API
//!
//! Defines the structure of incoming HTTP request bodies.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::store::MAX_TTL;

/// Maximum accepted key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl`: Optional sliding TTL in seconds
/// - `expire_at`: Optional absolute deadline (RFC 3339), jittered on write
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: serde_json::Value,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Optional absolute expiration instant
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if let Some(msg) = validate_key(&self.key) {
            return Some(msg);
        }
        if self.ttl.is_some() && self.expire_at.is_some() {
            return Some("Specify either ttl or expire_at, not both".to_string());
        }
        if self.ttl == Some(0) {
            return Some("ttl must be greater than zero".to_string());
        }
        if self.ttl.is_some_and(|ttl| ttl > MAX_TTL.as_secs()) {
            return Some(format!("ttl cannot exceed {} seconds", MAX_TTL.as_secs()));
        }
        let too_far = self
            .expire_at
            .is_some_and(|at| (at - Utc::now()).to_std().is_ok_and(|ttl| ttl > MAX_TTL));
        if too_far {
            return Some(format!(
                "expire_at cannot be more than {} seconds ahead",
                MAX_TTL.as_secs()
            ));
        }
        None
    }
}

/// Validates a cache key or lock name taken from a request.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}
