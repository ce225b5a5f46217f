//! Store Client Module
//!
//! Atomic key-value primitives shared by the cache layer and the lock manager.
//! Every primitive is a remote call that may fail with
//! [`CacheError::Transport`](crate::error::CacheError::Transport); callers
//! decide whether to swallow it.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, Result};

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Longest native expiry a backend accepts, about a century.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Rejects expiries the backends cannot represent.
pub(crate) fn check_ttl(ttl: Duration) -> Result<()> {
    if ttl > MAX_TTL {
        return Err(CacheError::InvalidRequest(format!(
            "TTL of {}s exceeds the maximum of {}s",
            ttl.as_secs(),
            MAX_TTL.as_secs()
        )));
    }
    Ok(())
}

// == Key Value Store ==
/// Primitives consumed from the remote key-value store.
///
/// Implementations must be safe for concurrent use by many callers.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logs, e.g. "redis" or "memory".
    fn name(&self) -> &'static str;

    /// Writes `value` under `key` only if the key is absent, setting its
    /// expiry in the same atomic operation. Returns true when written.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Reads the raw value, `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Unconditionally writes `value`, with a native expiry when `ttl` is given.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Deletes the key. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Re-arms the native expiry of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Deletes the key only while it still holds `expected`.
    /// Returns true when the key was deleted.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Health check round trip.
    async fn ping(&self) -> Result<()>;
}
