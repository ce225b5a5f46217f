//! Cache Lock - cache-aside layer and distributed lock over a key-value store
//!
//! Provides fail-open caching with sliding and jittered expiry, a polling
//! distributed lock with fencing tokens, and a stampede-resistant fill
//! helper that ties the two together.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod models;
pub mod store;

pub use api::AppState;
pub use cache::{Cache, CacheAside, CacheEntry, CacheStats};
pub use config::Config;
pub use error::{CacheError, Result};
pub use lock::{LocalLockTable, LockLease, LockManager, LockOptions};
pub use store::{KeyValueStore, MemoryStore, RedisStore};
