//! Cache Layer Module
//!
//! Fail-open get/insert on top of a [`KeyValueStore`]. Store outages and
//! undecodable payloads read as misses; failed writes return `false`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, StatsRecorder};
use crate::config::{Config, DEFAULT_JITTER_MAX_SECS};
use crate::store::{KeyValueStore, MAX_TTL};

// == Cache ==
/// Cache handle. Cheap to clone; clones share the store and counters.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    jitter_max: Duration,
    stats: Arc<StatsRecorder>,
}

impl Cache {
    // == Constructor ==
    /// Creates a cache over `store` with the reference jitter bound.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            jitter_max: Duration::from_secs(DEFAULT_JITTER_MAX_SECS),
            stats: Arc::new(StatsRecorder::new()),
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self::new(store).with_jitter_max(config.jitter_max())
    }

    /// Sets the upper bound of the random delay added to deadline inserts.
    pub fn with_jitter_max(mut self, jitter_max: Duration) -> Self {
        self.jitter_max = jitter_max;
        self
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn jitter_max(&self) -> Duration {
        self.jitter_max
    }

    // == Get ==
    /// Reads an untyped value.
    pub async fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        self.get::<serde_json::Value>(key).await
    }

    /// Reads and decodes a value.
    ///
    /// Returns `None` when the key is absent, the store is unreachable, or
    /// the payload does not decode as `T`. A hit on a sliding entry re-arms
    /// its TTL before returning.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "cache miss");
                self.stats.record_miss();
                return None;
            }
            Err(err) => {
                warn!(key, error = %err, "cache read failed, treating as miss");
                self.stats.record_miss();
                return None;
            }
        };

        let entry = match CacheEntry::<T>::decode(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key, error = %err, "cached payload did not decode, treating as miss");
                self.stats.record_decode_failure();
                return None;
            }
        };

        if let Some(ttl) = entry.rearm_ttl() {
            if let Err(err) = self.store.expire(key, ttl).await {
                warn!(key, error = %err, "failed to re-arm sliding expiry");
            }
        }

        debug!(key, "cache hit");
        self.stats.record_hit();
        Some(entry.value)
    }

    /// Reads a value, falling back to `T::default()` on a miss.
    pub async fn get_or_default<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default + Send,
    {
        self.get(key).await.unwrap_or_default()
    }

    // == Insert ==
    /// Stores a value without expiration.
    pub async fn insert<T>(&self, key: &str, value: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        self.write(key, &CacheEntry::persistent(value), None).await
    }

    /// Stores a value that expires `ttl_secs` after the last read.
    ///
    /// A zero TTL or one above [`MAX_TTL`] is rejected and nothing is written.
    pub async fn insert_with_ttl<T>(&self, key: &str, value: &T, ttl_secs: u64) -> bool
    where
        T: Serialize + ?Sized,
    {
        if ttl_secs == 0 {
            warn!(key, "refusing to cache with a zero TTL");
            return false;
        }
        if ttl_secs > MAX_TTL.as_secs() {
            warn!(key, ttl_secs, "refusing to cache with an out of range TTL");
            return false;
        }
        let ttl = Duration::from_secs(ttl_secs);
        self.write(key, &CacheEntry::sliding(value, ttl_secs), Some(ttl))
            .await
    }

    /// Stores a value that expires at `deadline` plus a random jitter in
    /// `[0, jitter_max]`, so keys sharing a deadline do not all expire at once.
    ///
    /// Returns `false` without writing when the jittered deadline has
    /// already passed or lies further out than [`MAX_TTL`].
    pub async fn insert_until<T>(&self, key: &str, value: &T, deadline: DateTime<Utc>) -> bool
    where
        T: Serialize + ?Sized,
    {
        let jitter = random_jitter(self.jitter_max);
        let Some(ttl) = ttl_until(deadline, Utc::now(), jitter) else {
            warn!(key, %deadline, "deadline already passed, not caching");
            return false;
        };
        if ttl > MAX_TTL {
            warn!(key, %deadline, "deadline out of range, not caching");
            return false;
        }
        debug!(key, ttl_ms = ttl.as_millis() as u64, "caching until jittered deadline");
        self.write(key, &CacheEntry::until(value, ttl.as_secs()), Some(ttl))
            .await
    }

    async fn write<T>(&self, key: &str, entry: &CacheEntry<&T>, ttl: Option<Duration>) -> bool
    where
        T: Serialize + ?Sized,
    {
        let raw = match entry.encode() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, error = %err, "failed to encode cache entry");
                self.stats.record_write_failure();
                return false;
            }
        };

        match self.store.set(key, &raw, ttl).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "cache write failed");
                self.stats.record_write_failure();
                false
            }
        }
    }

    // == Remove ==
    /// Deletes a key. Returns `false` only when the store could not be reached.
    pub async fn remove(&self, key: &str) -> bool {
        match self.store.delete(key).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "cache delete failed");
                self.stats.record_write_failure();
                false
            }
        }
    }

    // == Exists ==
    /// Checks for a key. An unreachable store reads as absent.
    pub async fn exists(&self, key: &str) -> bool {
        match self.store.exists(key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key, error = %err, "cache exists probe failed");
                false
            }
        }
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

/// Uniform random delay in `[0, max]` at millisecond resolution.
fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Time left from `now` until `deadline + jitter`, `None` if not positive.
fn ttl_until(deadline: DateTime<Utc>, now: DateTime<Utc>, jitter: Duration) -> Option<Duration> {
    let jitter = chrono::Duration::from_std(jitter).ok()?;
    let ttl = (deadline.checked_add_signed(jitter)? - now).to_std().ok()?;
    (!ttl.is_zero()).then_some(ttl)
}
