//! In-memory store backend.
//!
//! Mirrors the Redis primitives inside the process: per-entry expiry
//! deadlines checked on access, atomic set-if-absent under a single write
//! lock, and a switch that simulates the store becoming unreachable.
//! Expired entries are hidden on access and reclaimed by
//! [`MemoryStore::purge_expired`] or the sweeper task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{CacheError, Result};
use crate::store::{check_ttl, KeyValueStore};

// == Stored Value ==
#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    /// None = no expiration
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: &[u8], ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    /// An entry is expired once the current time reaches its deadline.
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }
}

// == Memory Store ==
/// Process-local [`KeyValueStore`] used by tests and single-node setups.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes every subsequent primitive fail with a transport error
    /// (`false`) or succeed again (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Remaining native TTL of a live key, `None` when the key is absent
    /// or has no expiry.
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|expires| expires.saturating_duration_since(now))
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes every expired entry, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Spawns a task that purges expired entries every `interval`.
    ///
    /// The task holds a weak reference and exits once the store is dropped.
    pub fn spawn_sweeper(store: &Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<MemoryStore> = Arc::downgrade(store);
        tokio::spawn(async move {
            info!("Starting memory store sweeper every {:?}", interval);
            loop {
                tokio::time::sleep(interval).await;
                let Some(store) = store.upgrade() else {
                    debug!("Memory store dropped, sweeper exiting");
                    return;
                };
                let removed = store.purge_expired().await;
                if removed > 0 {
                    info!("Sweeper removed {} expired entries", removed);
                } else {
                    debug!("Sweeper found no expired entries");
                }
            }
        })
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Transport("memory store marked unavailable".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        self.check_available()?;
        check_ttl(ttl)?;
        let mut entries = self.entries.write().await;
        let occupied = entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()));
        if occupied {
            return Ok(false);
        }
        entries.insert(key.to_string(), StoredValue::new(value, Some(ttl)));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check_available()?;
        if let Some(ttl) = ttl {
            check_ttl(ttl)?;
        }
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        check_ttl(ttl)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(()),
        };
        if expired {
            entries.remove(key);
        } else if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = now.checked_add(ttl);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries.get(key).is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now) && entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MAX_TTL;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set("key1", b"value1", None).await.unwrap();

        assert_eq!(store.get("key1").await.unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let store = MemoryStore::new();
        store
            .set("key1", b"value1", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(store.exists("key1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(!store.exists("key1").await.unwrap());
        assert_eq!(store.get("key1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_boundary_condition() {
        let store = MemoryStore::new();
        store
            .set("key1", b"v", Some(Duration::from_secs(1)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(!store.exists("key1").await.unwrap(), "expired at deadline");
    }

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert!(store.set_if_absent("k", b"a", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", b"b", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_reclaims_expired() {
        let store = MemoryStore::new();
        assert!(store
            .set_if_absent("k", b"a", Duration::from_secs(1))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(1001)).await;

        assert!(store
            .set_if_absent("k", b"b", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_rearms_deadline() {
        let store = MemoryStore::new();
        store
            .set("k", b"v", Some(Duration::from_secs(2)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        store.expire("k", Duration::from_secs(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.exists("k").await.unwrap());
        let remaining = store.remaining_ttl("k").await.unwrap();
        assert!(remaining <= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_expire_missing_key_is_noop() {
        let store = MemoryStore::new();
        store.expire("missing", Duration::from_secs(1)).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = MemoryStore::new();
        store.set("k", b"token-a", None).await.unwrap();

        assert!(!store.delete_if_equals("k", b"token-b").await.unwrap());
        assert!(store.exists("k").await.unwrap());

        assert!(store.delete_if_equals("k", b"token-a").await.unwrap());
        assert!(!store.exists("k").await.unwrap());

        assert!(!store.delete_if_equals("k", b"token-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_primitive() {
        let store = MemoryStore::new();
        store.set("k", b"v", None).await.unwrap();
        store.set_available(false);

        assert!(store.get("k").await.unwrap_err().is_transport());
        assert!(store.exists("k").await.unwrap_err().is_transport());
        assert!(store.delete("k").await.unwrap_err().is_transport());
        assert!(store.ping().await.unwrap_err().is_transport());

        store.set_available(true);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_oversized_ttl_rejected() {
        let store = MemoryStore::new();

        let result = store.set("k", b"v", Some(Duration::MAX)).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
        let result = store.set_if_absent("k", b"v", Duration::MAX).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));

        store.set("k", b"v", Some(MAX_TTL)).await.unwrap();
        let result = store.expire("k", MAX_TTL + Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
        assert!(store.remaining_ttl("k").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_reclaims_untouched_keys() {
        let store = MemoryStore::new();
        store
            .set("short", b"v", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("forever", b"v", None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.entries.read().await.len(), 1);
        assert_eq!(store.purge_expired().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_exits_with_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("lock", b"token", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        let handle = MemoryStore::spawn_sweeper(&store, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.entries.read().await.is_empty());

        drop(store);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
    }
}
