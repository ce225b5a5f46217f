//! Cache-aside fill with stampede protection.
//!
//! On a miss only one caller per key recomputes the value; the others wait a
//! short delay and read the cache again. If the value is still missing they
//! load it themselves without caching it, so a slow or failed fill never
//! blocks a request for longer than one retry delay.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::config::Config;
use crate::lock::{LocalLockTable, LockManager, LockOptions};

/// Reference delay before a losing caller re-reads the cache.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

// == Cache Aside ==
#[derive(Clone)]
pub struct CacheAside {
    cache: Cache,
    local: LocalLockTable,
    locks: LockManager,
    lock_options: LockOptions,
    retry_delay: Duration,
}

impl CacheAside {
    pub fn new(cache: Cache, locks: LockManager) -> Self {
        Self {
            cache,
            local: LocalLockTable::new(),
            locks,
            lock_options: LockOptions::default(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn from_config(cache: Cache, locks: LockManager, config: &Config) -> Self {
        Self::new(cache, locks).with_retry_delay(config.retry_delay())
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Options used for the distributed fill lock.
    pub fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn local_locks(&self) -> &LocalLockTable {
        &self.local
    }

    // == Local Fill ==
    /// Returns the cached value or loads it, serializing loads of the same
    /// key within this process.
    ///
    /// `ttl_secs` of `None` caches without expiry. Loader errors are
    /// returned and nothing is cached.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_secs: Option<u64>,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.cache.get(key).await {
            return Ok(value);
        }

        let Some(_guard) = self.local.try_lock(key) else {
            return self.wait_then_load(key, loader).await;
        };

        // Filled while we were reading
        if let Some(value) = self.cache.get(key).await {
            return Ok(value);
        }

        debug!(key, "recomputing missing cache value");
        let value = loader().await?;
        self.store(key, &value, ttl_secs).await;
        Ok(value)
    }

    // == Distributed Fill ==
    /// Like [`get_or_load`](Self::get_or_load) but serializes loads across
    /// processes through the [`LockManager`].
    ///
    /// If the lock store is unreachable the value is loaded without
    /// coordination.
    pub async fn get_or_load_distributed<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_secs: Option<u64>,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.cache.get(key).await {
            return Ok(value);
        }

        let lease = match self.locks.acquire(key, self.lock_options).await {
            Ok(Some(lease)) => lease,
            Ok(None) => return self.wait_then_load(key, loader).await,
            Err(err) => {
                warn!(key, error = %err, "fill lock unavailable, loading without coordination");
                return loader().await;
            }
        };

        let result = match self.cache.get(key).await {
            Some(value) => Ok(value),
            None => {
                debug!(key, "recomputing missing cache value under distributed lock");
                match loader().await {
                    Ok(value) => {
                        self.store(key, &value, ttl_secs).await;
                        Ok(value)
                    }
                    Err(err) => Err(err),
                }
            }
        };

        if let Err(err) = self.locks.release(&lease).await {
            warn!(key, error = %err, "failed to release fill lock");
        }
        result
    }

    async fn wait_then_load<T, E, F, Fut>(&self, key: &str, loader: F) -> Result<T, E>
    where
        T: DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        tokio::time::sleep(self.retry_delay).await;
        if let Some(value) = self.cache.get(key).await {
            return Ok(value);
        }
        debug!(key, "still missing after retry, loading without caching");
        loader().await
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) {
        let written = match ttl_secs {
            Some(ttl) => self.cache.insert_with_ttl(key, value, ttl).await,
            None => self.cache.insert(key, value).await,
        };
        if !written {
            debug!(key, "recomputed value not cached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn aside() -> (Arc<MemoryStore>, CacheAside) {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn KeyValueStore> = store.clone();
        let aside = CacheAside::new(Cache::new(shared.clone()), LockManager::new(shared));
        (store, aside)
    }

    async fn spawn_fills(
        aside: &CacheAside,
        callers: usize,
        load_time: Duration,
        distributed: bool,
    ) -> (Arc<AtomicUsize>, Vec<String>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..callers {
            let aside = aside.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                let loader = move || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(load_time).await;
                    Ok::<_, Infallible>("fresh".to_string())
                };
                if distributed {
                    aside.get_or_load_distributed("hot", Some(60), loader).await
                } else {
                    aside.get_or_load("hot", Some(60), loader).await
                }
            }));
        }

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap().unwrap());
        }
        (loads, values)
    }

    #[tokio::test]
    async fn test_hit_skips_loader() {
        let (_, aside) = aside();
        assert!(aside.cache().insert("k", "cached").await);

        let value: String = aside
            .get_or_load("k", None, || async { Err::<String, &str>("must not load") })
            .await
            .unwrap();
        assert_eq!(value, "cached");
    }

    #[tokio::test]
    async fn test_miss_loads_and_populates() {
        let (store, aside) = aside();

        let value: String = aside
            .get_or_load("k", Some(30), || async { Ok::<_, Infallible>("v".to_string()) })
            .await
            .unwrap();

        assert_eq!(value, "v");
        assert!(store.remaining_ttl("k").await.is_some());
        assert_eq!(aside.cache().get::<String>("k").await.as_deref(), Some("v"));
        assert_eq!(aside.local_locks().active_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_load_once() {
        let (_, aside) = aside();
        let (loads, values) = spawn_fills(&aside, 8, Duration::from_millis(20), false).await;

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| v == "fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_load_once_distributed() {
        let (_, aside) = aside();
        let (loads, values) = spawn_fills(&aside, 8, Duration::from_millis(20), true).await;

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| v == "fresh"));
        assert!(!aside.locks().is_locked("hot").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fill_degrades_to_direct_load() {
        let (_, aside) = aside();
        let (loads, values) = spawn_fills(&aside, 4, Duration::from_millis(500), false).await;

        // The winner is still loading when the others re-read.
        assert_eq!(loads.load(Ordering::SeqCst), 4);
        assert!(values.iter().all(|v| v == "fresh"));
    }

    #[tokio::test]
    async fn test_loader_error_is_returned_and_not_cached() {
        let (_, aside) = aside();

        let result: Result<String, &str> = aside
            .get_or_load("k", None, || async { Err("source down") })
            .await;
        assert_eq!(result, Err("source down"));
        assert!(!aside.cache().exists("k").await);
        assert_eq!(aside.local_locks().active_keys(), 0);
    }

    #[tokio::test]
    async fn test_distributed_loader_error_releases_lock() {
        let (_, aside) = aside();

        let result: Result<String, &str> = aside
            .get_or_load_distributed("k", None, || async { Err("source down") })
            .await;
        assert!(result.is_err());
        assert!(!aside.locks().is_locked("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_outage_still_serves_loaded_value() {
        let (store, aside) = aside();
        store.set_available(false);

        let local: String = aside
            .get_or_load("k", Some(10), || async { Ok::<_, Infallible>("v".to_string()) })
            .await
            .unwrap();
        let distributed: String = aside
            .get_or_load_distributed("k", Some(10), || async {
                Ok::<_, Infallible>("v".to_string())
            })
            .await
            .unwrap();

        assert_eq!(local, "v");
        assert_eq!(distributed, "v");
    }
}
