//! Distributed lock manager.
//!
//! A lock is a store key under a reserved prefix whose presence means
//! "held". Acquisition is an atomic set-if-absent with a mandatory expiry,
//! retried on a fixed poll interval until the caller's wait budget runs out.
//! Each acquisition stores a fresh random token, and release deletes the key
//! only while it still carries that token.
//!
//! The expiry is the only protection against a crashed holder: a holder that
//! stalls longer than the expiry loses exclusivity. Critical sections must
//! stay well under it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Config, DEFAULT_LOCK_PREFIX};
use crate::error::{CacheError, Result};
use crate::store::KeyValueStore;

/// Reference interval between acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// == Lock Options ==
/// Expiry and wait budget for one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lifetime of the lock key if never released
    pub expiry: Duration,
    /// How long to keep retrying; zero means a single attempt
    pub max_wait: Duration,
}

impl LockOptions {
    pub fn new(expiry_secs: u64, max_wait: Duration) -> Self {
        Self {
            expiry: Duration::from_secs(expiry_secs),
            max_wait,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::new(10, Duration::ZERO)
    }
}

// == Lock Lease ==
/// Proof of a successful acquisition, required to release the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    name: String,
    key: String,
    token: String,
    expires_at: DateTime<Utc>,
}

impl LockLease {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store key backing this lock.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wall-clock instant after which the store reclaims the lock.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

// == Lock Manager ==
/// Acquires and releases named locks on a shared store.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_LOCK_PREFIX.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self::new(store)
            .with_prefix(config.lock_key_prefix.clone())
            .with_poll_interval(config.lock_poll_interval())
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Store key for the lock called `name`.
    pub fn lock_key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    // == Acquire ==
    /// Tries to take the lock, polling until `options.max_wait` has elapsed.
    ///
    /// Returns `Ok(None)` when the lock stayed held by someone else for the
    /// whole wait. Store failures are returned as errors, never as `None`.
    /// No ordering is guaranteed among competing waiters.
    pub async fn acquire(&self, name: &str, options: LockOptions) -> Result<Option<LockLease>> {
        if options.expiry.is_zero() {
            return Err(CacheError::InvalidRequest(format!(
                "lock '{name}' requires a non-zero expiry"
            )));
        }

        let key = self.lock_key(name);
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if self
                .store
                .set_if_absent(&key, token.as_bytes(), options.expiry)
                .await?
            {
                debug!(lock = name, attempts, "lock acquired");
                let expires_at = chrono::Duration::from_std(options.expiry)
                    .ok()
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                return Ok(Some(LockLease {
                    name: name.to_string(),
                    key,
                    token,
                    expires_at,
                }));
            }

            if options.max_wait.is_zero() || started.elapsed() >= options.max_wait {
                debug!(lock = name, attempts, "lock busy, giving up");
                return Ok(None);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Single non-blocking attempt with the default expiry.
    pub async fn try_acquire(&self, name: &str) -> Result<Option<LockLease>> {
        self.acquire(name, LockOptions::default()).await
    }

    // == Release ==
    /// Releases the lock if `lease` still owns it.
    ///
    /// Returns `false` when the lock had already expired, been released, or
    /// been taken over by another holder. Releasing twice is harmless.
    pub async fn release(&self, lease: &LockLease) -> Result<bool> {
        let released = self
            .store
            .delete_if_equals(&lease.key, lease.token.as_bytes())
            .await?;
        if released {
            debug!(lock = %lease.name, "lock released");
        } else {
            debug!(lock = %lease.name, "lock no longer owned by this lease");
        }
        Ok(released)
    }

    /// Deletes the lock regardless of who holds it.
    ///
    /// Kept for callers that do not carry a lease; prefer [`release`](Self::release).
    pub async fn release_by_name(&self, name: &str) -> Result<()> {
        self.store.delete(&self.lock_key(name)).await
    }

    pub async fn is_locked(&self, name: &str) -> Result<bool> {
        self.store.exists(&self.lock_key(name)).await
    }

    // == With Lock ==
    /// Runs `critical` under the lock and releases it afterwards.
    ///
    /// Returns `Ok(None)` without running `critical` if the lock could not
    /// be acquired. A failed release is logged; the lock then ages out.
    pub async fn with_lock<F, Fut, T>(
        &self,
        name: &str,
        options: LockOptions,
        critical: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(lease) = self.acquire(name, options).await? else {
            return Ok(None);
        };

        let output = critical().await;

        if let Err(err) = self.release(&lease).await {
            warn!(lock = name, error = %err, "failed to release lock, it will expire on its own");
        }
        Ok(Some(output))
    }
}
