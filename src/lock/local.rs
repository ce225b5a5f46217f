//! Per-key in-process lock table.
//!
//! Each key gets its own async mutex, created on first use and dropped from
//! the table once no guard or waiter references it. Unrelated keys never
//! contend with each other.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Context, Poll};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;
type Acquire = Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>;

#[derive(Debug, Default)]
struct Table {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Table {
    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Removes the slot when only the table itself still references it.
    fn release(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }
}

// == Local Lock Table ==
/// Keyed mutual exclusion for callers that share one process.
#[derive(Debug, Clone, Default)]
pub struct LocalLockTable {
    table: Arc<Table>,
}

impl LocalLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `key` is free and takes it.
    ///
    /// Cancelling the wait leaves no slot behind.
    pub async fn lock(&self, key: &str) -> LocalLockGuard {
        let slot = self.table.slot(key);
        let waiter = Waiter {
            table: self.table.clone(),
            key: key.to_string(),
            acquire: Some(Box::pin(slot.lock_owned())),
        };
        let guard = waiter.await;
        self.guard(key, guard)
    }

    /// Takes the lock for `key` only if nobody holds it right now.
    pub fn try_lock(&self, key: &str) -> Option<LocalLockGuard> {
        let slot = self.table.slot(key);
        match slot.try_lock_owned() {
            Ok(guard) => Some(self.guard(key, guard)),
            Err(_) => {
                self.table.release(key);
                None
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.table
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn guard(&self, key: &str, guard: OwnedMutexGuard<()>) -> LocalLockGuard {
        LocalLockGuard {
            table: self.table.clone(),
            key: key.to_string(),
            guard: Some(guard),
        }
    }
}

// == Waiter ==
/// A pending [`LocalLockTable::lock`]. If dropped before the mutex is
/// granted, its slot reference is dropped and the slot collected.
struct Waiter {
    table: Arc<Table>,
    key: String,
    acquire: Option<Acquire>,
}

impl Future for Waiter {
    type Output = OwnedMutexGuard<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(acquire) = self.acquire.as_mut() else {
            return Poll::Pending;
        };
        let guard = ready!(acquire.as_mut().poll(cx));
        self.acquire = None;
        Poll::Ready(guard)
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let Some(acquire) = self.acquire.take() else {
            return;
        };
        drop(acquire);
        self.table.release(&self.key);
    }
}

// == Local Lock Guard ==
/// Holds one key of a [`LocalLockTable`]; released on drop.
#[derive(Debug)]
pub struct LocalLockGuard {
    table: Arc<Table>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LocalLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LocalLockGuard {
    fn drop(&mut self) {
        // The owned guard holds a reference to the slot; drop it first so
        // the table sees an accurate count.
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}
