//! Lock Module
//!
//! Mutual exclusion for cache recomputation: a store-backed lock shared by
//! many processes, and a keyed in-process lock table for co-located callers.

mod distributed;
mod local;

pub use distributed::{LockLease, LockManager, LockOptions, DEFAULT_POLL_INTERVAL};
pub use local::{LocalLockGuard, LocalLockTable};
