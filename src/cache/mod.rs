//! Cache Module
//!
//! Cache-aside layer over the store client: typed get/insert with sliding
//! and jittered-deadline expiry, plus the stampede-resistant fill helper.

mod aside;
mod entry;
mod layer;
mod stats;


// Re-export public types
pub use aside::CacheAside;
pub use entry::{CacheEntry, NO_EXPIRY};
pub use layer::Cache;
pub use stats::{CacheStats, StatsRecorder};
