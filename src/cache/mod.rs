//! TTL cache for fetched resources
//!
//! In-memory store with best-effort durable mirroring, plus a read-through
//! façade that invalidates related resource families after writes.

pub mod client;
pub mod entry;
pub mod key;
pub mod storage;
pub mod store;

use std::time::Duration;

/// Default TTLs per resource category
pub struct CacheTtl;

impl CacheTtl {
    /// Anything without a more specific TTL
    pub const DEFAULT: Duration = Duration::from_secs(5 * 60); // 5 min

    // Booking/occupancy data moves quickly
    pub const AVAILABILITY: Duration = Duration::from_secs(30); // 30 sec
    pub const INVENTORY: Duration = Duration::from_secs(2 * 60); // 2 min

    // Relatively stable data
    pub const CATALOG: Duration = Duration::from_secs(60 * 60); // 1 hr
    pub const PROFILE: Duration = Duration::from_secs(15 * 60); // 15 min

    // Reference data rarely changes within a session
    pub const REFERENCE: Duration = Duration::from_secs(24 * 60 * 60); // 24 hr
}

// Re-export main types
pub use client::{InvalidationRules, RequestCache};
pub use entry::CacheEntry;
pub use key::cache_key;
pub use storage::{DurableStore, MemoryStore, SqliteStore};
pub use store::{CacheStats, CacheStore, CacheStoreBuilder, LoadReport};
