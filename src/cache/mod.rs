//! Cache Module
//!
//! Provides a namespaced result cache with TTL expiration, pluggable eviction
//! and optional best-effort persistence.

mod entry;
mod persist;
mod policy;
mod service;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry, EntryMeta};
pub use persist::{slot_name, FileStorage, MemoryStorage, StorageBackend, STORAGE_PREFIX};
pub use policy::EvictionPolicy;
pub use service::{
    Cache, CacheOptions, CacheValue, EvictionCallback, DEFAULT_CAPACITY, DEFAULT_TTL,
};
pub use stats::{CacheStats, StatsCounters};
pub use store::{Miss, TimedStore};
