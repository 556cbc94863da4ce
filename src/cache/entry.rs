//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// == Entry Metadata ==
/// Timing and access bookkeeping attached to every entry.
///
/// The sequence numbers come from the owning store's counter and order
/// events that share a millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
    /// Last successful `get` (Unix milliseconds), creation time until then
    pub last_accessed_at: u64,
    /// Number of successful `get` calls
    pub hit_count: u64,
    /// Store sequence number at insertion
    #[serde(default)]
    pub inserted_seq: u64,
    /// Store sequence number at the last access
    #[serde(default)]
    pub accessed_seq: u64,
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value, immutable once set
    pub value: V,
    pub meta: EntryMeta,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry expiring `ttl` after `now`.
    pub fn new(value: V, ttl: Duration, now: u64, seq: u64) -> Self {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Self {
            value,
            meta: EntryMeta {
                created_at: now,
                expires_at: now.saturating_add(ttl_ms),
                last_accessed_at: now,
                hit_count: 0,
                inserted_seq: seq,
                accessed_seq: seq,
            },
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at time `now`.
    ///
    /// An entry stays visible up to and including its expiry instant and is
    /// gone strictly after it.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.meta.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    // == Record Access ==
    /// Updates access metadata after a successful lookup.
    pub fn record_access(&mut self, now: u64, seq: u64) {
        self.meta.hit_count += 1;
        self.meta.last_accessed_at = now;
        self.meta.accessed_seq = seq;
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.meta
            .expires_at
            .saturating_sub(current_timestamp_ms())
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
