//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.

use serde::Serialize;

// == Stats Counters ==
/// Monotonic hit/miss/eviction counters for one cache instance.
#[derive(Debug, Clone, Default)]
pub struct StatsCounters {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// Number of entries removed by the eviction policy
    pub evictions: u64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }
}

// == Cache Stats ==
/// Point-in-time view returned by `Cache::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Current number of entries, expired-but-unaccessed included
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    /// Creation time of the oldest entry (Unix milliseconds)
    pub oldest_entry: Option<u64>,
    /// Creation time of the newest entry (Unix milliseconds)
    pub newest_entry: Option<u64>,
}

impl CacheStats {
    /// Builds a snapshot from counters and the entry creation times.
    pub fn snapshot<I>(counters: &StatsCounters, created: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let mut size = 0;
        let mut oldest: Option<u64> = None;
        let mut newest: Option<u64> = None;
        for ts in created {
            size += 1;
            oldest = Some(oldest.map_or(ts, |o| o.min(ts)));
            newest = Some(newest.map_or(ts, |n| n.max(ts)));
        }

        Self {
            size,
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            hit_rate: counters.hit_rate(),
            oldest_entry: oldest,
            newest_entry: newest,
        }
    }
}
