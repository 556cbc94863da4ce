//! Eviction Policy Module
//!
//! Selects which entry leaves the cache when it is full.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;
use crate::error::ChainError;

// == Eviction Policy ==
/// Strategy for choosing a single eviction victim.
///
/// Ties are broken on timestamps first, then store sequence numbers, then the
/// lowest key, so victim selection is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Smallest `last_accessed_at`
    #[default]
    Lru,
    /// Smallest `hit_count`
    Lfu,
    /// Smallest `created_at`
    Fifo,
    /// Any entry; the lowest key is chosen
    Arbitrary,
}

impl EvictionPolicy {
    // == Select Victim ==
    /// Returns the key to evict, or None when there are no entries.
    pub fn select_victim<'a, V: 'a, I>(&self, entries: I) -> Option<String>
    where
        I: IntoIterator<Item = (&'a String, &'a CacheEntry<V>)>,
    {
        entries
            .into_iter()
            .min_by(|(ka, a), (kb, b)| self.compare(a, b).then_with(|| ka.cmp(kb)))
            .map(|(key, _)| key.clone())
    }

    fn compare<V>(&self, a: &CacheEntry<V>, b: &CacheEntry<V>) -> Ordering {
        let (a, b) = (&a.meta, &b.meta);
        match self {
            EvictionPolicy::Lru => a
                .last_accessed_at
                .cmp(&b.last_accessed_at)
                .then(a.accessed_seq.cmp(&b.accessed_seq)),
            EvictionPolicy::Lfu => a.hit_count.cmp(&b.hit_count),
            EvictionPolicy::Fifo => a
                .created_at
                .cmp(&b.created_at)
                .then(a.inserted_seq.cmp(&b.inserted_seq)),
            EvictionPolicy::Arbitrary => Ordering::Equal,
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Arbitrary => "arbitrary",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionPolicy {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "arbitrary" | "default" => Ok(EvictionPolicy::Arbitrary),
            other => Err(ChainError::validation(format!(
                "Unknown eviction policy: {}",
                other
            ))),
        }
    }
}
