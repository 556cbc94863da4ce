//! Timed Store Module
//!
//! Key/value map where every entry carries an expiry timestamp. Expiry is
//! enforced lazily on access; there is no background sweep.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, EntryMeta};

// == Lookup Miss ==
/// Why a lookup found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    Absent,
    /// The entry had expired and was removed by this lookup
    Expired,
}

// == Timed Store ==
/// Entry storage with per-entry expiry.
#[derive(Debug)]
pub struct TimedStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Monotonic counter ordering inserts and accesses
    seq: u64,
}

impl<V> Default for TimedStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TimedStore<V> {
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    // == Get ==
    /// Returns the value if present and not expired.
    ///
    /// Expired entries are deleted as a side effect.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.lookup(key).ok().map(|entry| &entry.value)
    }

    // == Lookup ==
    /// Finds a live entry, removing it first if it has expired.
    pub fn lookup(&mut self, key: &str) -> Result<&mut CacheEntry<V>, Miss> {
        let now = current_timestamp_ms();
        let expired = match self.entries.get(key) {
            None => return Err(Miss::Absent),
            Some(entry) => entry.is_expired_at(now),
        };
        if expired {
            self.entries.remove(key);
            debug!(key, "Removed expired entry on access");
            return Err(Miss::Expired);
        }
        self.entries.get_mut(key).ok_or(Miss::Absent)
    }

    // == Touch ==
    /// Looks up a live entry and records the access on it.
    pub fn touch(&mut self, key: &str) -> Result<&CacheEntry<V>, Miss> {
        let seq = self.next_seq();
        let now = current_timestamp_ms();
        let entry = self.lookup(key)?;
        entry.record_access(now, seq);
        Ok(&*entry)
    }

    // == Contains ==
    /// True iff the key is present and not expired. Never mutates.
    pub fn contains(&self, key: &str) -> bool {
        let now = current_timestamp_ms();
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired_at(now))
            .unwrap_or(false)
    }

    // == Set ==
    /// Stores a value, replacing any previous entry for the key wholesale.
    pub fn set(&mut self, key: String, value: V, ttl: Duration) {
        let seq = self.next_seq();
        let entry = CacheEntry::new(value, ttl, current_timestamp_ms(), seq);
        self.entries.insert(key, entry);
    }

    // == Restore ==
    /// Reinserts an entry with previously recorded metadata.
    pub fn restore(&mut self, key: String, value: V, meta: EntryMeta) {
        self.seq = self.seq.max(meta.inserted_seq).max(meta.accessed_seq);
        self.entries.insert(key, CacheEntry { value, meta });
    }

    // == Delete ==
    /// Removes an entry, returning it if it existed.
    pub fn delete(&mut self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Size ==
    /// Number of stored entries, including expired ones not yet accessed.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &HashMap<String, CacheEntry<V>> {
        &self.entries
    }

    /// Removes every entry expired at this instant, returning how many.
    pub fn purge_expired(&mut self) -> usize {
        let now = current_timestamp_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - self.entries.len()
    }
}
