//! Cache Service Module
//!
//! The externally visible cache: timed store, eviction policy, statistics and
//! optional best-effort persistence behind one lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::persist::{slot_name, PersistedCache};
use crate::cache::store::Miss;
use crate::cache::{CacheStats, EvictionPolicy, StatsCounters, StorageBackend, TimedStore};
use crate::error::{ChainError, Result};

/// Default time-to-live: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default capacity in entries.
pub const DEFAULT_CAPACITY: usize = 100;

/// Values a cache can hold. Blanket-implemented.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Invoked with the victim's key and value whenever the policy evicts.
pub type EvictionCallback<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;

// == Cache Options ==
/// Per-instance cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    /// Fixed lifetime of every entry
    pub ttl: Duration,
    /// Maximum number of entries
    pub capacity: usize,
    pub policy: EvictionPolicy,
    /// Scopes the persistence slot
    pub namespace: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            capacity: DEFAULT_CAPACITY,
            policy: EvictionPolicy::default(),
            namespace: "default".to_string(),
        }
    }
}

impl CacheOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    // == Validate ==
    /// Rejects options no cache can honour.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ChainError::validation("Cache capacity must be at least 1"));
        }
        if self.ttl.is_zero() {
            return Err(ChainError::validation("Cache TTL must be greater than zero"));
        }
        if self.namespace.is_empty() {
            return Err(ChainError::validation("Cache namespace must not be empty"));
        }
        Ok(())
    }
}

struct CacheState<V> {
    store: TimedStore<V>,
    counters: StatsCounters,
}

// == Cache ==
/// Namespaced result cache with TTL expiry and policy-driven eviction.
///
/// All state sits behind a single async lock, so one instance can be shared
/// freely between tasks. Normal operations never fail; persistence problems
/// are logged and otherwise ignored.
pub struct Cache<V> {
    options: CacheOptions,
    state: RwLock<CacheState<V>>,
    storage: Option<Arc<dyn StorageBackend>>,
    on_evict: Option<EvictionCallback<V>>,
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("options", &self.options)
            .field("storage", &self.storage.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl<V: CacheValue> Cache<V> {
    // == Constructors ==
    /// Creates a purely in-memory cache.
    pub fn new(options: CacheOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            state: RwLock::new(CacheState {
                store: TimedStore::new(),
                counters: StatsCounters::new(),
            }),
            storage: None,
            on_evict: None,
        })
    }

    /// Creates a persistent cache, loading whatever the storage slot holds.
    ///
    /// A missing or unreadable blob yields an empty cache.
    pub async fn open(options: CacheOptions, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        let mut cache = Self::new(options)?;
        cache.storage = Some(storage);
        cache.load().await;
        Ok(cache)
    }

    /// Registers a callback fired on every policy eviction.
    pub fn on_evict<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &V) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(callback));
        self
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    // == Get ==
    /// Returns a live value, counting a hit or a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.write().await;
        let outcome = state.store.touch(key).map(|entry| entry.value.clone());
        match outcome {
            Ok(value) => {
                state.counters.record_hit();
                self.persist(&state).await;
                Some(value)
            }
            Err(miss) => {
                state.counters.record_miss();
                if miss == Miss::Expired {
                    self.persist(&state).await;
                }
                None
            }
        }
    }

    // == Has ==
    /// True iff the key is present and unexpired. Leaves metadata untouched.
    pub async fn has(&self, key: &str) -> bool {
        self.state.read().await.store.contains(key)
    }

    // == Set ==
    /// Stores a value under the instance TTL, evicting one entry first when
    /// a new key would overflow capacity.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut state = self.state.write().await;

        if !state.store.contains_key(&key) && state.store.size() >= self.options.capacity {
            self.evict_one(&mut state);
        }
        state.store.set(key, value, self.options.ttl);

        self.persist(&state).await;
    }

    // == Delete ==
    /// Removes one entry; returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state.store.delete(key).is_some();
        if removed {
            self.persist(&state).await;
        }
        removed
    }

    // == Clear ==
    /// Drops every entry. Hit and miss counters keep counting.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.store.clear();
        self.persist(&state).await;
        info!(namespace = %self.options.namespace, "Cache cleared");
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats::snapshot(
            &state.counters,
            state.store.entries().values().map(|e| e.meta.created_at),
        )
    }

    /// Zeroes hit, miss and eviction counters.
    pub async fn reset_stats(&self) {
        self.state.write().await.counters = StatsCounters::new();
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.store.size()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.store.is_empty()
    }

    // == Eviction ==
    fn evict_one(&self, state: &mut CacheState<V>) {
        let Some(victim) = self.options.policy.select_victim(state.store.entries()) else {
            return;
        };
        if let Some(entry) = state.store.delete(&victim) {
            state.counters.record_eviction();
            debug!(
                key = %victim,
                policy = %self.options.policy,
                "Evicted cache entry"
            );
            if let Some(callback) = &self.on_evict {
                callback(&victim, &entry.value);
            }
        }
    }

    // == Persistence ==
    async fn persist(&self, state: &CacheState<V>) {
        let Some(storage) = &self.storage else {
            return;
        };
        let blob = match serde_json::to_string(&PersistedCache::from_store(&state.store)) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(namespace = %self.options.namespace, error = %e, "Failed to serialize cache");
                return;
            }
        };
        if let Err(e) = storage.save(&slot_name(&self.options.namespace), &blob).await {
            warn!(namespace = %self.options.namespace, error = %e, "Failed to persist cache");
        }
    }

    async fn load(&mut self) {
        let Some(storage) = self.storage.clone() else {
            return;
        };
        let slot = slot_name(&self.options.namespace);
        let blob = match storage.load(&slot).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return,
            Err(e) => {
                warn!(slot = %slot, error = %e, "Failed to load persistent cache");
                return;
            }
        };
        let persisted: PersistedCache<V> = match serde_json::from_str(&blob) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(slot = %slot, error = %e, "Ignoring corrupt persistent cache");
                return;
            }
        };

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let restored = persisted.restore_into(&mut state.store);
        let expired = state.store.purge_expired();
        let mut trimmed = 0;
        while state.store.size() > self.options.capacity {
            self.evict_one(state);
            trimmed += 1;
        }
        info!(
            slot = %slot,
            restored,
            expired,
            trimmed,
            "Loaded persistent cache"
        );
        if expired > 0 || trimmed > 0 {
            self.persist(state).await;
        }
    }
}
