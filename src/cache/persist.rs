//! Persistence Module
//!
//! Injected async storage port used by persistent caches, plus the blob
//! format written to it.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::{EntryMeta, TimedStore};
use crate::error::Result;

/// Prefix of every storage slot written by a cache.
pub const STORAGE_PREFIX: &str = "chainkit_cache";

/// Storage slot for a cache namespace: `<prefix>_<namespace>`.
pub fn slot_name(namespace: &str) -> String {
    format!("{}_{}", STORAGE_PREFIX, namespace)
}

// == Storage Backend ==
/// Durable string slots keyed by name.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads a slot, `None` if it was never written.
    async fn load(&self, slot: &str) -> Result<Option<String>>;

    /// Overwrites a slot.
    async fn save(&self, slot: &str, blob: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

// == Memory Storage ==
/// Process-local slots. Useful for tests and for sharing a blob between
/// cache instances within one process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn load(&self, slot: &str) -> Result<Option<String>> {
        Ok(self.slots.read().await.get(slot).cloned())
    }

    async fn save(&self, slot: &str, blob: &str) -> Result<()> {
        self.slots
            .write()
            .await
            .insert(slot.to_string(), blob.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// == File Storage ==
/// One JSON file per slot inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slot))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn load(&self, slot: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(slot)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, slot: &str, blob: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        // Atomic replace of the slot file
        let path = self.path_for(slot);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, blob).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// == Persisted Blob ==
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredItem<T> {
    pub value: T,
}

/// `{items, meta}` layout written to a storage slot.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedCache<T> {
    pub items: BTreeMap<String, StoredItem<T>>,
    pub meta: BTreeMap<String, EntryMeta>,
}

impl<'a, V> PersistedCache<&'a V> {
    /// Borrowing view of a store, ready to serialize.
    pub fn from_store(store: &'a TimedStore<V>) -> Self {
        let mut items = BTreeMap::new();
        let mut meta = BTreeMap::new();
        for (key, entry) in store.entries() {
            items.insert(key.clone(), StoredItem { value: &entry.value });
            meta.insert(key.clone(), entry.meta);
        }
        Self { items, meta }
    }
}

impl<V> PersistedCache<V> {
    /// Moves every item that has metadata into the store. Returns how many
    /// were restored; items without metadata are dropped.
    pub fn restore_into(self, store: &mut TimedStore<V>) -> usize {
        let mut meta = self.meta;
        let mut restored = 0;
        for (key, item) in self.items {
            if let Some(m) = meta.remove(&key) {
                store.restore(key, item.value, m);
                restored += 1;
            }
        }
        restored
    }
}
