//! Durable key/value storage used as the slow tier of the cache.
//!
//! The cache only needs four operations from its durable tier, so that is all
//! [`PersistentStore`] asks for. Values are opaque strings; the cache stores
//! JSON text in them and treats anything it cannot decode as corrupt.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`]: process-local, used in tests and when embedding the cache
//!   somewhere that brings its own persistence
//! - [`FileStore`]: one file per key inside a directory, survives restarts

use dashmap::DashMap;

use crate::error::Result;

pub mod file;

pub use file::FileStore;

/// Narrow get/set/remove/enumerate interface over a durable string store.
///
/// Writes are best effort from the cache's point of view: concurrent writers
/// (two processes sharing a directory) race and the last write wins.
pub trait PersistentStore: Send + Sync {
    /// Read the raw value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, across all prefixes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
