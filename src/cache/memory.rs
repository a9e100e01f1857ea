//! Bounded in-memory tier.
//!
//! Entries keep their insertion position; refreshing a key does not move it.
//! When the bound is exceeded the oldest-inserted entry goes first, even if it
//! was read a moment ago. This is FIFO, not LRU.

use indexmap::IndexMap;
use tracing::trace;

use super::CacheEntry;

/// Insertion-ordered map with an item bound.
#[derive(Debug)]
pub struct MemoryTier {
    entries: IndexMap<String, CacheEntry>,
    capacity: usize,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up an entry regardless of its validity.
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Look up an entry valid at `now_millis`.
    pub fn get_valid(&self, key: &str, now_millis: i64) -> Option<&CacheEntry> {
        self.entries.get(key).filter(|e| e.is_valid_at(now_millis))
    }

    /// Insert or refresh an entry, returning the keys evicted to make room.
    pub fn insert(&mut self, entry: CacheEntry) -> Vec<String> {
        if let Some(existing) = self.entries.get_mut(&entry.key) {
            *existing = entry;
            return Vec::new();
        }
        if self.capacity == 0 {
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while self.entries.len() >= self.capacity {
            match self.entries.shift_remove_index(0) {
                Some((key, _)) => {
                    trace!("Evicted {} from memory tier", key);
                    evicted.push(key);
                }
                None => break,
            }
        }
        self.entries.insert(entry.key.clone(), entry);
        evicted
    }

    /// Remove a key, preserving the order of the rest.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.shift_remove(key)
    }

    /// Change the bound, evicting oldest-inserted entries if it shrank.
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<String> {
        self.capacity = capacity;
        let overflow = self.entries.len().saturating_sub(capacity);
        self.entries
            .drain(..overflow)
            .map(|(key, _)| key)
            .collect()
    }

    /// Drop every entry invalid at `now_millis`, returning how many went.
    pub fn remove_expired(&mut self, now_millis: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_valid_at(now_millis));
        before - self.entries.len()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn entry(key: &str, at: i64) -> CacheEntry {
        CacheEntry::new(key, json!(key), at, Duration::from_secs(60))
    }

    #[test]
    fn test_fifo_eviction_ignores_reads() {
        let mut tier = MemoryTier::new(3);
        tier.insert(entry("key1", 0));
        tier.insert(entry("key2", 0));
        tier.insert(entry("key3", 0));

        // Reading key1 does not protect it
        assert!(tier.get_valid("key1", 1).is_some());

        let evicted = tier.insert(entry("key4", 0));
        assert_eq!(evicted, vec!["key1".to_string()]);
        assert_eq!(tier.keys().collect::<Vec<_>>(), vec!["key2", "key3", "key4"]);
    }

    #[test]
    fn test_refresh_keeps_position() {
        let mut tier = MemoryTier::new(2);
        tier.insert(entry("a", 0));
        tier.insert(entry("b", 0));
        assert!(tier.insert(entry("a", 10)).is_empty());
        assert_eq!(tier.get("a").unwrap().created_at, 10);

        let evicted = tier.insert(entry("c", 0));
        assert_eq!(evicted, vec!["a".to_string()]);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut tier = MemoryTier::new(0);
        tier.insert(entry("a", 0));
        assert!(tier.is_empty());
    }

    #[test]
    fn test_shrinking_capacity_evicts_oldest() {
        let mut tier = MemoryTier::new(4);
        for key in ["a", "b", "c", "d"] {
            tier.insert(entry(key, 0));
        }
        assert_eq!(tier.set_capacity(2), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(tier.keys().collect::<Vec<_>>(), vec!["c", "d"]);
        assert!(tier.set_capacity(10).is_empty());
    }

    #[test]
    fn test_remove_expired() {
        let mut tier = MemoryTier::new(10);
        tier.insert(CacheEntry::new("short", json!(1), 0, Duration::from_millis(100)));
        tier.insert(CacheEntry::new("long", json!(2), 0, Duration::from_millis(1_000)));

        assert_eq!(tier.remove_expired(100), 1);
        assert!(tier.get("short").is_none());
        assert!(tier.get("long").is_some());
    }
}
