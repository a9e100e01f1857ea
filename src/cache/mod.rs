//! Tiered response cache for the analytics API.
//!
//! This module provides the caching engine that sits between dashboard pages
//! and the resource endpoints. It includes:
//!
//! - **Memory tier**: bounded, insertion-ordered working set ([`MemoryTier`])
//! - **Durable tier**: any [`PersistentStore`](crate::storage::PersistentStore),
//!   holding a serialized copy of every entry so results survive a restart
//! - **Single-flight**: concurrent misses on one key share a single fetch
//!   ([`RequestCoalescer`])
//! - **TTL sweep**: a background task dropping expired entries from both tiers
//!
//! ## Invalidation
//!
//! - **TTL-based**: an entry is valid while `now - created_at < ttl`
//! - **Capacity**: the memory tier evicts its oldest-inserted entry on overflow
//! - **Self-healing**: a durable record that no longer decodes is deleted on read
//! - **Explicit**: `delete` and namespace-scoped `clear`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod coalesce;
pub mod key;
pub mod memory;
pub mod tiered;

pub use coalesce::{Flight, FlightId, RequestCoalescer};
pub use key::{CacheKey, CacheKeyBuilder};
pub use memory::MemoryTier;
pub use tiered::{spawn_sweeper, TieredCache};

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default bound on the memory tier.
pub const DEFAULT_MAX_MEMORY_ITEMS: usize = 100;

/// Default namespace prefix for durable records.
pub const DEFAULT_STORAGE_PREFIX: &str = "dashboard_cache_";

/// Suffix of the durable record holding cumulative counters.
pub const STATS_KEY: &str = "stats";

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when a call does not pass its own
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Maximum number of entries held in memory
    pub max_memory_items: usize,
    /// Mirror entries into the durable store
    pub persist_to_storage: bool,
    /// Namespace prefix for every durable record this cache owns
    pub storage_prefix: String,
    /// Interval of the background expiry sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            max_memory_items: DEFAULT_MAX_MEMORY_ITEMS,
            persist_to_storage: true,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the memory tier bound.
    pub fn with_max_memory_items(mut self, max: usize) -> Self {
        self.max_memory_items = max;
        self
    }

    /// Set the durable namespace prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Keep entries in memory only.
    pub fn without_persistence(mut self) -> Self {
        self.persist_to_storage = false;
        self
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: CacheConfigUpdate) {
        if let Some(ttl) = update.default_ttl {
            self.default_ttl = ttl;
        }
        if let Some(max) = update.max_memory_items {
            self.max_memory_items = max;
        }
        if let Some(persist) = update.persist_to_storage {
            self.persist_to_storage = persist;
        }
        if let Some(prefix) = update.storage_prefix {
            self.storage_prefix = prefix;
        }
    }
}

/// Partial runtime update of a [`CacheConfig`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigUpdate {
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,
    pub max_memory_items: Option<usize>,
    pub persist_to_storage: Option<bool>,
    pub storage_prefix: Option<String>,
}

/// A cached response with its expiry metadata.
///
/// This is also the durable record format: `{ key, data, timestamp, ttl }` with
/// the timestamp in epoch milliseconds and the TTL in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Logical cache key (without the storage prefix)
    pub key: String,
    /// The cached payload
    pub data: JsonValue,
    /// Creation time, epoch milliseconds
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    /// Time-to-live
    #[serde(with = "ttl_millis")]
    pub ttl: Duration,
}

impl CacheEntry {
    /// Create an entry stamped at `now_millis`.
    pub fn new(key: impl Into<String>, data: JsonValue, now_millis: i64, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            data,
            created_at: now_millis,
            ttl,
        }
    }

    /// Age of the entry at `now_millis`.
    pub fn age(&self, now_millis: i64) -> Duration {
        Duration::from_millis(now_millis.saturating_sub(self.created_at).max(0) as u64)
    }

    /// `true` while `now - created_at < ttl`. An entry is already invalid at
    /// exactly `age == ttl`.
    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_sub(self.created_at) < ttl_ms
    }
}

mod ttl_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Cumulative counters persisted under `<prefix>stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    pub total_requests: u64,
    pub cache_hits: u64,
}

/// Cache metrics for monitoring and diagnostics
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Number of `get`/`get_sync` calls
    pub requests: AtomicU64,
    /// Requests answered without running a computation
    pub hits: AtomicU64,
    /// Memory-tier evictions caused by the item bound
    pub evictions: AtomicU64,
    /// Callers that attached to an already running fetch
    pub coalesced: AtomicU64,
    /// Durable records removed because they no longer decoded
    pub self_heals: AtomicU64,
    /// Failed fetches answered from an expired durable record
    pub stale_fallbacks: AtomicU64,
}

impl CacheMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cumulative counters from a persisted record
    pub fn restore(&self, record: StatsRecord) {
        self.requests.store(record.total_requests, Ordering::Relaxed);
        self.hits.store(record.cache_hits, Ordering::Relaxed);
    }

    /// Record a request
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caller joining an in-flight fetch
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a self-healing removal
    pub fn record_self_heal(&self) {
        self.self_heals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stale fallback
    pub fn record_stale_fallback(&self) {
        self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests.load(Ordering::Relaxed) as f64;
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        if requests > 0.0 {
            hits / requests
        } else {
            0.0
        }
    }

    /// Persistable subset of the counters
    pub fn record(&self) -> StatsRecord {
        StatsRecord {
            total_requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.hits.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.self_heals.store(0, Ordering::Relaxed);
        self.stale_fallbacks.store(0, Ordering::Relaxed);
    }

    /// Get summary as a string
    pub fn summary(&self) -> String {
        format!(
            "Requests: {}, Hits: {}, Hit Rate: {:.2}%, Evictions: {}, Coalesced: {}, Self-heals: {}, Stale fallbacks: {}",
            self.requests.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
            self.hit_rate() * 100.0,
            self.evictions.load(Ordering::Relaxed),
            self.coalesced.load(Ordering::Relaxed),
            self.self_heals.load(Ordering::Relaxed),
            self.stale_fallbacks.load(Ordering::Relaxed),
        )
    }
}

/// Observational snapshot of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub memory_items: usize,
    pub storage_items: usize,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    /// Items across both tiers. A key held by both counts twice.
    pub fn total_items(&self) -> usize {
        self.memory_items + self.storage_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_validity_is_strict() {
        let entry = CacheEntry::new("k", json!({"x": 1}), 1_000, Duration::from_millis(1_000));
        assert!(entry.is_valid_at(1_000));
        assert!(entry.is_valid_at(1_999));
        assert!(!entry.is_valid_at(2_000));
        assert!(!entry.is_valid_at(5_000));
    }

    #[test]
    fn test_zero_ttl_is_never_valid() {
        let entry = CacheEntry::new("k", json!(null), 0, Duration::ZERO);
        assert!(!entry.is_valid_at(0));
    }

    #[test]
    fn test_entry_record_format() {
        let entry = CacheEntry::new("stores", json!([1, 2]), 42, Duration::from_secs(5));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({"key": "stores", "data": [1, 2], "timestamp": 42, "ttl": 5000})
        );

        let back: CacheEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_stats_record_format() {
        let record = StatsRecord {
            total_requests: 10,
            cache_hits: 7,
        };
        assert_eq!(
            serde_json::to_value(record).unwrap(),
            json!({"totalRequests": 10, "cacheHits": 7})
        );
    }

    #[test]
    fn test_config_partial_update() {
        let mut config = CacheConfig::default();
        config.apply(CacheConfigUpdate {
            max_memory_items: Some(5),
            ..Default::default()
        });
        assert_eq!(config.max_memory_items, 5);
        assert_eq!(config.default_ttl, DEFAULT_TTL);
        assert!(config.persist_to_storage);
        assert_eq!(config.storage_prefix, DEFAULT_STORAGE_PREFIX);
    }

    #[test]
    fn test_metrics_hit_rate() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);
        metrics.record_request();
        metrics.record_request();
        metrics.record_hit();
        assert_eq!(metrics.hit_rate(), 0.5);
        metrics.reset();
        assert_eq!(metrics.record(), StatsRecord::default());
    }
}
