//! Two-tier cache: bounded memory in front of a durable store.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------+      +----------------------+
//! |  Memory tier        |      |  Durable tier        |
//! |  (MemoryTier, FIFO) | ---> |  (PersistentStore)   |
//! |  bounded, volatile  |      |  unbounded, survives |
//! +---------------------+      |  restarts            |
//!            ^                 +----------------------+
//!            |                            ^
//!      get / get_sync               serialized copy
//!            |                            |
//! +---------------------------------------------------+
//! |  RequestCoalescer: one fetch per key in flight    |
//! +---------------------------------------------------+
//! ```
//!
//! `TieredCache` is a cheap handle around shared state. The composition root
//! creates one and clones it into everything that reads or writes cached
//! responses.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::coalesce::{FlightId, RequestCoalescer};
use super::memory::MemoryTier;
use super::{
    CacheConfig, CacheConfigUpdate, CacheEntry, CacheKey, CacheMetrics, CacheStats, StatsRecord,
    STATS_KEY,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::storage::{MemoryStore, PersistentStore};

/// Outcome of reading a key from the durable tier.
enum DurableRead {
    Valid(CacheEntry),
    Expired(CacheEntry),
    Missing,
    /// An unreadable record was found and removed
    Healed,
}

struct CacheInner {
    config: RwLock<CacheConfig>,
    memory: Mutex<MemoryTier>,
    store: Arc<dyn PersistentStore>,
    coalescer: RequestCoalescer<JsonValue>,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
}

/// Memory + durable cache with single-flight fetches.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &*self.inner.config.read())
            .field("stats", &self.stats())
            .finish()
    }
}

impl TieredCache {
    /// Create a cache over `store` using the system clock.
    pub fn new(config: CacheConfig, store: Arc<dyn PersistentStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a cache with a process-local durable tier.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Create a cache with an explicit clock.
    pub fn with_clock(
        config: CacheConfig,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = CacheInner {
            memory: Mutex::new(MemoryTier::new(config.max_memory_items)),
            config: RwLock::new(config),
            store,
            coalescer: RequestCoalescer::new(),
            clock,
            metrics: CacheMetrics::new(),
        };
        inner.restore_counters();
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Return the cached value for `key`, computing and caching it on a miss.
    ///
    /// A valid memory entry is returned without invoking `compute`. Otherwise
    /// the call joins the fetch already running for `key`, or starts one. A
    /// fresh fetch first consults the durable tier; only if that has no valid
    /// record does `compute` run. A successful result is written to both tiers
    /// with `ttl` (or the configured default). A failed fetch is not cached; it
    /// is answered from an expired durable record when one exists, and
    /// propagated otherwise.
    pub async fn get<T, F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let value = self.get_value(key, compute, ttl).await?;
        decode(key.as_str(), value)
    }

    /// Untyped variant of [`get`](Self::get).
    pub async fn get_value<T, F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<JsonValue>
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        reject_reserved(key)?;
        let inner = &self.inner;
        inner.metrics.record_request();

        let now = inner.clock.now_millis();
        if let Some(entry) = inner.memory.lock().get_valid(key.as_str(), now) {
            inner.metrics.record_hit();
            trace!("Memory hit for {}", key);
            return Ok(entry.data.clone());
        }

        let ttl = ttl.unwrap_or_else(|| inner.config.read().default_ttl);
        let shared = Arc::clone(&self.inner);
        let owned_key = key.as_str().to_string();

        let flight = inner.coalescer.run(key.as_str(), move |id| async move {
            shared.fill(owned_key, id, compute, ttl).await
        });
        if flight.joined() {
            inner.metrics.record_coalesced();
            debug!("Joined in-flight fetch for {}", key);
        }
        flight.wait().await
    }

    /// Synchronous read: memory tier, then durable tier.
    ///
    /// A valid durable record is promoted into memory. A durable record that
    /// fails to decode or has expired is removed and reported as absent.
    pub fn get_sync(&self, key: &CacheKey) -> Option<JsonValue> {
        if is_reserved(key) {
            return None;
        }
        let inner = &self.inner;
        inner.metrics.record_request();
        let now = inner.clock.now_millis();

        if let Some(entry) = inner.memory.lock().get_valid(key.as_str(), now) {
            inner.metrics.record_hit();
            return Some(entry.data.clone());
        }

        match inner.read_durable(key.as_str(), now) {
            DurableRead::Valid(entry) => {
                inner.metrics.record_hit();
                let data = entry.data.clone();
                inner.insert_memory(entry);
                inner.refresh_stats();
                Some(data)
            }
            DurableRead::Expired(_) => {
                inner.remove_durable(key.as_str());
                inner.refresh_stats();
                None
            }
            DurableRead::Missing | DurableRead::Healed => None,
        }
    }

    /// Typed variant of [`get_sync`](Self::get_sync). A value that does not
    /// decode as `T` is reported as absent.
    pub fn get_sync_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.get_sync(key)?;
        match decode(key.as_str(), value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Read without touching counters, promoting or healing anything.
    pub fn peek(&self, key: &CacheKey) -> Option<JsonValue> {
        if is_reserved(key) {
            return None;
        }
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        if let Some(entry) = inner.memory.lock().get_valid(key.as_str(), now) {
            return Some(entry.data.clone());
        }
        if !inner.config.read().persist_to_storage {
            return None;
        }
        let raw = inner.store.get(&inner.storage_key(key.as_str())).ok()??;
        serde_json::from_str::<CacheEntry>(&raw)
            .ok()
            .filter(|e| e.key == key.as_str() && e.is_valid_at(now))
            .map(|e| e.data)
    }

    /// `true` if either tier holds a valid entry for `key`.
    pub fn has(&self, key: &CacheKey) -> bool {
        self.peek(key).is_some()
    }

    /// Store `value` in both tiers.
    pub fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) -> Result<()> {
        reject_reserved(key)?;
        let data = serde_json::to_value(value)?;
        let ttl = ttl.unwrap_or_else(|| self.inner.config.read().default_ttl);
        self.inner.store_entry(key.as_str(), data, ttl);
        Ok(())
    }

    /// Remove `key` from both tiers and forget any fetch registered for it.
    ///
    /// A fetch already running for the key still answers its callers but no
    /// longer writes its result into the cache.
    pub fn delete(&self, key: &CacheKey) -> bool {
        if is_reserved(key) {
            return false;
        }
        let inner = &self.inner;
        let in_memory = inner.memory.lock().remove(key.as_str()).is_some();
        let cancelled = inner.coalescer.cancel(key.as_str());
        if cancelled {
            debug!("Cancelled in-flight fetch for {}", key);
        }
        let durable = inner.remove_durable(key.as_str());
        inner.refresh_stats();
        in_memory || durable
    }

    /// Empty both tiers, including every durable record under the storage
    /// prefix, and reset the counters.
    pub fn clear(&self) {
        let inner = &self.inner;
        inner.memory.lock().clear();
        inner.coalescer.cancel_all();

        let prefix = inner.config.read().storage_prefix.clone();
        match inner.store.keys_with_prefix(&prefix) {
            Ok(keys) => {
                for storage_key in keys {
                    if let Err(e) = inner.store.remove(&storage_key) {
                        warn!("Failed to remove {}: {}", storage_key, e);
                    }
                }
            }
            Err(e) => warn!("Failed to enumerate {}*: {}", prefix, e),
        }

        inner.metrics.reset();
        info!("Cache cleared");
    }

    /// Remove expired entries from both tiers; returns how many were removed.
    ///
    /// Durable records that no longer decode are removed as well.
    pub fn clear_expired(&self) -> usize {
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let mut removed = inner.memory.lock().remove_expired(now);

        let (persist, prefix) = {
            let config = inner.config.read();
            (config.persist_to_storage, config.storage_prefix.clone())
        };
        if persist {
            for storage_key in inner.data_keys(&prefix) {
                let logical = &storage_key[prefix.len()..];
                match inner.read_durable(logical, now) {
                    DurableRead::Valid(_) | DurableRead::Missing => {}
                    DurableRead::Healed => removed += 1,
                    DurableRead::Expired(_) => {
                        if inner.remove_durable(logical) {
                            removed += 1;
                        }
                    }
                }
            }
        }

        inner.refresh_stats();
        if removed > 0 {
            debug!("Expiry sweep removed {} entries", removed);
        }
        removed
    }

    /// Apply a partial configuration update.
    ///
    /// Shrinking `max_memory_items` evicts the oldest-inserted entries right
    /// away. Changing the prefix does not migrate existing records.
    pub fn update_config(&self, update: CacheConfigUpdate) {
        let inner = &self.inner;
        let capacity = {
            let mut config = inner.config.write();
            config.apply(update);
            config.max_memory_items
        };
        let evicted = inner.memory.lock().set_capacity(capacity);
        for key in &evicted {
            inner.metrics.record_eviction();
            trace!("Evicted {} after capacity change", key);
        }
        inner.refresh_stats();
        info!("Cache configuration updated (max_memory_items={})", capacity);
    }

    /// Current configuration.
    pub fn config(&self) -> CacheConfig {
        self.inner.config.read().clone()
    }

    /// Observational snapshot.
    ///
    /// The durable item count is taken from the store at call time.
    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        let record = inner.metrics.record();
        CacheStats {
            memory_items: inner.memory.lock().len(),
            storage_items: inner.storage_count(),
            total_requests: record.total_requests,
            cache_hits: record.cache_hits,
            hit_rate: inner.metrics.hit_rate(),
        }
    }

    /// Detailed counters.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.coalescer.len()
    }

    /// Keys currently in the memory tier, oldest-inserted first.
    pub fn memory_keys(&self) -> Vec<String> {
        self.inner.memory.lock().keys().map(str::to_string).collect()
    }

    /// The clock this cache stamps entries with.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    fn downgrade(&self) -> Weak<CacheInner> {
        Arc::downgrade(&self.inner)
    }
}

impl CacheInner {
    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.config.read().storage_prefix, key)
    }

    fn stats_key(&self) -> String {
        self.storage_key(STATS_KEY)
    }

    /// Body of a coalesced fetch for `key`.
    async fn fill<T, F, Fut>(
        self: Arc<Self>,
        key: String,
        id: FlightId,
        compute: F,
        ttl: Duration,
    ) -> Result<JsonValue>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let stale = match self.read_durable(&key, self.clock.now_millis()) {
            DurableRead::Valid(entry) => {
                self.metrics.record_hit();
                debug!("Durable hit for {}", key);
                let data = entry.data.clone();
                self.insert_memory(entry);
                self.refresh_stats();
                return Ok(data);
            }
            DurableRead::Expired(entry) => Some(entry),
            DurableRead::Missing | DurableRead::Healed => None,
        };

        trace!("Fetching {}", key);
        let computed = compute()
            .await
            .and_then(|value| serde_json::to_value(value).map_err(Error::from));

        match computed {
            Ok(data) => {
                if self.coalescer.is_current(&key, id) {
                    self.store_entry(&key, data.clone(), ttl);
                } else {
                    debug!("Discarding result for {}: deleted while in flight", key);
                }
                Ok(data)
            }
            Err(e) => match stale {
                Some(entry) => {
                    self.metrics.record_stale_fallback();
                    warn!(
                        "Fetch of {} failed ({}); serving stale copy aged {:?}",
                        key,
                        e,
                        entry.age(self.clock.now_millis())
                    );
                    Ok(entry.data)
                }
                None => {
                    debug!("Fetch of {} failed: {}", key, e);
                    Err(e)
                }
            },
        }
    }

    fn store_entry(&self, key: &str, data: JsonValue, ttl: Duration) {
        let entry = CacheEntry::new(key, data, self.clock.now_millis(), ttl);
        if self.config.read().persist_to_storage {
            match serde_json::to_string(&entry) {
                Ok(raw) => {
                    if let Err(e) = self.store.set(&self.storage_key(key), &raw) {
                        warn!("Failed to persist {}: {}", key, e);
                    }
                }
                Err(e) => warn!("Failed to serialize {}: {}", key, e),
            }
        }
        self.insert_memory(entry);
        self.refresh_stats();
    }

    fn insert_memory(&self, entry: CacheEntry) {
        let evicted = self.memory.lock().insert(entry);
        for key in evicted {
            self.metrics.record_eviction();
            trace!("Evicted {} from memory", key);
        }
    }

    fn read_durable(&self, key: &str, now: i64) -> DurableRead {
        if !self.config.read().persist_to_storage {
            return DurableRead::Missing;
        }
        let storage_key = self.storage_key(key);
        let raw = match self.store.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return DurableRead::Missing,
            Err(e) => {
                warn!("Durable read of {} failed: {}", key, e);
                return DurableRead::Missing;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.key == key => {
                if entry.is_valid_at(now) {
                    DurableRead::Valid(entry)
                } else {
                    DurableRead::Expired(entry)
                }
            }
            Ok(entry) => {
                warn!("Durable record {} claims key {}; removing", storage_key, entry.key);
                self.heal(&storage_key)
            }
            Err(e) => {
                warn!("Durable record {} is corrupt ({}); removing", storage_key, e);
                self.heal(&storage_key)
            }
        }
    }

    fn heal(&self, storage_key: &str) -> DurableRead {
        match self.store.remove(storage_key) {
            Ok(()) => {
                self.metrics.record_self_heal();
                DurableRead::Healed
            }
            Err(e) => {
                warn!("Failed to remove {}: {}", storage_key, e);
                DurableRead::Missing
            }
        }
    }

    fn remove_durable(&self, key: &str) -> bool {
        if !self.config.read().persist_to_storage {
            return false;
        }
        let storage_key = self.storage_key(key);
        let existed = matches!(self.store.get(&storage_key), Ok(Some(_)));
        if let Err(e) = self.store.remove(&storage_key) {
            warn!("Failed to remove {}: {}", storage_key, e);
            return false;
        }
        existed
    }

    /// Durable keys under `prefix`, excluding the stats record.
    fn data_keys(&self, prefix: &str) -> Vec<String> {
        let stats_key = format!("{}{}", prefix, STATS_KEY);
        match self.store.keys_with_prefix(prefix) {
            Ok(keys) => keys.into_iter().filter(|k| *k != stats_key).collect(),
            Err(e) => {
                warn!("Failed to enumerate {}*: {}", prefix, e);
                Vec::new()
            }
        }
    }

    fn storage_count(&self) -> usize {
        let (persist, prefix) = {
            let config = self.config.read();
            (config.persist_to_storage, config.storage_prefix.clone())
        };
        if persist {
            self.data_keys(&prefix).len()
        } else {
            0
        }
    }

    /// Persist the cumulative counters.
    fn refresh_stats(&self) {
        if !self.config.read().persist_to_storage {
            return;
        }
        match serde_json::to_string(&self.metrics.record()) {
            Ok(raw) => {
                if let Err(e) = self.store.set(&self.stats_key(), &raw) {
                    warn!("Failed to persist cache stats: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize cache stats: {}", e),
        }
    }

    fn restore_counters(&self) {
        if !self.config.read().persist_to_storage {
            return;
        }
        let Ok(Some(raw)) = self.store.get(&self.stats_key()) else {
            return;
        };
        match serde_json::from_str::<StatsRecord>(&raw) {
            Ok(record) => self.metrics.restore(record),
            Err(e) => {
                warn!("Discarding unreadable cache stats: {}", e);
                self.heal(&self.stats_key());
            }
        }
    }
}

/// The stats record lives beside the data records, so its logical name is
/// not available as a cache key.
fn is_reserved(key: &CacheKey) -> bool {
    key.as_str() == STATS_KEY
}

fn reject_reserved(key: &CacheKey) -> Result<()> {
    if is_reserved(key) {
        return Err(Error::ReservedKey(key.to_string()));
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(key: &str, value: JsonValue) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::deserialize(key, e.to_string()))
}

/// Start the background expiry sweep.
///
/// The task holds only a weak reference and ends once every handle to the
/// cache has been dropped.
pub fn spawn_sweeper(cache: &TieredCache, interval: Duration) -> JoinHandle<()> {
    let weak = cache.downgrade();
    // tokio rejects a zero period
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                trace!("Cache dropped; stopping expiry sweep");
                break;
            };
            let removed = TieredCache { inner }.clear_expired();
            trace!("Expiry sweep tick removed {}", removed);
        }
    })
}
