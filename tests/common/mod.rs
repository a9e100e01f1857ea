//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};

use dashcache::cache::{CacheConfig, TieredCache};
use dashcache::clock::{Clock, ManualClock};
use dashcache::error::{Error, Result};
use dashcache::resources::{Resource, ResourceClient, ResourceRequest};
use dashcache::storage::{MemoryStore, PersistentStore};

/// Scripted answer for one resource.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(JsonValue),
    Fail(String),
    /// Never answers
    Hang,
}

/// Resource client answering from a script, recording every call.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<HashMap<Resource, Reply>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ResourceRequest>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedClient {
    /// Client answering every resource with a small plausible payload.
    pub fn healthy() -> Self {
        let client = Self::default();
        for resource in Resource::ALL {
            client.reply(resource, Reply::Ok(sample(resource)));
        }
        client
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(&self, resource: Resource, reply: Reply) {
        self.replies.lock().insert(resource, reply);
    }

    pub fn fail(&self, resource: Resource) {
        self.reply(resource, Reply::Fail(format!("{} unavailable", resource)));
    }

    pub fn calls(&self) -> Vec<ResourceRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, resource: Resource) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.resource == resource)
            .count()
    }

    /// Most fetches that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceClient for ScriptedClient {
    async fn fetch(&self, request: &ResourceRequest) -> Result<JsonValue> {
        self.calls.lock().push(request.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .get(&request.resource)
            .cloned()
            .unwrap_or_else(|| Reply::Fail("no reply scripted".into()));

        let outcome = match reply {
            Reply::Ok(value) => Ok(value),
            Reply::Fail(message) => Err(Error::fetch(request.resource.name(), message)),
            Reply::Hang => futures::future::pending().await,
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Small payload of the right shape for `resource`.
pub fn sample(resource: Resource) -> JsonValue {
    match resource {
        Resource::EarliestOrderDate => json!({ "earliestDate": "2021-02-03" }),
        Resource::DashboardKpis => json!({ "revenue": 125000.5, "orders": 812 }),
        Resource::SalesKpis => json!({ "revenue": 4200, "averageTicket": 38.2 }),
        Resource::Stores => json!([{ "id": 1, "name": "Centro" }, { "id": 2, "name": "Norte" }]),
        Resource::Products => json!([{ "id": 10, "name": "Cafe" }]),
        other => json!([{ "resource": other.name() }]),
    }
}

/// Cache over a fresh in-process store, stamped by a manual clock.
pub fn manual_cache(config: CacheConfig) -> (TieredCache, Arc<MemoryStore>, Arc<ManualClock>) {
    // 2024-05-01T00:00:00Z
    let clock = Arc::new(ManualClock::new(1_714_521_600_000));
    let store = Arc::new(MemoryStore::new());
    let cache = TieredCache::with_clock(
        config,
        Arc::clone(&store) as Arc<dyn PersistentStore>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    (cache, store, clock)
}
