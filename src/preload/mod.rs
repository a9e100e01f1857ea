//! Bulk cache warmup run once after login.
//!
//! The orchestrator resolves the earliest order date, derives the default
//! `earliest -> today` window from it, then walks the [`PreloadPlan`] batch by
//! batch. A fixed pacing delay between batches keeps the number of outbound
//! requests bounded so the backend's connection pool is not exhausted; an
//! optional semaphore additionally caps parallelism inside a batch.
//!
//! Individual resource failures never fail the run. The failing resource's
//! cache slot is filled with its typed default and the failure is recorded in
//! the [`PreloadReport`]. The run only fails when the earliest-date
//! prerequisite cannot be resolved and no fallback date is configured.
//!
//! After the last batch the orchestrator polls [`essentials_ready`] a bounded
//! number of times and then finishes whether or not everything is present.
//!
//! Progress is published on a `watch` channel ([`PreloadOrchestrator::subscribe`])
//! for a loading screen to observe.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::cache::TieredCache;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::resources::{CachedResources, DateRange, Resource, ResourceRequest};

pub mod plan;

pub use plan::{Batch, PreloadPlan};

/// Preload configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Pause between consecutive batches
    #[serde(with = "humantime_serde")]
    pub batch_delay: Duration,
    /// Completeness checks after the last batch
    pub verify_attempts: u32,
    /// Pause between completeness checks
    #[serde(with = "humantime_serde")]
    pub verify_interval: Duration,
    /// Upper bound on a single resource fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Option<Duration>,
    /// Cap on simultaneous fetches inside one batch
    pub max_concurrency: Option<usize>,
    /// Window start used when the earliest-date fetch fails
    pub fallback_earliest_date: Option<NaiveDate>,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_millis(500),
            verify_attempts: 10,
            verify_interval: Duration::from_millis(200),
            fetch_timeout: Some(Duration::from_secs(30)),
            max_concurrency: None,
            fallback_earliest_date: NaiveDate::from_ymd_opt(2020, 1, 1),
        }
    }
}

/// Where a preload run currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum PreloadState {
    NotStarted,
    FetchingPrerequisite,
    /// Zero-based index of the batch being fetched
    RunningBatches(usize),
    /// One-based completeness check
    VerifyingCompleteness(u32),
    Done,
    Failed(String),
}

impl PreloadState {
    /// `true` once the run can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PreloadState::Done | PreloadState::Failed(_))
    }
}

impl fmt::Display for PreloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreloadState::NotStarted => write!(f, "not started"),
            PreloadState::FetchingPrerequisite => write!(f, "fetching earliest order date"),
            PreloadState::RunningBatches(i) => write!(f, "running batch {}", i + 1),
            PreloadState::VerifyingCompleteness(n) => write!(f, "verifying (attempt {})", n),
            PreloadState::Done => write!(f, "done"),
            PreloadState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A resource that could not be fetched and was replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedResource {
    pub resource: Resource,
    pub key: String,
    pub error: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub name: String,
    /// Cache keys fetched successfully
    pub loaded: Vec<String>,
    pub failed: Vec<FailedResource>,
    pub elapsed_ms: u64,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadReport {
    pub earliest_date: NaiveDate,
    /// The earliest date came from configuration, not the backend
    pub used_fallback_date: bool,
    pub window: DateRange,
    pub batches: Vec<BatchReport>,
    /// Essential keys were all present when the run finished
    pub ready: bool,
    pub verify_attempts: u32,
    pub elapsed_ms: u64,
}

impl PreloadReport {
    pub fn loaded_count(&self) -> usize {
        self.batches.iter().map(|b| b.loaded.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.batches.iter().map(|b| b.failed.len()).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailedResource> {
        self.batches.iter().flat_map(|b| b.failed.iter())
    }
}

/// `true` when the data every page needs is cached: a non-empty store list, a
/// non-empty product list and the dashboard KPI object.
///
/// Only reads; counters and durable records are left untouched.
pub fn essentials_ready(cache: &TieredCache) -> bool {
    let non_empty_list = |resource: Resource| {
        matches!(
            cache.peek(&resource.key(None)),
            Some(JsonValue::Array(items)) if !items.is_empty()
        )
    };
    let present = |resource: Resource| {
        cache
            .peek(&resource.key(None))
            .map(|v| !v.is_null())
            .unwrap_or(false)
    };

    non_empty_list(Resource::Stores)
        && non_empty_list(Resource::Products)
        && present(Resource::DashboardKpis)
}

/// Runs a [`PreloadPlan`] once.
pub struct PreloadOrchestrator {
    resources: CachedResources,
    plan: PreloadPlan,
    config: PreloadConfig,
    clock: Arc<dyn Clock>,
    semaphore: Option<Arc<Semaphore>>,
    started: AtomicBool,
    state: watch::Sender<PreloadState>,
}

impl fmt::Debug for PreloadOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadOrchestrator")
            .field("plan", &self.plan)
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl PreloadOrchestrator {
    /// Create an orchestrator for `plan`.
    ///
    /// A configured `fetch_timeout` is applied to every fetch the run issues.
    pub fn new(resources: CachedResources, plan: PreloadPlan, config: PreloadConfig) -> Self {
        let clock = resources.cache().clock();
        let resources = match config.fetch_timeout {
            Some(timeout) => resources.with_fetch_timeout(Some(timeout)),
            None => resources,
        };
        let semaphore = config
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let (state, _) = watch::channel(PreloadState::NotStarted);

        Self {
            resources,
            plan,
            config,
            clock,
            semaphore,
            started: AtomicBool::new(false),
            state,
        }
    }

    /// Orchestrator for the dashboard's standard plan.
    pub fn standard(resources: CachedResources, config: PreloadConfig) -> Self {
        Self::new(resources, PreloadPlan::standard(), config)
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PreloadState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> PreloadState {
        self.state.borrow().clone()
    }

    pub fn plan(&self) -> &PreloadPlan {
        &self.plan
    }

    /// Warm the cache. Only the first call runs; later calls fail with
    /// [`Error::PreloadAlreadyStarted`].
    pub async fn run(&self) -> Result<PreloadReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::PreloadAlreadyStarted);
        }
        let started = Instant::now();
        info!(
            "Starting preload: {} batches, {} resources",
            self.plan.len(),
            self.plan.total_resources()
        );

        self.transition(PreloadState::FetchingPrerequisite);
        let (earliest_date, used_fallback_date) = match self.resolve_earliest_date().await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Preload aborted: {}", e);
                self.transition(PreloadState::Failed(e.to_string()));
                return Err(e);
            }
        };
        let window = DateRange::new(earliest_date, self.clock.today());
        debug!("Preload window {}", window);

        let mut batches = Vec::with_capacity(self.plan.len());
        for (index, batch) in self.plan.batches.iter().enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
            self.transition(PreloadState::RunningBatches(index));
            batches.push(self.run_batch(batch, &window).await);
        }

        let (ready, verify_attempts) = self.verify().await;
        if ready {
            info!("Preload complete; essential data cached");
        } else {
            warn!(
                "Preload finished without essential data after {} checks",
                verify_attempts
            );
        }
        self.transition(PreloadState::Done);

        let report = PreloadReport {
            earliest_date,
            used_fallback_date,
            window,
            batches,
            ready,
            verify_attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Preloaded {} resources ({} failed) in {} ms",
            report.loaded_count(),
            report.failed_count(),
            report.elapsed_ms
        );
        Ok(report)
    }

    fn transition(&self, next: PreloadState) {
        debug!("Preload state: {}", next);
        self.state.send_replace(next);
    }

    async fn resolve_earliest_date(&self) -> Result<(NaiveDate, bool)> {
        match self.resources.earliest_order_date().await {
            Ok(date) => Ok((date, false)),
            Err(e) => match self.config.fallback_earliest_date {
                Some(fallback) => {
                    warn!(
                        "Earliest order date unavailable ({}); using {}",
                        e, fallback
                    );
                    Ok((fallback, true))
                }
                None => Err(Error::Prerequisite(e.to_string())),
            },
        }
    }

    async fn run_batch(&self, batch: &Batch, window: &DateRange) -> BatchReport {
        let started = Instant::now();
        debug!("Batch '{}': {} resources", batch.name, batch.len());

        let fetches = batch
            .requests(window)
            .into_iter()
            .map(|request| self.fetch_one(request));
        let outcomes = join_all(fetches).await;

        let mut report = BatchReport {
            name: batch.name.clone(),
            ..Default::default()
        };
        for (request, outcome) in outcomes {
            let key = request.key().into_string();
            match outcome {
                Ok(()) => report.loaded.push(key),
                Err(e) => {
                    warn!("Preload of {} failed, using default: {}", key, e);
                    self.store_default(&request);
                    report.failed.push(FailedResource {
                        resource: request.resource,
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    }

    async fn fetch_one(&self, request: ResourceRequest) -> (ResourceRequest, Result<()>) {
        let _permit = match &self.semaphore {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };
        let outcome = self.resources.fetch(&request).await.map(|_| ());
        (request, outcome)
    }

    fn store_default(&self, request: &ResourceRequest) {
        let default = request.resource.default_value();
        if let Err(e) = self.resources.cache().set(&request.key(), &default, None) {
            warn!("Failed to store default for {}: {}", request.key(), e);
        }
    }

    async fn verify(&self) -> (bool, u32) {
        let attempts = self.config.verify_attempts.max(1);
        let cache = self.resources.cache();
        for attempt in 1..=attempts {
            self.transition(PreloadState::VerifyingCompleteness(attempt));
            if essentials_ready(cache) {
                return (true, attempt);
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.verify_interval).await;
            }
        }
        (false, attempts)
    }
}
