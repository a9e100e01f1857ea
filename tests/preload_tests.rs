//! Preload Orchestrator Tests
//!
//! 1. Happy path - every resource cached, window derived from earliest date
//! 2. Fault isolation - failing resources get typed defaults, the run resolves
//! 3. Prerequisite - fallback date, or a fatal error when none is configured
//! 4. Ordering and backpressure - batch order, pacing, concurrency cap
//! 5. Lifecycle - state channel, single-shot runs

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;

use dashcache::cache::{CacheConfig, TieredCache};
use dashcache::error::Error;
use dashcache::preload::{
    essentials_ready, PreloadConfig, PreloadOrchestrator, PreloadPlan, PreloadState,
};
use dashcache::resources::{CachedResources, DateRange, Resource, ResourceRequest};

use common::{manual_cache, sample, Reply, ScriptedClient};

fn fast_config() -> PreloadConfig {
    PreloadConfig {
        batch_delay: Duration::from_millis(5),
        verify_attempts: 3,
        verify_interval: Duration::from_millis(5),
        fetch_timeout: Some(Duration::from_millis(500)),
        ..PreloadConfig::default()
    }
}

fn orchestrator(
    client: &Arc<ScriptedClient>,
    config: PreloadConfig,
) -> (PreloadOrchestrator, TieredCache) {
    let (cache, _, _) = manual_cache(CacheConfig::default());
    let resources = CachedResources::new(cache.clone(), Arc::clone(client) as _);
    (PreloadOrchestrator::standard(resources, config), cache)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn expected_window() -> DateRange {
    // Earliest date from the scripted client, today from the manual clock
    DateRange::new(date(2021, 2, 3), date(2024, 5, 1))
}

// ============================================================================
// Happy Path Tests
// ============================================================================

mod happy_path_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_full_run_caches_every_resource() {
        let client = Arc::new(ScriptedClient::healthy());
        let (orchestrator, cache) = orchestrator(&client, fast_config());

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.earliest_date, date(2021, 2, 3));
        assert!(!report.used_fallback_date);
        assert_eq!(report.window, expected_window());
        assert_eq!(report.loaded_count(), 9);
        assert_eq!(report.failed_count(), 0);
        assert!(report.ready);
        assert_eq!(report.verify_attempts, 1);
        assert!(essentials_ready(&cache));

        for batch in &PreloadPlan::standard().batches {
            for request in batch.requests(&expected_window()) {
                assert_eq!(cache.peek(&request.key()), Some(sample(request.resource)));
            }
        }
        assert_eq!(client.calls().len(), 10);
    }

    #[tokio::test]
    async fn test_ranged_resources_use_derived_window() {
        let client = Arc::new(ScriptedClient::healthy());
        let (orchestrator, cache) = orchestrator(&client, fast_config());
        orchestrator.run().await.unwrap();

        let trend = ResourceRequest::new(Resource::SalesTrend, Some(expected_window()));
        assert_eq!(
            trend.key().as_str(),
            "sales_trend?from=2021-02-03&to=2024-05-01"
        );
        assert!(cache.has(&trend.key()));
        assert!(client
            .calls()
            .iter()
            .any(|r| r.resource == Resource::SalesTrend && r.range == Some(expected_window())));
    }

    #[tokio::test]
    async fn test_warm_cache_needs_no_fetches() {
        let client = Arc::new(ScriptedClient::healthy());
        let (cache, _, _) = manual_cache(CacheConfig::default());

        let first = PreloadOrchestrator::standard(
            CachedResources::new(cache.clone(), Arc::clone(&client) as _),
            fast_config(),
        );
        first.run().await.unwrap();
        let fetched = client.calls().len();

        let second = PreloadOrchestrator::standard(
            CachedResources::new(cache.clone(), Arc::clone(&client) as _),
            fast_config(),
        );
        let report = second.run().await.unwrap();

        assert_eq!(client.calls().len(), fetched);
        assert_eq!(report.loaded_count(), 9);
        assert!(cache.stats().cache_hits >= 10);
    }
}

// ============================================================================
// Fault Isolation Tests
// ============================================================================

mod fault_isolation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let client = Arc::new(ScriptedClient::healthy());
        client.fail(Resource::BestSellers);
        let (orchestrator, cache) = orchestrator(&client, fast_config());

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.loaded_count(), 8);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.resource, Resource::BestSellers);
        assert!(failure.error.contains("best_sellers unavailable"));

        let window = expected_window();
        let best = Resource::BestSellers.key(Some(&window));
        assert_eq!(cache.peek(&best), Some(json!([])));

        for other in [Resource::SalesKpis, Resource::StoreRevenueRanking] {
            assert_eq!(cache.peek(&other.key(Some(&window))), Some(sample(other)));
        }
    }

    #[tokio::test]
    async fn test_object_resource_defaults_to_null() {
        let client = Arc::new(ScriptedClient::healthy());
        client.fail(Resource::SalesKpis);
        let (orchestrator, cache) = orchestrator(&client, fast_config());

        orchestrator.run().await.unwrap();

        let key = Resource::SalesKpis.key(Some(&expected_window()));
        assert_eq!(cache.peek(&key), Some(serde_json::Value::Null));
    }

    #[tokio::test]
    async fn test_missing_essentials_still_finish() {
        let client = Arc::new(ScriptedClient::healthy());
        client.fail(Resource::Stores);
        let (orchestrator, cache) = orchestrator(&client, fast_config());

        let report = orchestrator.run().await.unwrap();

        assert!(!report.ready);
        assert_eq!(report.verify_attempts, 3);
        assert!(!essentials_ready(&cache));
        assert_eq!(orchestrator.state(), PreloadState::Done);
    }

    #[tokio::test]
    async fn test_hung_fetch_times_out_into_default() {
        let client = Arc::new(ScriptedClient::healthy());
        client.reply(Resource::RecentOrders, Reply::Hang);
        let config = PreloadConfig {
            fetch_timeout: Some(Duration::from_millis(30)),
            ..fast_config()
        };
        let (orchestrator, cache) = orchestrator(&client, config);

        let report = orchestrator.run().await.unwrap();

        let failure = report.failures().next().unwrap();
        assert_eq!(failure.resource, Resource::RecentOrders);
        assert!(failure.error.contains("timed out"));
        assert_eq!(
            cache.peek(&Resource::RecentOrders.key(None)),
            Some(json!([]))
        );
        assert_eq!(cache.in_flight(), 0);
    }
}

// ============================================================================
// Prerequisite Tests
// ============================================================================

mod prerequisite_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fallback_date_when_prerequisite_fails() {
        let client = Arc::new(ScriptedClient::healthy());
        client.fail(Resource::EarliestOrderDate);
        let (orchestrator, _) = orchestrator(&client, fast_config());

        let report = orchestrator.run().await.unwrap();

        assert!(report.used_fallback_date);
        assert_eq!(report.earliest_date, date(2020, 1, 1));
        assert_eq!(report.window.from, date(2020, 1, 1));
        assert_eq!(report.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_date_uses_fallback() {
        let client = Arc::new(ScriptedClient::healthy());
        client.reply(Resource::EarliestOrderDate, Reply::Ok(json!({"nothing": true})));
        let (orchestrator, _) = orchestrator(&client, fast_config());

        let report = orchestrator.run().await.unwrap();
        assert!(report.used_fallback_date);
    }

    #[tokio::test]
    async fn test_prerequisite_failure_is_fatal_without_fallback() {
        let client = Arc::new(ScriptedClient::healthy());
        client.fail(Resource::EarliestOrderDate);
        let config = PreloadConfig {
            fallback_earliest_date: None,
            ..fast_config()
        };
        let (orchestrator, _) = orchestrator(&client, config);

        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, Error::Prerequisite(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(matches!(orchestrator.state(), PreloadState::Failed(_)));
        // Nothing past the prerequisite was fetched
        assert_eq!(client.calls().len(), 1);
    }
}

// ============================================================================
// Ordering and Backpressure Tests
// ============================================================================

mod ordering_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_batches_run_in_order() {
        let client = Arc::new(ScriptedClient::healthy().with_delay(Duration::from_millis(5)));
        let (orchestrator, _) = orchestrator(&client, fast_config());
        orchestrator.run().await.unwrap();

        let order: Vec<Resource> = client.calls().iter().map(|r| r.resource).collect();
        assert_eq!(order[0], Resource::EarliestOrderDate);

        let plan = PreloadPlan::standard();
        let mut offset = 1;
        for batch in &plan.batches {
            let mut seen = order[offset..offset + batch.len()].to_vec();
            let mut expected = batch.resources.clone();
            seen.sort();
            expected.sort();
            assert_eq!(seen, expected, "batch '{}' out of order", batch.name);
            offset += batch.len();
        }
    }

    #[tokio::test]
    async fn test_pacing_delay_between_batches() {
        let client = Arc::new(ScriptedClient::healthy());
        let config = PreloadConfig {
            batch_delay: Duration::from_millis(40),
            ..fast_config()
        };
        let (orchestrator, _) = orchestrator(&client, config);

        let report = orchestrator.run().await.unwrap();

        // Three batches, two pauses
        assert!(report.elapsed_ms >= 80, "elapsed {} ms", report.elapsed_ms);
    }

    #[tokio::test]
    async fn test_batch_members_run_concurrently() {
        let client = Arc::new(ScriptedClient::healthy().with_delay(Duration::from_millis(20)));
        let (orchestrator, _) = orchestrator(&client, fast_config());
        orchestrator.run().await.unwrap();

        assert_eq!(client.peak_concurrency(), 3);
    }

    #[tokio::test]
    async fn test_max_concurrency_caps_parallel_fetches() {
        let client = Arc::new(ScriptedClient::healthy().with_delay(Duration::from_millis(10)));
        let config = PreloadConfig {
            max_concurrency: Some(1),
            ..fast_config()
        };
        let (orchestrator, _) = orchestrator(&client, config);

        let report = orchestrator.run().await.unwrap();

        assert_eq!(client.peak_concurrency(), 1);
        assert_eq!(report.loaded_count(), 9);
    }
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

mod lifecycle_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_run_is_single_shot() {
        let client = Arc::new(ScriptedClient::healthy());
        let (orchestrator, _) = orchestrator(&client, fast_config());

        orchestrator.run().await.unwrap();
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, Error::PreloadAlreadyStarted));
    }

    #[tokio::test]
    async fn test_state_channel_reaches_done() {
        let client = Arc::new(ScriptedClient::healthy());
        let (orchestrator, _) = orchestrator(&client, fast_config());
        let mut rx = orchestrator.subscribe();
        assert_eq!(*rx.borrow(), PreloadState::NotStarted);

        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                let done = state.is_terminal();
                seen.push(state);
                if done {
                    break;
                }
            }
            seen
        });

        orchestrator.run().await.unwrap();
        let seen = watcher.await.unwrap();

        assert_eq!(seen.last(), Some(&PreloadState::Done));
        assert_eq!(orchestrator.state(), PreloadState::Done);
    }

    #[tokio::test]
    async fn test_custom_plan() {
        let client = Arc::new(ScriptedClient::healthy());
        let (cache, _, _) = manual_cache(CacheConfig::default());
        let plan = PreloadPlan::new().batch("only", [Resource::Stores]);
        let orchestrator = PreloadOrchestrator::new(
            CachedResources::new(cache.clone(), Arc::clone(&client) as _),
            plan,
            fast_config(),
        );

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.batches.len(), 1);
        assert_eq!(report.loaded_count(), 1);
        assert!(!report.ready);
        assert_eq!(client.calls_for(Resource::Products), 0);
    }
}
