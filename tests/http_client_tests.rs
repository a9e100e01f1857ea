//! HTTP resource client tests against a mock analytics API.

#![cfg(feature = "http")]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dashcache::cache::{CacheConfig, TieredCache};
use dashcache::error::Error;
use dashcache::resources::{
    CachedResources, DateRange, HttpResourceClient, Resource, ResourceClient, ResourceRequest,
};

fn client_for(server: &MockServer) -> HttpResourceClient {
    HttpResourceClient::new(&format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap()
}

fn window() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
    )
}

#[tokio::test]
async fn test_ranged_request_sends_window_as_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sales/best-sellers"))
        .and(query_param("from", "2023-01-01"))
        .and(query_param("to", "2023-12-31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"sku": "A1"}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = ResourceRequest::new(Resource::BestSellers, Some(window()));
    let body = client.fetch(&request).await.unwrap();

    assert_eq!(body, json!([{"sku": "A1"}]));
}

#[tokio::test]
async fn test_unranged_request_has_no_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stores"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    // The window is dropped for resources that do not take one
    let request = ResourceRequest::new(Resource::Stores, Some(window()));
    client.fetch(&request).await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].url.query(), None);
}

#[tokio::test]
async fn test_server_error_is_fetch_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .fetch(&ResourceRequest::from(Resource::Products))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Http(_)));
    assert!(err.is_fetch_failure());
}

#[tokio::test]
async fn test_cached_resources_hit_network_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stores"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": 1, "name": "Centro"}]))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = TieredCache::in_memory(CacheConfig::default());
    let resources = CachedResources::new(cache.clone(), Arc::new(client_for(&server)));

    // Concurrent callers share the flight, later callers hit memory
    let (a, b) = tokio::join!(resources.stores(), resources.stores());
    let c = resources.stores().await.unwrap();

    assert_eq!(a.unwrap(), c);
    assert_eq!(b.unwrap(), c);
    assert_eq!(c.len(), 1);
    assert!(cache.has(&Resource::Stores.key(None)));
}

#[tokio::test]
async fn test_failed_fetch_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/dashboard/kpis"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let cache = TieredCache::in_memory(CacheConfig::default());
    let resources = CachedResources::new(cache.clone(), Arc::new(client_for(&server)));

    assert!(resources.dashboard_kpis().await.is_err());
    assert!(!cache.has(&Resource::DashboardKpis.key(None)));
    assert!(resources.dashboard_kpis().await.is_err());
}
