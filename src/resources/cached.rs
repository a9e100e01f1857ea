//! Resource reads routed through the tiered cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use super::{DateRange, Resource, ResourceClient, ResourceRequest, DATE_FORMAT};
use crate::cache::TieredCache;
use crate::error::{Error, Result};

/// One async method per resource, each backed by [`TieredCache::get`].
///
/// Cloning is cheap; clones share the cache and the client.
#[derive(Clone)]
pub struct CachedResources {
    cache: TieredCache,
    client: Arc<dyn ResourceClient>,
    fetch_timeout: Option<Duration>,
}

impl std::fmt::Debug for CachedResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedResources")
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl CachedResources {
    pub fn new(cache: TieredCache, client: Arc<dyn ResourceClient>) -> Self {
        Self {
            cache,
            client,
            fetch_timeout: None,
        }
    }

    /// Bound every network fetch. A fetch that runs out of time fails with
    /// [`Error::Timeout`] and is not cached.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Fetch `request` through the cache with the default TTL.
    pub async fn fetch(&self, request: &ResourceRequest) -> Result<JsonValue> {
        self.fetch_with_ttl(request, None).await
    }

    /// Fetch `request` through the cache.
    pub async fn fetch_with_ttl(
        &self,
        request: &ResourceRequest,
        ttl: Option<Duration>,
    ) -> Result<JsonValue> {
        let key = request.key();
        let client = Arc::clone(&self.client);
        let timeout = self.fetch_timeout;
        let owned = request.clone();
        let key_name = key.to_string();

        self.cache
            .get(
                &key,
                move || async move {
                    let fetch = client.fetch(&owned);
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, fetch)
                            .await
                            .unwrap_or_else(|_| {
                                Err(Error::Timeout {
                                    key: key_name,
                                    timeout_ms: limit.as_millis() as u64,
                                })
                            }),
                        None => fetch.await,
                    }
                },
                ttl,
            )
            .await
    }

    async fn list(&self, request: ResourceRequest) -> Result<Vec<JsonValue>> {
        let key = request.key();
        match self.fetch(&request).await? {
            JsonValue::Array(items) => Ok(items),
            // Some endpoints answer `null` for an empty list
            JsonValue::Null => Ok(Vec::new()),
            other => Err(Error::deserialize(
                key.as_str(),
                format!("expected a list, got {}", type_name(&other)),
            )),
        }
    }

    pub async fn dashboard_kpis(&self) -> Result<JsonValue> {
        self.fetch(&Resource::DashboardKpis.into()).await
    }

    pub async fn stores(&self) -> Result<Vec<JsonValue>> {
        self.list(Resource::Stores.into()).await
    }

    pub async fn products(&self) -> Result<Vec<JsonValue>> {
        self.list(Resource::Products.into()).await
    }

    pub async fn sales_kpis(&self, range: DateRange) -> Result<JsonValue> {
        self.fetch(&ResourceRequest::new(Resource::SalesKpis, Some(range)))
            .await
    }

    pub async fn best_sellers(&self, range: DateRange) -> Result<Vec<JsonValue>> {
        self.list(ResourceRequest::new(Resource::BestSellers, Some(range)))
            .await
    }

    pub async fn store_revenue_ranking(&self, range: DateRange) -> Result<Vec<JsonValue>> {
        self.list(ResourceRequest::new(
            Resource::StoreRevenueRanking,
            Some(range),
        ))
        .await
    }

    pub async fn sales_trend(&self, range: DateRange) -> Result<Vec<JsonValue>> {
        self.list(ResourceRequest::new(Resource::SalesTrend, Some(range)))
            .await
    }

    pub async fn category_revenue(&self, range: DateRange) -> Result<Vec<JsonValue>> {
        self.list(ResourceRequest::new(Resource::CategoryRevenue, Some(range)))
            .await
    }

    pub async fn recent_orders(&self) -> Result<Vec<JsonValue>> {
        self.list(Resource::RecentOrders.into()).await
    }

    /// Earliest order date across all historical records.
    pub async fn earliest_order_date(&self) -> Result<NaiveDate> {
        let payload = self.fetch(&Resource::EarliestOrderDate.into()).await?;
        parse_earliest_date(&payload)
    }
}

/// Extract the earliest order date from its payload.
///
/// Accepts a bare date string or an object carrying `earliestDate`,
/// `earliest_date` or `date`. Timestamps are cut to their date part.
pub fn parse_earliest_date(payload: &JsonValue) -> Result<NaiveDate> {
    let raw = match payload {
        JsonValue::String(s) => Some(s.as_str()),
        JsonValue::Object(map) => ["earliestDate", "earliest_date", "date"]
            .iter()
            .find_map(|field| map.get(*field).and_then(JsonValue::as_str)),
        _ => None,
    };
    let raw = raw.ok_or_else(|| {
        Error::deserialize(
            Resource::EarliestOrderDate.name(),
            format!("no date in {}", type_name(payload)),
        )
    })?;

    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).map_err(|e| {
        Error::deserialize(
            Resource::EarliestOrderDate.name(),
            format!("'{}': {}", raw, e),
        )
    })
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}
