//! Analytic resources served by the dashboard backend.
//!
//! Every resource is a JSON document whose business meaning is irrelevant to
//! the cache. What matters here is how a resource is addressed (its path and,
//! for date-ranged resources, the window), how it maps to a [`CacheKey`], and
//! what a page should see when the fetch fails ([`Resource::default_value`]).
//!
//! # Components
//!
//! - [`ResourceClient`]: the transport seam, one call per request
//! - [`HttpResourceClient`]: `reqwest` implementation against the REST API
//! - [`CachedResources`]: one async method per resource, routed through the
//!   tiered cache

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::cache::CacheKey;
use crate::error::{Error, Result};

pub mod cached;
#[cfg(feature = "http")]
pub mod http;

pub use cached::{parse_earliest_date, CachedResources};
#[cfg(feature = "http")]
pub use http::HttpResourceClient;

/// Format of dates in query parameters and cache keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// The analytic resources the dashboard reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    DashboardKpis,
    Stores,
    Products,
    SalesKpis,
    BestSellers,
    StoreRevenueRanking,
    SalesTrend,
    CategoryRevenue,
    RecentOrders,
    EarliestOrderDate,
}

impl Resource {
    /// Every resource, in declaration order.
    pub const ALL: [Resource; 10] = [
        Resource::DashboardKpis,
        Resource::Stores,
        Resource::Products,
        Resource::SalesKpis,
        Resource::BestSellers,
        Resource::StoreRevenueRanking,
        Resource::SalesTrend,
        Resource::CategoryRevenue,
        Resource::RecentOrders,
        Resource::EarliestOrderDate,
    ];

    /// Stable name, also the resource part of its cache key.
    pub fn name(self) -> &'static str {
        match self {
            Resource::DashboardKpis => "dashboard_kpis",
            Resource::Stores => "stores",
            Resource::Products => "products",
            Resource::SalesKpis => "sales_kpis",
            Resource::BestSellers => "best_sellers",
            Resource::StoreRevenueRanking => "store_revenue_ranking",
            Resource::SalesTrend => "sales_trend",
            Resource::CategoryRevenue => "category_revenue",
            Resource::RecentOrders => "recent_orders",
            Resource::EarliestOrderDate => "earliest_order_date",
        }
    }

    /// Endpoint path relative to the API base URL.
    pub fn path(self) -> &'static str {
        match self {
            Resource::DashboardKpis => "/dashboard/kpis",
            Resource::Stores => "/stores",
            Resource::Products => "/products",
            Resource::SalesKpis => "/sales/kpis",
            Resource::BestSellers => "/sales/best-sellers",
            Resource::StoreRevenueRanking => "/sales/store-ranking",
            Resource::SalesTrend => "/sales/trend",
            Resource::CategoryRevenue => "/sales/category-revenue",
            Resource::RecentOrders => "/orders/recent",
            Resource::EarliestOrderDate => "/orders/earliest-date",
        }
    }

    /// `true` if the response depends on a `from`/`to` window.
    pub fn is_ranged(self) -> bool {
        matches!(
            self,
            Resource::SalesKpis
                | Resource::BestSellers
                | Resource::StoreRevenueRanking
                | Resource::SalesTrend
                | Resource::CategoryRevenue
        )
    }

    /// `true` if the payload is a list.
    pub fn is_list(self) -> bool {
        !matches!(
            self,
            Resource::DashboardKpis | Resource::SalesKpis | Resource::EarliestOrderDate
        )
    }

    /// Value a page sees when the resource could not be fetched: an empty
    /// list for list resources, `null` for single objects.
    pub fn default_value(self) -> JsonValue {
        if self.is_list() {
            JsonValue::Array(Vec::new())
        } else {
            JsonValue::Null
        }
    }

    /// Cache key for this resource. The window only contributes for ranged
    /// resources.
    pub fn key(self, range: Option<&DateRange>) -> CacheKey {
        let builder = CacheKey::resource(self.name());
        match range.filter(|_| self.is_ranged()) {
            Some(range) => builder
                .param("from", range.from.format(DATE_FORMAT))
                .param("to", range.to.format(DATE_FORMAT))
                .build(),
            None => builder.build(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Resource::ALL
            .into_iter()
            .find(|r| r.name() == s)
            .ok_or_else(|| Error::fetch(s, "unknown resource"))
    }
}

/// Inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Query parameters in wire order.
    pub fn query(&self) -> [(&'static str, String); 2] {
        [
            ("from", self.from.format(DATE_FORMAT).to_string()),
            ("to", self.to.format(DATE_FORMAT).to_string()),
        ]
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.from.format(DATE_FORMAT),
            self.to.format(DATE_FORMAT)
        )
    }
}

/// One fetch: a resource plus its window, if it takes one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub resource: Resource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
}

impl ResourceRequest {
    /// Request for `resource`. A window passed to an unranged resource is
    /// dropped.
    pub fn new(resource: Resource, range: Option<DateRange>) -> Self {
        Self {
            resource,
            range: range.filter(|_| resource.is_ranged()),
        }
    }

    pub fn key(&self) -> CacheKey {
        self.resource.key(self.range.as_ref())
    }
}

impl From<Resource> for ResourceRequest {
    fn from(resource: Resource) -> Self {
        Self::new(resource, None)
    }
}

/// Transport used to fetch a resource.
///
/// Implementations must be idempotent and side-effect free from the cache's
/// point of view. Authentication and error translation belong here, not in
/// the cache.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch the JSON payload for `request`.
    async fn fetch(&self, request: &ResourceRequest) -> Result<JsonValue>;
}
