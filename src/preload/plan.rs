//! Preload plans.
//!
//! A plan is an ordered list of batches. Batches run strictly one after the
//! other; the resources inside one batch are fetched concurrently.

use serde::{Deserialize, Serialize};

use crate::resources::{DateRange, Resource, ResourceRequest};

/// A set of resources fetched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Name used in logs and reports
    pub name: String,
    /// Resources fetched concurrently
    pub resources: Vec<Resource>,
}

impl Batch {
    pub fn new(name: impl Into<String>, resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            name: name.into(),
            resources: resources.into_iter().collect(),
        }
    }

    /// Requests for this batch, with `window` applied to ranged resources.
    pub fn requests(&self, window: &DateRange) -> Vec<ResourceRequest> {
        self.resources
            .iter()
            .map(|r| ResourceRequest::new(*r, Some(*window)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Ordered list of batches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreloadPlan {
    pub batches: Vec<Batch>,
}

impl PreloadPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch.
    pub fn batch(
        mut self,
        name: impl Into<String>,
        resources: impl IntoIterator<Item = Resource>,
    ) -> Self {
        self.batches.push(Batch::new(name, resources));
        self
    }

    /// The dashboard's first-load plan.
    ///
    /// Reference data goes first because every page needs it, then the
    /// aggregate sales figures, then the heavier trend and order listings.
    pub fn standard() -> Self {
        Self::new()
            .batch(
                "reference",
                [Resource::Stores, Resource::Products, Resource::DashboardKpis],
            )
            .batch(
                "sales",
                [
                    Resource::SalesKpis,
                    Resource::BestSellers,
                    Resource::StoreRevenueRanking,
                ],
            )
            .batch(
                "trends",
                [
                    Resource::SalesTrend,
                    Resource::CategoryRevenue,
                    Resource::RecentOrders,
                ],
            )
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of resource fetches across all batches.
    pub fn total_resources(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}
