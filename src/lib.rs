//! # dashcache - Response Cache and Warmup for the Retail Analytics Dashboard
//!
//! dashcache sits between the dashboard's pages and the analytics REST API. It
//! keeps fetched resources in a bounded memory tier backed by a durable store,
//! makes sure concurrent requests for the same resource share one network
//! call, and warms the whole cache in paced batches right after login so page
//! navigation reads from cache.
//!
//! ## Core Concepts
//!
//! - **Tiered cache**: bounded FIFO memory tier in front of a [`PersistentStore`](storage::PersistentStore)
//! - **Single-flight**: one in-flight fetch per cache key, shared by every caller
//! - **Resources**: the ten analytic endpoints the dashboard reads
//! - **Preload**: ordered batches with pacing, typed defaults on failure and a
//!   bounded completeness check
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Composition root (CLI / UI)                  │
//! └──────────────────────────────────────────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌───────────────────────────┐   ┌──────────────────────────────┐
//! │   PreloadOrchestrator     │──▶│       CachedResources        │
//! │ (batches, pacing, verify) │   │  (one method per resource)   │
//! └───────────────────────────┘   └──────────────────────────────┘
//!                                                 │
//!                                                 ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TieredCache                           │
//! │   MemoryTier (FIFO)  ·  RequestCoalescer  ·  PersistentStore │
//! └──────────────────────────────────────────────────────────────┘
//!                                                 │ miss
//!                                                 ▼
//!                                  ┌──────────────────────────────┐
//!                                  │  ResourceClient (HTTP API)   │
//!                                  └──────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use dashcache::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let cache = TieredCache::new(CacheConfig::default(), Arc::new(FileStore::open("store")?));
//!     let client = HttpResourceClient::new("https://analytics.example.com/api", Duration::from_secs(30))?;
//!     let resources = CachedResources::new(cache.clone(), Arc::new(client));
//!
//!     let report = PreloadOrchestrator::standard(resources, PreloadConfig::default())
//!         .run()
//!         .await?;
//!     println!("{} resources cached", report.loaded_count());
//!
//!     let stores = cache.get_sync(&Resource::Stores.key(None));
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use std::time::Duration;

    // Caching
    pub use crate::cache::{
        spawn_sweeper, CacheConfig, CacheConfigUpdate, CacheKey, CacheStats, TieredCache,
    };

    // Time
    pub use crate::clock::{Clock, ManualClock, SystemClock};

    // Error handling
    pub use crate::error::{Error, Result};

    // Warmup
    pub use crate::preload::{
        essentials_ready, PreloadConfig, PreloadOrchestrator, PreloadPlan, PreloadReport,
        PreloadState,
    };

    // Resources
    #[cfg(feature = "http")]
    pub use crate::resources::HttpResourceClient;
    pub use crate::resources::{CachedResources, DateRange, Resource, ResourceClient, ResourceRequest};

    // Storage
    pub use crate::storage::{FileStore, MemoryStore, PersistentStore};
}

/// Error types and result aliases.
pub mod error;

/// Wall-clock abstraction used to stamp and expire entries.
pub mod clock;

/// Durable key/value stores backing the slow cache tier.
pub mod storage;

/// Tiered cache engine: memory tier, durable tier and single-flight fetches.
pub mod cache;

/// Analytic resources and the clients that fetch them.
pub mod resources;

/// Bulk cache warmup.
pub mod preload;

/// Configuration loading.
pub mod config;

/// Logging setup.
pub mod telemetry;

pub use error::{Error, Result};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
