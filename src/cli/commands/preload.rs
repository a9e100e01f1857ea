//! Preload command - warm the cache from the analytics API

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use dashcache::preload::{PreloadReport, PreloadState};
use tokio::sync::watch;

/// Arguments for the preload command
#[derive(Parser, Debug, Clone)]
pub struct PreloadArgs {
    /// Override the analytics API base URL
    #[arg(long, env = "DASHCACHE_BASE_URL")]
    pub base_url: Option<String>,

    /// Cap on simultaneous fetches inside a batch
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Fail instead of falling back when the earliest order date is unavailable
    #[arg(long)]
    pub no_fallback: bool,
}

impl PreloadArgs {
    #[cfg(feature = "http")]
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        use anyhow::Context;
        use dashcache::cache::spawn_sweeper;
        use dashcache::preload::PreloadOrchestrator;
        use dashcache::resources::{CachedResources, HttpResourceClient};
        use std::sync::Arc;

        let base_url = self
            .base_url
            .as_deref()
            .unwrap_or(&ctx.config.backend.base_url);
        let client = HttpResourceClient::new(base_url, ctx.config.backend.request_timeout)
            .context("Failed to create API client")?;

        let mut config = ctx.config.preload.clone();
        if self.max_concurrency.is_some() {
            config.max_concurrency = self.max_concurrency;
        }
        if self.no_fallback {
            config.fallback_earliest_date = None;
        }

        let cache = ctx.open_cache()?;
        let sweeper = spawn_sweeper(&cache, ctx.config.cache.sweep_interval);
        let resources = CachedResources::new(cache, Arc::new(client));
        let orchestrator = PreloadOrchestrator::standard(resources, config);

        let progress =
            (!ctx.is_json()).then(|| tokio::spawn(show_progress(orchestrator.subscribe())));
        let outcome = orchestrator.run().await;
        if let Some(progress) = progress {
            let _ = progress.await;
        }
        sweeper.abort();

        let report = outcome?;
        if ctx.is_json() {
            ctx.print_json(&report)?;
        } else {
            print_report(&report, ctx.verbosity);
        }
        Ok(0)
    }

    #[cfg(not(feature = "http"))]
    pub async fn execute(&self, _ctx: &CommandContext) -> Result<i32> {
        anyhow::bail!("dashcache was built without the `http` feature; preload is unavailable")
    }
}

/// Echo state transitions to stderr until the run ends
#[cfg_attr(not(feature = "http"), allow(dead_code))]
async fn show_progress(mut rx: watch::Receiver<PreloadState>) {
    loop {
        if rx.changed().await.is_err() {
            return;
        }
        let state = rx.borrow_and_update().clone();
        eprintln!("==> {}", state);
        if state.is_terminal() {
            return;
        }
    }
}

#[cfg_attr(not(feature = "http"), allow(dead_code))]
fn print_report(report: &PreloadReport, verbosity: u8) {
    println!();
    println!(
        "Window: {}{}",
        report.window,
        if report.used_fallback_date {
            " (fallback start date)"
        } else {
            ""
        }
    );
    for batch in &report.batches {
        println!(
            "  {:<12} {} loaded, {} failed ({} ms)",
            batch.name,
            batch.loaded.len(),
            batch.failed.len(),
            batch.elapsed_ms
        );
        if verbosity > 0 {
            for key in &batch.loaded {
                println!("    + {}", key);
            }
        }
        for failure in &batch.failed {
            println!("    ! {}: {}", failure.key, failure.error);
        }
    }
    println!(
        "Essential data {} after {} check(s); total {} ms",
        if report.ready { "ready" } else { "incomplete" },
        report.verify_attempts,
        report.elapsed_ms
    );
}
