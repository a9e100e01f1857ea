//! Cache inspection commands: stats, get, sweep, clear

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use dashcache::cache::CacheKey;

/// Arguments for the stats command
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {}

impl StatsArgs {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let cache = ctx.open_cache()?;
        let stats = cache.stats();

        if ctx.is_json() {
            ctx.print_json(&stats)?;
        } else {
            println!("Stored items:   {}", stats.storage_items);
            println!("Requests:       {}", stats.total_requests);
            println!("Hits:           {}", stats.cache_hits);
            println!("Hit rate:       {:.1}%", stats.hit_rate * 100.0);
        }
        Ok(0)
    }
}

/// Arguments for the get command
#[derive(Parser, Debug, Clone)]
pub struct GetArgs {
    /// Logical cache key, e.g. `stores` or `sales_trend?from=2020-01-01&to=2024-12-31`
    pub key: String,
}

impl GetArgs {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let cache = ctx.open_cache()?;
        match cache.get_sync(&CacheKey::new(self.key.as_str())) {
            Some(value) => {
                ctx.print_json(&value)?;
                Ok(0)
            }
            None => {
                eprintln!("No valid entry for '{}'", self.key);
                Ok(1)
            }
        }
    }
}

/// Arguments for the sweep command
#[derive(Parser, Debug, Clone)]
pub struct SweepArgs {}

impl SweepArgs {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let cache = ctx.open_cache()?;
        let removed = cache.clear_expired();

        if ctx.is_json() {
            ctx.print_json(&serde_json::json!({ "removed": removed }))?;
        } else {
            println!("Removed {} expired entries", removed);
        }
        Ok(0)
    }
}

/// Arguments for the clear command
#[derive(Parser, Debug, Clone)]
pub struct ClearArgs {}

impl ClearArgs {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let cache = ctx.open_cache()?;
        let before = cache.stats().storage_items;
        cache.clear();

        if ctx.is_json() {
            ctx.print_json(&serde_json::json!({ "removed": before }))?;
        } else {
            println!(
                "Cleared {} entries under '{}'",
                before,
                ctx.config.cache.storage_prefix
            );
        }
        Ok(0)
    }
}
