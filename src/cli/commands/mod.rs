//! Subcommands module for dashcache CLI
//!
//! This module contains all the subcommand implementations.

pub mod cache;
pub mod preload;

use anyhow::{Context, Result};
use dashcache::cache::TieredCache;
use dashcache::config::Config;
use dashcache::storage::FileStore;
use serde::Serialize;
use std::sync::Arc;

use crate::cli::{Cli, OutputFormat};

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output format
    pub output: OutputFormat,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &Cli, config: Config) -> Self {
        Self {
            config,
            output: cli.output,
            verbosity: cli.verbosity(),
        }
    }

    /// Open the cache over the configured store directory
    pub fn open_cache(&self) -> Result<TieredCache> {
        let dir = self.config.storage.dir();
        let store = FileStore::open(&dir)
            .with_context(|| format!("Failed to open cache store at {}", dir.display()))?;
        Ok(TieredCache::new(self.config.cache.clone(), Arc::new(store)))
    }

    pub fn is_json(&self) -> bool {
        self.output == OutputFormat::Json
    }

    /// Print `value` as pretty JSON on stdout
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
