//! Configuration module for dashcache
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - User configuration (~/.dashcache/config.toml)
//! - Project configuration (./dashcache.toml)
//! - Environment variables
//!
//! Files may be TOML or JSON, chosen by extension. Later sources override
//! earlier ones key by key, so a project file only needs the settings it
//! changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheConfig, CacheConfigUpdate};
use crate::preload::PreloadConfig;
use crate::telemetry::LoggingConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache engine settings
    pub cache: CacheConfig,

    /// Warmup settings
    pub preload: PreloadConfig,

    /// Analytics API settings
    pub backend: BackendConfig,

    /// Durable store settings
    pub storage: StorageConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Analytics API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL every resource path is appended to
    pub base_url: String,

    /// Transport timeout for a single request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Durable store settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one file per cached record
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective store directory.
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| match dirs::home_dir() {
            Some(home) => home.join(".dashcache").join("store"),
            None => PathBuf::from(".dashcache").join("store"),
        })
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                let layer = Self::read_file(&path)?;
                merge_values(&mut merged, layer);
            }
        }

        let mut config: Config =
            serde_json::from_value(merged).context("Invalid configuration")?;

        // Apply environment variable overrides
        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Load from a specific file only, without environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;
        merge_values(&mut merged, Self::read_file(path.as_ref())?);
        serde_json::from_value(merged)
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        // Explicit path takes priority
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = Vec::new();

        // Environment variable, else user config
        if let Ok(env_config) = std::env::var("DASHCACHE_CONFIG") {
            paths.push(PathBuf::from(env_config));
        } else if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".dashcache").join("config.toml"));
        }

        // Project config (current directory)
        paths.push(PathBuf::from("dashcache.toml"));

        paths
    }

    /// Parse one configuration file into a generic tree
    fn read_file(path: &Path) -> Result<JsonValue> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        // Determine format based on extension
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let value = match extension {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };
        Ok(value)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // DASHCACHE_BASE_URL
        if let Ok(url) = std::env::var("DASHCACHE_BASE_URL") {
            self.backend.base_url = url;
        }

        // DASHCACHE_STORAGE_DIR
        if let Ok(dir) = std::env::var("DASHCACHE_STORAGE_DIR") {
            self.storage.dir = Some(PathBuf::from(dir));
        }

        // DASHCACHE_DEFAULT_TTL, humantime syntax ("90s", "5m")
        if let Ok(ttl) = std::env::var("DASHCACHE_DEFAULT_TTL") {
            let update: CacheConfigUpdate =
                serde_json::from_value(serde_json::json!({ "default_ttl": ttl }))
                    .with_context(|| format!("Invalid DASHCACHE_DEFAULT_TTL '{}'", ttl))?;
            self.cache.apply(update);
        }

        // DASHCACHE_MAX_MEMORY_ITEMS
        if let Ok(max) = std::env::var("DASHCACHE_MAX_MEMORY_ITEMS") {
            self.cache.max_memory_items = max
                .parse()
                .with_context(|| format!("Invalid DASHCACHE_MAX_MEMORY_ITEMS '{}'", max))?;
        }

        // DASHCACHE_LOG_LEVEL
        if let Ok(level) = std::env::var("DASHCACHE_LOG_LEVEL") {
            self.logging.level = level.parse()?;
        }

        Ok(())
    }
}

/// Recursively overlay `layer` onto `base`. Tables merge key by key; any other
/// value in `layer` replaces the one in `base`.
fn merge_values(base: &mut JsonValue, layer: JsonValue) {
    match (base, layer) {
        (JsonValue::Object(base), JsonValue::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
