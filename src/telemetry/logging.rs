//! Structured logging layer using the tracing crate.
//!
//! Supports pretty, compact and JSON output to stderr. `RUST_LOG` overrides
//! the configured level when set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::{LogFormat, LogLevel, LoggingConfig};
use crate::error::{Error, Result};

/// Builder for the global subscriber.
#[derive(Debug, Clone, Default)]
pub struct LoggingBuilder {
    config: LoggingConfig,
}

impl LoggingBuilder {
    /// Create a new logging builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: LoggingConfig) -> Self {
        Self { config }
    }

    /// Set the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Set ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.config.ansi_colors = enabled;
        self
    }

    /// Include target in logs.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.config.with_target = enabled;
        self
    }

    /// Set filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.filter = Some(filter.into());
        self
    }

    /// Build and install the global subscriber.
    ///
    /// Fails with [`Error::Config`] if a subscriber is already installed.
    pub fn init(self) -> Result<()> {
        let env_filter = self.build_filter();
        let config = self.config;
        let registry = tracing_subscriber::registry().with(env_filter);

        let installed = match config.format {
            LogFormat::Pretty => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr)
                        .with_ansi(config.ansi_colors)
                        .with_target(config.with_target)
                        .with_file(config.with_file)
                        .with_line_number(config.with_file),
                )
                .try_init(),
            LogFormat::Compact => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr)
                        .with_ansi(config.ansi_colors)
                        .with_target(config.with_target)
                        .with_file(config.with_file)
                        .with_line_number(config.with_file),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.with_target)
                        .with_file(config.with_file)
                        .with_line_number(config.with_file),
                )
                .try_init(),
        };

        installed.map_err(|e| Error::Config(e.to_string()))
    }

    fn build_filter(&self) -> EnvFilter {
        let default_filter = self.config.level.to_string();

        if let Some(ref filter) = self.config.filter {
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(filter))
                .unwrap_or_else(|_| EnvFilter::new(&default_filter))
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter))
        }
    }
}

/// Initialize logging from a `-v` count, on top of `base`.
///
/// Zero keeps the configured level; each `-v` raises it one step, and `-vv`
/// or more also prints targets.
pub fn init_from_verbosity(verbosity: u8, base: LoggingConfig) -> Result<()> {
    let level = if verbosity == 0 {
        base.level
    } else {
        base.level.min(LogLevel::from_verbosity(verbosity))
    };
    let config = LoggingConfig {
        level,
        with_target: base.with_target || verbosity >= 2,
        with_file: base.with_file || verbosity >= 3,
        ..base
    };

    LoggingBuilder::from_config(config).init()
}
