//! CLI module for dashcache
//!
//! Argument parsing and subcommand dispatch for the operator binary.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// dashcache - warm and inspect the analytics dashboard cache
#[derive(Parser, Debug, Clone)]
#[command(name = "dashcache")]
#[command(author = "Dashcache Contributors")]
#[command(version)]
#[command(about = "Warm and inspect the analytics dashboard cache", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Fetch every dashboard resource into the cache
    Preload(commands::preload::PreloadArgs),

    /// Show cache statistics
    Stats(commands::cache::StatsArgs),

    /// Print a cached value
    Get(commands::cache::GetArgs),

    /// Remove expired entries
    Sweep(commands::cache::SweepArgs),

    /// Remove every entry in the cache namespace
    Clear(commands::cache::ClearArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["dashcache", "preload"]).unwrap();
        assert!(matches!(cli.command, Commands::Preload(_)));
        assert_eq!(cli.output, OutputFormat::Human);
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["dashcache", "-vvvv", "stats"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_get_takes_key() {
        let cli = Cli::try_parse_from(["dashcache", "get", "stores", "--output", "json"]).unwrap();
        match &cli.command {
            Commands::Get(args) => assert_eq!(args.key, "stores"),
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["dashcache", "sweep", "-c", "dash.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("dash.toml")));
    }
}
