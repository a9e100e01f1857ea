//! dashcache - warm and inspect the analytics dashboard cache
//!
//! This is the main entry point for the dashcache CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use dashcache::config::Config;
use dashcache::telemetry;

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<dashcache::Error>()
                .map(dashcache::Error::exit_code)
                .unwrap_or(1)
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32> {
    // Load configuration
    let config = Config::load(cli.config.as_ref())?;

    // Initialize logging from the configured level, raised by -v
    if let Err(e) = telemetry::init_from_verbosity(cli.verbosity(), config.logging.clone()) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    if cli.verbosity() >= 2 {
        eprintln!("dashcache v{}", VERSION);
    }

    // Create command context
    let ctx = CommandContext::new(&cli, config);

    // Execute the appropriate command
    match &cli.command {
        Commands::Preload(args) => args.execute(&ctx).await,
        Commands::Stats(args) => args.execute(&ctx).await,
        Commands::Get(args) => args.execute(&ctx).await,
        Commands::Sweep(args) => args.execute(&ctx).await,
        Commands::Clear(args) => args.execute(&ctx).await,
    }
}
