//! Valuation Service
//!
//! Loads instruments and positions, keeps every position and portfolio
//! valuation current as ticks arrive and shuts down gracefully on Ctrl+C or
//! SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use valuation_service::{
    config, graceful_shutdown, initialize_logging, load_configuration, setup_signal_handlers, ServiceState,
};

#[derive(Debug, Parser)]
#[command(name = "valuation-service", version, about = "Real-time portfolio valuation service")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instruments CSV (overrides configuration)
    #[arg(long)]
    instruments: Option<PathBuf>,

    /// Positions CSV (overrides configuration)
    #[arg(long)]
    positions: Option<PathBuf>,

    /// Do not start the simulated feed
    #[arg(long)]
    no_feed: bool,

    /// Log level (overrides configuration)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = load_configuration(args.config.as_deref())?;
    if let Some(path) = args.instruments {
        config.service.instruments_file = Some(path);
    }
    if let Some(path) = args.positions {
        config.service.positions_file = Some(path);
    }
    if args.no_feed {
        config.feed.enabled = false;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config::validate_config(&config)?;

    if args.print_config {
        println!("{}", config::render_config(&config)?);
        return Ok(());
    }

    let _log_guard = initialize_logging(&config.logging)?;
    info!("Starting Valuation Service v{} (engine v{})", env!("CARGO_PKG_VERSION"), valuation_engine::VERSION);

    let service_state = Arc::new(ServiceState::new(config).await.context("Failed to initialize service")?);
    info!("Service state initialized");

    let shutdown_signal = setup_signal_handlers()?;
    info!("Signal handlers configured");

    service_state.start_reporting().await?;
    service_state.start_feed().await?;

    info!("Valuation Service is running. Press Ctrl+C to shutdown gracefully.");
    let _ = shutdown_signal.await;

    info!("Shutdown signal received. Initiating graceful shutdown...");
    graceful_shutdown(service_state).await?;

    info!("Valuation Service shutdown complete");
    Ok(())
}
