//! Valuation Service Library
//!
//! Runs the Valuation Engine as a process: layered configuration, tracing
//! setup, CSV loaders for instruments and positions, a simulated market data
//! feed, metrics export and graceful shutdown handling.

use anyhow::{Context, Result};
use std::path::Path;

pub mod config;
pub mod feed;
pub mod loader;
pub mod logging;
pub mod service;
pub mod signals;
pub mod telemetry;

pub use config::ServiceConfig;
pub use logging::initialize_logging;
pub use service::ServiceState;
pub use signals::{graceful_shutdown, setup_signal_handlers};

/// Load configuration from defaults, an optional file and environment variables
pub fn load_configuration(path: Option<&Path>) -> Result<ServiceConfig> {
    config::load_config(path).context("Failed to load service configuration")
}
