//! Service configuration management
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, then `VALUATION__*` environment variables (`__` separates nested
//! keys, e.g. `VALUATION__ENGINE__WORKER_THREADS=8`). Command-line flags
//! are applied last by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use valuation_engine::EngineConfig;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Valuation Engine configuration
    pub engine: EngineConfig,

    /// Service-level configuration
    pub service: ServiceSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Simulated market data feed
    pub feed: FeedConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Instruments CSV loaded at startup
    pub instruments_file: Option<PathBuf>,

    /// Positions CSV loaded at startup
    pub positions_file: Option<PathBuf>,

    /// Portfolio assigned to rows of a two-column positions file
    pub default_portfolio_id: String,

    /// Interval between portfolio valuation reports in seconds
    pub report_interval_secs: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,

    /// Directory for a daily rolling log file (if None, logs to stdout only)
    pub directory: Option<PathBuf>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose a Prometheus endpoint
    pub enabled: bool,

    /// Metrics export port
    pub port: u16,

    /// Engine metrics publish interval in milliseconds
    pub interval_ms: u64,
}

/// Price generator used by the simulated feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStrategy {
    Gbm,
    Random,
}

/// Per-ticker geometric Brownian motion parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerModel {
    pub ticker: String,
    /// Expected return
    pub mu: f64,
    /// Volatility, also published as the tick's implied volatility
    pub sigma: f64,
    pub initial_price: f64,
}

/// Simulated market data feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Run the simulated feed
    pub enabled: bool,

    pub strategy: FeedStrategy,

    /// Tickers to publish; empty means every loaded stock
    pub tickers: Vec<String>,

    /// Minimum delay between ticks in milliseconds
    pub min_interval_ms: u64,

    /// Maximum delay between ticks in milliseconds
    pub max_interval_ms: u64,

    /// Seconds per year used to scale elapsed time in the GBM step
    pub year_seconds: f64,

    /// Per-ticker parameters
    pub models: Vec<TickerModel>,

    /// Parameters for tickers without an entry in `models`
    pub default_mu: f64,
    pub default_sigma: f64,
    pub default_initial_price: f64,

    /// Seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            instruments_file: None,
            positions_file: None,
            default_portfolio_id: "default".to_string(),
            report_interval_secs: 5,
            shutdown_timeout_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), directory: None }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, port: 9090, interval_ms: 1000 }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: FeedStrategy::Gbm,
            tickers: Vec::new(),
            min_interval_ms: 500,
            max_interval_ms: 2000,
            year_seconds: 7_257_600.0,
            models: vec![
                TickerModel { ticker: "AAPL".to_string(), mu: 0.08, sigma: 0.2, initial_price: 110.0 },
                TickerModel { ticker: "TELSA".to_string(), mu: 0.12, sigma: 0.3, initial_price: 450.0 },
            ],
            default_mu: 0.05,
            default_sigma: 0.2,
            default_initial_price: 100.0,
            seed: None,
        }
    }
}

impl ServiceSettings {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl MetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl FeedConfig {
    /// Parameters for a ticker, falling back to the defaults
    pub fn model_for(&self, ticker: &str) -> TickerModel {
        self.models
            .iter()
            .find(|model| model.ticker.eq_ignore_ascii_case(ticker))
            .cloned()
            .unwrap_or_else(|| TickerModel {
                ticker: ticker.to_string(),
                mu: self.default_mu,
                sigma: self.default_sigma,
                initial_price: self.default_initial_price,
            })
    }
}

/// Load configuration from defaults, an optional TOML file and the environment
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let defaults = config::Config::try_from(&ServiceConfig::default())
        .context("Failed to build default configuration")?;
    let mut builder = config::Config::builder().add_source(defaults);

    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml).required(true));
    }

    let config: ServiceConfig = builder
        .add_source(config::Environment::with_prefix("VALUATION").separator("__").try_parsing(true))
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    config.engine.validate().context("Invalid engine configuration")?;

    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow::anyhow!("Invalid log level: {}", config.logging.level)),
    }

    match config.logging.format.as_str() {
        "json" | "pretty" => {}
        _ => return Err(anyhow::anyhow!("Invalid log format: {}", config.logging.format)),
    }

    if config.metrics.enabled && config.metrics.port == 0 {
        return Err(anyhow::anyhow!("Invalid metrics port: {}", config.metrics.port));
    }

    if config.feed.min_interval_ms > config.feed.max_interval_ms {
        return Err(anyhow::anyhow!(
            "Feed min_interval_ms ({}) exceeds max_interval_ms ({})",
            config.feed.min_interval_ms,
            config.feed.max_interval_ms
        ));
    }

    if config.feed.year_seconds <= 0.0 || config.feed.year_seconds.is_nan() {
        return Err(anyhow::anyhow!("Feed year_seconds must be > 0"));
    }

    if config.service.report_interval_secs == 0 || config.metrics.interval_ms == 0 {
        return Err(anyhow::anyhow!("Report and metrics intervals must be > 0"));
    }

    if config.service.default_portfolio_id.trim().is_empty() {
        return Err(anyhow::anyhow!("default_portfolio_id is empty"));
    }

    Ok(())
}

/// Render configuration as TOML, e.g. to seed a config file
pub fn render_config(config: &ServiceConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.feed.model_for("aapl").initial_price, 110.0);
        assert_eq!(config.feed.model_for("MSFT").mu, 0.05);
        assert_eq!(config.service.report_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[engine]
worker_threads = 3

[engine.pricing]
default_risk_free_rate = 0.035

[logging]
format = "json"

[feed]
strategy = "random"
min_interval_ms = 10
max_interval_ms = 20
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.engine.worker_threads, 3);
        assert_eq!(config.engine.pricing.default_risk_free_rate, 0.035);
        assert_eq!(config.engine.pricing.rate_instrument_id, "USD-RFR");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.feed.strategy, FeedStrategy::Random);
        assert_eq!(config.feed.models.len(), 2);
    }

    #[test]
    fn test_bundled_config_file_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/valuation.toml");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.feed.model_for("TELSA").sigma, 0.3);
        assert_eq!(config.engine.ingestion.coalesce_window_ms, 5);
        assert!(config.service.instruments_file.is_some());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ServiceConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = ServiceConfig::default();
        config.feed.min_interval_ms = 5000;
        assert!(validate_config(&config).is_err());

        let mut config = ServiceConfig::default();
        config.engine.worker_threads = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_render_round_trips_through_toml() {
        let rendered = render_config(&ServiceConfig::default()).unwrap();
        let parsed: ServiceConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.feed.models, ServiceConfig::default().feed.models);
        assert_eq!(parsed.engine.lock_stripes, 64);
    }
}
