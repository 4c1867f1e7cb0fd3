//! Configuration for the Valuation Engine

use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default identifier of the risk-free rate market factor
pub const DEFAULT_RATE_INSTRUMENT_ID: &str = "USD-RFR";

/// Configuration for the Valuation Engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of threads in the pricing worker pool
    pub worker_threads: usize,

    /// Number of lock stripes serializing per-entity recomputes
    pub lock_stripes: usize,

    /// Pricing configuration
    pub pricing: PricingConfig,

    /// Tick ingestion configuration
    pub ingestion: IngestionConfig,

    /// Change stream configuration
    pub broadcast: BroadcastConfig,
}

/// Pricing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Instrument id under which risk-free rate ticks arrive
    pub rate_instrument_id: String,

    /// Rate seeded at startup until the first rate tick arrives
    pub default_risk_free_rate: f64,

    /// Contract multiplier applied to options loaded without one
    pub default_contract_multiplier: Decimal,

    /// Days per year used for time-to-expiry
    pub day_count_basis: f64,

    /// Decimal places kept on model unit prices
    pub price_scale: u32,
}

/// Tick ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Capacity of the bounded inbound tick channel
    pub channel_capacity: usize,

    /// How long a batch keeps collecting ticks after the first arrives
    pub coalesce_window_ms: u64,

    /// Maximum ticks collected into one batch
    pub max_batch: usize,
}

/// Change stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Publish valuation change events to subscribers
    pub enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            lock_stripes: 64,
            pricing: PricingConfig::default(),
            ingestion: IngestionConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            rate_instrument_id: DEFAULT_RATE_INSTRUMENT_ID.to_string(),
            default_risk_free_rate: 0.02,
            default_contract_multiplier: Decimal::from(100),
            day_count_basis: 365.0,
            price_scale: 4,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self { channel_capacity: 10_000, coalesce_window_ms: 5, max_batch: 1024 }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl IngestionConfig {
    /// Get coalesce window as Duration
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(threads) = std::env::var("VALUATION_WORKER_THREADS") {
            config.worker_threads = threads
                .parse()
                .map_err(|_| EngineError::InvalidConfig(format!("worker threads: {threads}")))?;
        }

        if let Ok(rate) = std::env::var("VALUATION_DEFAULT_RISK_FREE_RATE") {
            config.pricing.default_risk_free_rate = rate
                .parse()
                .map_err(|_| EngineError::InvalidConfig(format!("risk-free rate: {rate}")))?;
        }

        if let Ok(id) = std::env::var("VALUATION_RATE_INSTRUMENT_ID") {
            config.pricing.rate_instrument_id = id;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(EngineError::InvalidConfig("worker_threads must be > 0".to_string()));
        }
        if self.lock_stripes == 0 {
            return Err(EngineError::InvalidConfig("lock_stripes must be > 0".to_string()));
        }
        if self.pricing.rate_instrument_id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("rate_instrument_id is empty".to_string()));
        }
        if !self.pricing.default_risk_free_rate.is_finite() {
            return Err(EngineError::InvalidConfig("default_risk_free_rate is not finite".to_string()));
        }
        if self.pricing.default_contract_multiplier <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "default_contract_multiplier must be > 0".to_string(),
            ));
        }
        if self.pricing.day_count_basis.is_nan() || self.pricing.day_count_basis <= 0.0 {
            return Err(EngineError::InvalidConfig("day_count_basis must be > 0".to_string()));
        }
        if self.ingestion.channel_capacity == 0 || self.ingestion.max_batch == 0 {
            return Err(EngineError::InvalidConfig(
                "ingestion channel_capacity and max_batch must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pricing.rate_instrument_id, DEFAULT_RATE_INSTRUMENT_ID);
        assert_eq!(config.pricing.default_contract_multiplier, Decimal::from(100));
        assert_eq!(config.ingestion.coalesce_window(), Duration::from_millis(5));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig { worker_threads: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.pricing.default_contract_multiplier = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.pricing.day_count_basis = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_with_partial_fields() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"worker_threads": 2, "pricing": {"price_scale": 2}}"#).unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.pricing.price_scale, 2);
        assert_eq!(config.pricing.day_count_basis, 365.0);
        assert!(config.broadcast.enabled);
    }
}
