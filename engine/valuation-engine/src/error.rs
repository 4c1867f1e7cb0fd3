//! Error types for the Valuation Engine

use crate::types::{InstrumentId, PortfolioId, PositionId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for Valuation Engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned to callers of the engine's boundary operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Tick for {instrument_id} at {as_of} is not newer than the current quote at {current}")]
    OutOfOrderTick { instrument_id: InstrumentId, as_of: Timestamp, current: Timestamp },

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),

    #[error("Unknown position: {0}")]
    UnknownPosition(PositionId),

    #[error("Unknown portfolio: {0}")]
    UnknownPortfolio(PortfolioId),

    #[error("Position already registered: {0}")]
    PositionAlreadyRegistered(PositionId),

    #[error("Instrument {0} is a market factor and cannot be held in a position")]
    NotTradable(InstrumentId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tick ingestion is closed")]
    IngestionClosed,
}

impl EngineError {
    /// Out-of-order ticks are expected on a live feed and never abort processing
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, EngineError::OutOfOrderTick { .. })
    }
}

/// Pricing failures. Contained per position: the position's valuation is
/// marked stale with the failure retained as the reason.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PricingError {
    #[error("Missing market data for {instrument_id}: {field}")]
    MissingMarketData { instrument_id: InstrumentId, field: MarketField },

    #[error("Invalid contract terms: {0}")]
    InvalidContractTerms(String),

    /// Terminal state: the contract is valued at intrinsic value with zero sensitivities
    #[error("Contract expired; valued at intrinsic {intrinsic_value}")]
    ExpiredContract { intrinsic_value: Decimal, unit_intrinsic: Decimal },
}

/// Market input named in a `MissingMarketData` failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketField {
    Price,
    ImpliedVolatility,
    RiskFreeRate,
}

impl std::fmt::Display for MarketField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketField::Price => write!(f, "price"),
            MarketField::ImpliedVolatility => write!(f, "implied volatility"),
            MarketField::RiskFreeRate => write!(f, "risk-free rate"),
        }
    }
}
