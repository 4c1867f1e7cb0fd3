//! Type definitions for the Valuation Engine

use crate::error::PricingError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Instrument identifier (ticker for stocks, contract code for options)
pub type InstrumentId = String;

/// Position identifier
pub type PositionId = String;

/// Portfolio identifier
pub type PortfolioId = String;

/// Market timestamp
pub type Timestamp = DateTime<Utc>;

/// Key of a valuation in the cache: either a position or a portfolio
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityId {
    Position(PositionId),
    Portfolio(PortfolioId),
}

impl EntityId {
    pub fn position(id: impl Into<PositionId>) -> Self {
        EntityId::Position(id.into())
    }

    pub fn portfolio(id: impl Into<PortfolioId>) -> Self {
        EntityId::Portfolio(id.into())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Position(id) => write!(f, "position:{id}"),
            EntityId::Portfolio(id) => write!(f, "portfolio:{id}"),
        }
    }
}

/// A single market-data update for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_id: InstrumentId,
    pub price: Decimal,
    pub implied_volatility: Option<f64>,
    pub as_of: Timestamp,
}

impl Tick {
    pub fn new(instrument_id: impl Into<InstrumentId>, price: Decimal, as_of: Timestamp) -> Self {
        Self { instrument_id: instrument_id.into(), price, implied_volatility: None, as_of }
    }

    pub fn with_volatility(mut self, implied_volatility: f64) -> Self {
        self.implied_volatility = Some(implied_volatility);
        self
    }

    /// Non-positive price, or an implied volatility that is not a positive
    /// finite number. Pricing from such a tick may fail.
    pub fn is_degenerate(&self) -> bool {
        self.price <= Decimal::ZERO || self.implied_volatility.is_some_and(|vol| !vol.is_finite() || vol <= 0.0)
    }
}

/// Latest observed quote for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub instrument_id: InstrumentId,
    pub price: Decimal,
    pub implied_volatility: Option<f64>,
    pub as_of: Timestamp,
}

/// A holding of one instrument, owned by exactly one portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: PositionId,
    pub instrument_id: InstrumentId,
    pub quantity: Decimal, // signed: negative is short
    pub portfolio_id: PortfolioId,
}

impl Position {
    pub fn new(
        position_id: impl Into<PositionId>,
        instrument_id: impl Into<InstrumentId>,
        quantity: Decimal,
        portfolio_id: impl Into<PortfolioId>,
    ) -> Self {
        Self {
            position_id: position_id.into(),
            instrument_id: instrument_id.into(),
            quantity,
            portfolio_id: portfolio_id.into(),
        }
    }
}

/// First-order sensitivities of a valuation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sensitivities {
    pub delta: f64,
    pub vega: f64,
}

impl Sensitivities {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, other: &Sensitivities) {
        self.delta += other.delta;
        self.vega += other.vega;
    }
}

/// Why a valuation is known to be computed from incomplete or outdated inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaleReason {
    /// Position pricing failed; the failure is retained
    Pricing(PricingError),
    /// Portfolio has constituents that are stale or not yet valued
    StaleConstituents { count: usize },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Pricing(err) => write!(f, "{err}"),
            StaleReason::StaleConstituents { count } => write!(f, "{count} stale constituent(s)"),
        }
    }
}

/// Latest known valuation of a position or portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub entity: EntityId,
    pub market_value: Decimal,
    /// Per-unit model price (positions only)
    pub unit_price: Option<Decimal>,
    pub sensitivities: Sensitivities,
    pub as_of: Timestamp,
    pub stale: Option<StaleReason>,
}

impl Valuation {
    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }

    pub fn pricing_error(&self) -> Option<&PricingError> {
        match &self.stale {
            Some(StaleReason::Pricing(err)) => Some(err),
            _ => None,
        }
    }
}

/// Change event pushed to subscribers
#[derive(Debug, Clone)]
pub struct ValuationEvent {
    pub entity: EntityId,
    pub valuation: Arc<Valuation>,
}

/// Lifecycle of a tick inside the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPhase {
    Received,
    Dispatched,
    Settled,
}

/// Outcome of processing one tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub instrument_id: InstrumentId,
    pub as_of: Timestamp,
    pub phase: TickPhase,
    pub positions_repriced: usize,
    pub portfolios_recomputed: usize,
    pub pricing_failures: usize,
    pub elapsed: Duration,
}

/// Outcome of processing a batch of ticks
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub received: usize,
    pub coalesced: usize,
    pub settled: Vec<TickReport>,
    pub rejected: Vec<crate::error::EngineError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_display() {
        assert_eq!(EntityId::position("P1").to_string(), "position:P1");
        assert_eq!(EntityId::portfolio("PF1").to_string(), "portfolio:PF1");
    }

    #[test]
    fn test_sensitivities_accumulate() {
        let mut total = Sensitivities::zero();
        total.accumulate(&Sensitivities { delta: 100.0, vega: 0.0 });
        total.accumulate(&Sensitivities { delta: -0.4, vega: 12.5 });
        assert!((total.delta - 99.6).abs() < 1e-12);
        assert!((total.vega - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_ticks() {
        let as_of = Utc::now();
        assert!(!Tick::new("AAPL", Decimal::from(151), as_of).with_volatility(0.25).is_degenerate());
        assert!(Tick::new("AAPL", Decimal::ZERO, as_of).is_degenerate());
        assert!(Tick::new("AAPL", Decimal::from(-1), as_of).is_degenerate());
        assert!(Tick::new("AAPL", Decimal::from(151), as_of).with_volatility(0.0).is_degenerate());
        assert!(Tick::new("AAPL", Decimal::from(151), as_of).with_volatility(f64::NAN).is_degenerate());
    }
}
