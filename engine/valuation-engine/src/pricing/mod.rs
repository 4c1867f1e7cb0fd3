//! Pricing strategies
//!
//! A strategy turns an instrument, a signed quantity and a snapshot of the
//! market inputs it depends on into position-level figures. Strategies are
//! pure: no locks, no clocks, no I/O.

mod black_scholes;
mod stock;

pub use black_scholes::{BlackScholesModel, BlackScholesStrategy, Greeks};
pub use stock::StockStrategy;

use crate::catalog::{Instrument, InstrumentKind};
use crate::config::PricingConfig;
use crate::error::PricingError;
use crate::types::{Quote, Sensitivities, Timestamp};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Market inputs for pricing one position, read at a single point in time
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    /// Quote of the held instrument itself
    pub own: Option<Arc<Quote>>,
    /// Quote of the option's underlying
    pub underlying: Option<Arc<Quote>>,
    /// Risk-free rate quote
    pub rate: Option<Arc<Quote>>,
}

impl MarketSnapshot {
    /// Latest as-of across all inputs present
    pub fn as_of(&self) -> Option<Timestamp> {
        [&self.own, &self.underlying, &self.rate]
            .into_iter()
            .flatten()
            .map(|quote| quote.as_of)
            .max()
    }

    /// Latest as-of across price-bearing quotes; the rate quote is excluded
    pub fn valuation_time(&self) -> Option<Timestamp> {
        [&self.own, &self.underlying].into_iter().flatten().map(|quote| quote.as_of).max()
    }
}

/// `lhs × rhs`, failing with `InvalidContractTerms` instead of overflowing
pub(crate) fn checked_product(lhs: Decimal, rhs: Decimal) -> Result<Decimal, PricingError> {
    lhs.checked_mul(rhs)
        .ok_or_else(|| PricingError::InvalidContractTerms(format!("{lhs} × {rhs} overflows")))
}

/// Position-level pricing result
#[derive(Debug, Clone, PartialEq)]
pub struct PricedPosition {
    pub market_value: Decimal,
    pub unit_price: Decimal,
    pub sensitivities: Sensitivities,
    pub as_of: Timestamp,
}

/// Pricing model for one instrument kind
pub trait PricingStrategy: Send + Sync {
    fn kind(&self) -> InstrumentKind;

    fn price(
        &self,
        instrument: &Instrument,
        quantity: Decimal,
        market: &MarketSnapshot,
    ) -> Result<PricedPosition, PricingError>;
}

/// Strategy registry keyed by instrument kind
pub struct StrategySet {
    stock: Box<dyn PricingStrategy>,
    option: Box<dyn PricingStrategy>,
}

impl StrategySet {
    pub fn new(stock: Box<dyn PricingStrategy>, option: Box<dyn PricingStrategy>) -> Self {
        Self { stock, option }
    }

    /// Linear stock model and Black–Scholes for options
    pub fn from_config(config: &PricingConfig) -> Self {
        Self::new(
            Box::new(StockStrategy),
            Box::new(BlackScholesStrategy::new(config.day_count_basis, config.price_scale)),
        )
    }

    pub fn for_kind(&self, kind: InstrumentKind) -> Option<&dyn PricingStrategy> {
        match kind {
            InstrumentKind::Stock => Some(self.stock.as_ref()),
            InstrumentKind::Option => Some(self.option.as_ref()),
            InstrumentKind::Rate => None,
        }
    }

    pub fn price(
        &self,
        instrument: &Instrument,
        quantity: Decimal,
        market: &MarketSnapshot,
    ) -> Result<PricedPosition, PricingError> {
        match self.for_kind(instrument.kind()) {
            Some(strategy) => strategy.price(instrument, quantity, market),
            None => Err(PricingError::InvalidContractTerms(format!(
                "{} is not a priceable instrument",
                instrument.instrument_id
            ))),
        }
    }
}

impl std::fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategySet")
            .field("stock", &self.stock.kind())
            .field("option", &self.option.kind())
            .finish()
    }
}
