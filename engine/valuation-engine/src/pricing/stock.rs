use super::{checked_product, MarketSnapshot, PricedPosition, PricingStrategy};
use crate::catalog::{Instrument, InstrumentKind};
use crate::error::{MarketField, PricingError};
use crate::types::Sensitivities;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Linear model: value = quantity × price, delta = quantity
#[derive(Debug, Clone, Copy, Default)]
pub struct StockStrategy;

impl PricingStrategy for StockStrategy {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::Stock
    }

    fn price(
        &self,
        instrument: &Instrument,
        quantity: Decimal,
        market: &MarketSnapshot,
    ) -> Result<PricedPosition, PricingError> {
        let quote = market.own.as_ref().ok_or_else(|| PricingError::MissingMarketData {
            instrument_id: instrument.instrument_id.clone(),
            field: MarketField::Price,
        })?;

        Ok(PricedPosition {
            market_value: checked_product(quantity, quote.price)?,
            unit_price: quote.price,
            sensitivities: Sensitivities { delta: quantity.to_f64().unwrap_or(0.0), vega: 0.0 },
            as_of: quote.as_of,
        })
    }
}
