//! Portfolio aggregation over cached position valuations

use crate::cache::{PricedInputs, ValuationCache};
use crate::catalog::InstrumentCatalog;
use crate::error::PricingError;
use crate::market_data::MarketDataState;
use crate::positions::PositionStore;
use crate::types::{EntityId, Sensitivities, StaleReason, Timestamp, Valuation};
use rust_decimal::Decimal;

/// Outcome of rolling up one portfolio
#[derive(Debug, Clone, PartialEq)]
pub enum PortfolioTotal {
    Valued(Valuation),
    /// Some members were priced from quotes or terms since replaced and are
    /// still being repriced; the reprice in flight recomputes the portfolio
    /// when it settles
    Pending { members: usize },
    /// The portfolio has no live members
    Empty,
}

/// Rolls live member valuations into a portfolio total
#[derive(Debug, Clone, Copy)]
pub struct Aggregator<'a> {
    positions: &'a PositionStore,
    cache: &'a ValuationCache,
    catalog: &'a InstrumentCatalog,
    market: &'a MarketDataState,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        positions: &'a PositionStore,
        cache: &'a ValuationCache,
        catalog: &'a InstrumentCatalog,
        market: &'a MarketDataState,
    ) -> Self {
        Self { positions, cache, catalog, market }
    }

    /// Portfolio total over a consistent set of member valuations.
    ///
    /// Members are summed in id order so the floating-point sensitivities
    /// do not depend on set iteration order.
    pub fn recompute(&self, portfolio_id: &str) -> PortfolioTotal {
        let Some(mut members) = self.positions.members(portfolio_id) else {
            return PortfolioTotal::Empty;
        };
        members.sort();

        let entries: Vec<_> = members
            .iter()
            .map(|position_id| self.cache.get_priced(&EntityId::position(position_id.as_str())))
            .collect();

        // Checked after every entry is read: a quote replaced mid-read shows
        // up as a lagging member
        let pending = entries
            .iter()
            .filter(|entry| match entry {
                Some((_, Some(inputs))) => !self.is_current(inputs),
                Some((_, None)) => false,
                None => true,
            })
            .count();
        if pending > 0 {
            return PortfolioTotal::Pending { members: pending };
        }

        let mut market_value = Decimal::ZERO;
        let mut overflow = false;
        let mut sensitivities = Sensitivities::zero();
        let mut as_of: Option<Timestamp> = None;
        let mut stale_count = 0;

        for (valuation, _) in entries.iter().flatten() {
            match market_value.checked_add(valuation.market_value) {
                Some(sum) => market_value = sum,
                None => overflow = true,
            }
            sensitivities.accumulate(&valuation.sensitivities);
            as_of = as_of.max(Some(valuation.as_of));
            if valuation.is_stale() {
                stale_count += 1;
            }
        }

        let stale = if overflow {
            Some(StaleReason::Pricing(PricingError::InvalidContractTerms(format!(
                "market value of portfolio {portfolio_id} overflows"
            ))))
        } else {
            (stale_count > 0).then_some(StaleReason::StaleConstituents { count: stale_count })
        };

        PortfolioTotal::Valued(Valuation {
            entity: EntityId::portfolio(portfolio_id),
            market_value,
            unit_price: None,
            sensitivities,
            as_of: as_of.unwrap_or(Timestamp::MIN_UTC),
            stale,
        })
    }

    /// Whether the terms and every quote a member was priced from are still current
    fn is_current(&self, inputs: &PricedInputs) -> bool {
        let terms_current = self
            .catalog
            .get(&inputs.instrument_id)
            .is_some_and(|instrument| instrument.version == inputs.terms_version);
        terms_current
            && inputs
                .quotes
                .iter()
                .all(|(instrument_id, as_of)| self.market.current_as_of(instrument_id) == *as_of)
    }
}
