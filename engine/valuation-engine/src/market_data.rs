//! Market data state: latest quote per instrument

use crate::error::{EngineError, Result};
use crate::types::{InstrumentId, Quote, Tick, Timestamp};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Latest quote per instrument. Each key has a single writer at a time
/// (the map entry lock); readers clone the `Arc` and never see a partial quote.
#[derive(Debug, Default)]
pub struct MarketDataState {
    quotes: DashMap<InstrumentId, Arc<Quote>>,
}

impl MarketDataState {
    pub fn new() -> Self {
        Self { quotes: DashMap::new() }
    }

    /// Replace the instrument's quote if the tick is strictly newer.
    ///
    /// A tick without implied volatility keeps the previous quote's volatility.
    pub fn apply(&self, tick: &Tick) -> Result<Arc<Quote>> {
        match self.quotes.entry(tick.instrument_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if tick.as_of <= current.as_of {
                    return Err(EngineError::OutOfOrderTick {
                        instrument_id: tick.instrument_id.clone(),
                        as_of: tick.as_of,
                        current: current.as_of,
                    });
                }
                let quote = Arc::new(Quote {
                    instrument_id: tick.instrument_id.clone(),
                    price: tick.price,
                    implied_volatility: tick.implied_volatility.or(current.implied_volatility),
                    as_of: tick.as_of,
                });
                occupied.insert(quote.clone());
                Ok(quote)
            }
            Entry::Vacant(vacant) => {
                let quote = Arc::new(Quote {
                    instrument_id: tick.instrument_id.clone(),
                    price: tick.price,
                    implied_volatility: tick.implied_volatility,
                    as_of: tick.as_of,
                });
                vacant.insert(quote.clone());
                Ok(quote)
            }
        }
    }

    /// As-of of the current quote, if any
    pub fn current_as_of(&self, instrument_id: &str) -> Option<Timestamp> {
        self.quotes.get(instrument_id).map(|quote| quote.as_of)
    }

    pub fn quote(&self, instrument_id: &str) -> Option<Arc<Quote>> {
        self.quotes.get(instrument_id).map(|quote| quote.value().clone())
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
