//! Valuation cache: latest valuation per position and per portfolio

use crate::types::{EntityId, InstrumentId, Timestamp, Valuation};
use dashmap::DashMap;
use std::sync::Arc;

/// Market inputs a position valuation was computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedInputs {
    pub instrument_id: InstrumentId,
    pub terms_version: u32,
    /// As-of of every quote read; `None` where no quote existed yet
    pub quotes: Vec<(InstrumentId, Option<Timestamp>)>,
}

#[derive(Debug, Clone)]
struct Entry {
    valuation: Arc<Valuation>,
    inputs: Option<Arc<PricedInputs>>,
}

/// Values are immutable and swapped whole per key, so a reader always gets
/// a fully formed valuation together with the inputs it was priced from.
#[derive(Debug, Default)]
pub struct ValuationCache {
    entries: DashMap<EntityId, Entry>,
}

impl ValuationCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn get(&self, entity: &EntityId) -> Option<Arc<Valuation>> {
        self.entries.get(entity).map(|entry| entry.valuation.clone())
    }

    /// Valuation and the inputs it was priced from, read together
    pub fn get_priced(&self, entity: &EntityId) -> Option<(Arc<Valuation>, Option<Arc<PricedInputs>>)> {
        self.entries.get(entity).map(|entry| (entry.valuation.clone(), entry.inputs.clone()))
    }

    pub(crate) fn put(&self, valuation: Valuation) -> Arc<Valuation> {
        self.insert(valuation, None)
    }

    pub(crate) fn put_priced(&self, valuation: Valuation, inputs: PricedInputs) -> Arc<Valuation> {
        self.insert(valuation, Some(Arc::new(inputs)))
    }

    fn insert(&self, valuation: Valuation, inputs: Option<Arc<PricedInputs>>) -> Arc<Valuation> {
        let valuation = Arc::new(valuation);
        self.entries.insert(valuation.entity.clone(), Entry { valuation: valuation.clone(), inputs });
        valuation
    }

    pub(crate) fn remove(&self, entity: &EntityId) -> Option<Arc<Valuation>> {
        self.entries.remove(entity).map(|(_, entry)| entry.valuation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sensitivities;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    #[test]
    fn test_put_get_remove() {
        let cache = ValuationCache::new();
        let entity = EntityId::position("P1");
        assert!(cache.get(&entity).is_none());

        cache.put(Valuation {
            entity: entity.clone(),
            market_value: Decimal::from(15100),
            unit_price: Some(Decimal::from(151)),
            sensitivities: Sensitivities { delta: 100.0, vega: 0.0 },
            as_of: Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap(),
            stale: None,
        });
        let held = cache.get(&entity).unwrap();

        cache.put(Valuation { market_value: Decimal::from(15200), ..(*held).clone() });
        // Earlier readers keep the value they loaded
        assert_eq!(held.market_value, Decimal::from(15100));
        assert_eq!(cache.get(&entity).unwrap().market_value, Decimal::from(15200));

        assert!(cache.remove(&entity).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_inputs_swap_with_value() {
        let cache = ValuationCache::new();
        let entity = EntityId::position("P1");
        let as_of = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        let valuation = Valuation {
            entity: entity.clone(),
            market_value: Decimal::from(15100),
            unit_price: Some(Decimal::from(151)),
            sensitivities: Sensitivities { delta: 100.0, vega: 0.0 },
            as_of,
            stale: None,
        };
        let inputs = PricedInputs {
            instrument_id: "AAPL".to_string(),
            terms_version: 1,
            quotes: vec![("AAPL".to_string(), Some(as_of))],
        };

        cache.put_priced(valuation.clone(), inputs.clone());
        let (held, held_inputs) = cache.get_priced(&entity).unwrap();
        assert_eq!(held.market_value, Decimal::from(15100));
        assert_eq!(held_inputs.as_deref(), Some(&inputs));

        // A plain put drops the inputs along with the old value
        cache.put(valuation);
        assert!(cache.get_priced(&entity).unwrap().1.is_none());
    }
}
