//! Instrument catalog: static contract terms per instrument id

use crate::types::{InstrumentId, Timestamp};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Option right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

/// Terms of a listed option contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTerms {
    pub underlying_id: InstrumentId,
    pub strike: Decimal,
    pub expiry: Timestamp,
    pub kind: OptionKind,
    pub multiplier: Decimal,
}

/// Contract terms by instrument kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContractTerms {
    Stock,
    Option(OptionTerms),
    /// Risk-free rate market factor; not tradable
    Rate,
}

/// Discriminant of [`ContractTerms`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Stock,
    Option,
    Rate,
}

impl ContractTerms {
    pub fn kind(&self) -> InstrumentKind {
        match self {
            ContractTerms::Stock => InstrumentKind::Stock,
            ContractTerms::Option(_) => InstrumentKind::Option,
            ContractTerms::Rate => InstrumentKind::Rate,
        }
    }
}

/// An instrument at a specific terms version. Immutable once created;
/// replacing terms produces a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_id: InstrumentId,
    pub terms: ContractTerms,
    pub version: u32,
}

impl Instrument {
    pub fn kind(&self) -> InstrumentKind {
        self.terms.kind()
    }

    pub fn is_tradable(&self) -> bool {
        self.kind() != InstrumentKind::Rate
    }

    /// Market instruments this instrument's valuation reads
    pub fn dependencies(&self, rate_instrument_id: &str) -> Vec<InstrumentId> {
        match &self.terms {
            ContractTerms::Stock | ContractTerms::Rate => vec![self.instrument_id.clone()],
            ContractTerms::Option(terms) => {
                let mut deps = vec![
                    self.instrument_id.clone(),
                    terms.underlying_id.clone(),
                    rate_instrument_id.to_string(),
                ];
                deps.dedup();
                deps
            }
        }
    }
}

/// Outcome of loading terms into the catalog
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogUpdate {
    Created(Arc<Instrument>),
    Unchanged(Arc<Instrument>),
    Replaced { previous: Arc<Instrument>, current: Arc<Instrument> },
}

impl CatalogUpdate {
    pub fn instrument(&self) -> &Arc<Instrument> {
        match self {
            CatalogUpdate::Created(current)
            | CatalogUpdate::Unchanged(current)
            | CatalogUpdate::Replaced { current, .. } => current,
        }
    }
}

/// Read-mostly map from instrument id to its current terms
#[derive(Debug, Default)]
pub struct InstrumentCatalog {
    instruments: DashMap<InstrumentId, Arc<Instrument>>,
}

impl InstrumentCatalog {
    pub fn new() -> Self {
        Self { instruments: DashMap::new() }
    }

    /// Load or replace terms. Identical terms are a no-op.
    pub fn load(&self, instrument_id: &str, terms: ContractTerms) -> CatalogUpdate {
        let mut entry = self.instruments.entry(instrument_id.to_string()).or_insert_with(|| {
            Arc::new(Instrument { instrument_id: instrument_id.to_string(), terms: terms.clone(), version: 0 })
        });

        let existing = entry.value().clone();
        if existing.version == 0 {
            let created = Arc::new(Instrument { version: 1, ..(*existing).clone() });
            *entry.value_mut() = created.clone();
            return CatalogUpdate::Created(created);
        }
        if existing.terms == terms {
            return CatalogUpdate::Unchanged(existing);
        }

        let current = Arc::new(Instrument {
            instrument_id: instrument_id.to_string(),
            terms,
            version: existing.version + 1,
        });
        *entry.value_mut() = current.clone();
        CatalogUpdate::Replaced { previous: existing, current }
    }

    pub fn get(&self, instrument_id: &str) -> Option<Arc<Instrument>> {
        self.instruments.get(instrument_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, instrument_id: &str) -> bool {
        self.instruments.contains_key(instrument_id)
    }

    /// Ids of every instrument of `kind`, sorted
    pub fn ids_of_kind(&self, kind: InstrumentKind) -> Vec<InstrumentId> {
        let mut ids: Vec<InstrumentId> = self
            .instruments
            .iter()
            .filter(|entry| entry.value().kind() == kind)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn call_terms(strike: i64) -> ContractTerms {
        ContractTerms::Option(OptionTerms {
            underlying_id: "AAPL".to_string(),
            strike: Decimal::from(strike),
            expiry: Utc.with_ymd_and_hms(2025, 3, 21, 16, 0, 0).unwrap(),
            kind: OptionKind::Call,
            multiplier: Decimal::from(100),
        })
    }

    #[test]
    fn test_load_versions() {
        let catalog = InstrumentCatalog::new();

        let created = catalog.load("AAPL-C150", call_terms(150));
        assert!(matches!(created, CatalogUpdate::Created(_)));
        assert_eq!(created.instrument().version, 1);

        let unchanged = catalog.load("AAPL-C150", call_terms(150));
        assert!(matches!(unchanged, CatalogUpdate::Unchanged(_)));
        assert_eq!(unchanged.instrument().version, 1);

        let replaced = catalog.load("AAPL-C150", call_terms(155));
        match replaced {
            CatalogUpdate::Replaced { previous, current } => {
                assert_eq!(previous.version, 1);
                assert_eq!(current.version, 2);
            }
            other => panic!("expected replacement, got {other:?}"),
        }
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_dependencies() {
        let catalog = InstrumentCatalog::new();
        catalog.load("AAPL", ContractTerms::Stock);
        catalog.load("AAPL-C150", call_terms(150));

        let stock = catalog.get("AAPL").unwrap();
        assert_eq!(stock.dependencies("USD-RFR"), vec!["AAPL".to_string()]);

        let option = catalog.get("AAPL-C150").unwrap();
        assert_eq!(
            option.dependencies("USD-RFR"),
            vec!["AAPL-C150".to_string(), "AAPL".to_string(), "USD-RFR".to_string()]
        );
        assert!(option.is_tradable());

        catalog.load("MSFT", ContractTerms::Stock);
        assert_eq!(catalog.ids_of_kind(InstrumentKind::Stock), vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(catalog.ids_of_kind(InstrumentKind::Option), vec!["AAPL-C150".to_string()]);
    }
}
