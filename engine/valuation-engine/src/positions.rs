//! Position store and portfolio membership

use crate::error::{EngineError, Result};
use crate::types::{PortfolioId, Position, PositionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

/// Live positions keyed by id, plus the owning portfolio's member set.
/// A portfolio exists only while it has at least one member.
#[derive(Debug, Default)]
pub struct PositionStore {
    positions: DashMap<PositionId, Position>,
    portfolios: DashMap<PortfolioId, HashSet<PositionId>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self { positions: DashMap::new(), portfolios: DashMap::new() }
    }

    pub fn insert(&self, position: Position) -> Result<()> {
        match self.positions.entry(position.position_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::PositionAlreadyRegistered(position.position_id)),
            Entry::Vacant(vacant) => {
                self.portfolios
                    .entry(position.portfolio_id.clone())
                    .or_default()
                    .insert(position.position_id.clone());
                vacant.insert(position);
                Ok(())
            }
        }
    }

    pub fn remove(&self, position_id: &str) -> Result<Position> {
        let (_, position) = self
            .positions
            .remove(position_id)
            .ok_or_else(|| EngineError::UnknownPosition(position_id.to_string()))?;

        self.portfolios.remove_if_mut(&position.portfolio_id, |_, members| {
            members.remove(position_id);
            members.is_empty()
        });
        Ok(position)
    }

    pub fn get(&self, position_id: &str) -> Option<Position> {
        self.positions.get(position_id).map(|position| position.clone())
    }

    pub fn contains(&self, position_id: &str) -> bool {
        self.positions.contains_key(position_id)
    }

    /// Member ids of a live portfolio
    pub fn members(&self, portfolio_id: &str) -> Option<Vec<PositionId>> {
        self.portfolios.get(portfolio_id).map(|members| members.iter().cloned().collect())
    }

    /// Ids of every live portfolio, sorted
    pub fn portfolio_ids(&self) -> Vec<PortfolioId> {
        let mut ids: Vec<PortfolioId> = self.portfolios.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn portfolio_exists(&self, portfolio_id: &str) -> bool {
        self.portfolios.contains_key(portfolio_id)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn portfolio_count(&self) -> usize {
        self.portfolios.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_membership_follows_positions() {
        let store = PositionStore::new();
        store.insert(Position::new("P1", "AAPL", Decimal::from(100), "PF1")).unwrap();
        store.insert(Position::new("P2", "AAPL-C150", Decimal::from(-5), "PF1")).unwrap();

        let mut members = store.members("PF1").unwrap();
        members.sort();
        assert_eq!(members, vec!["P1".to_string(), "P2".to_string()]);

        store.insert(Position::new("P3", "MSFT", Decimal::ONE, "PF0")).unwrap();
        assert_eq!(store.portfolio_ids(), vec!["PF0".to_string(), "PF1".to_string()]);
        store.remove("P3").unwrap();

        store.remove("P1").unwrap();
        assert_eq!(store.members("PF1").unwrap(), vec!["P2".to_string()]);

        store.remove("P2").unwrap();
        assert!(!store.portfolio_exists("PF1"));
        assert_eq!(store.portfolio_count(), 0);
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let store = PositionStore::new();
        store.insert(Position::new("P1", "AAPL", Decimal::from(100), "PF1")).unwrap();

        let err = store.insert(Position::new("P1", "MSFT", Decimal::ONE, "PF2")).unwrap_err();
        assert_eq!(err, EngineError::PositionAlreadyRegistered("P1".to_string()));
        assert!(!store.portfolio_exists("PF2"));

        assert_eq!(store.remove("P9").unwrap_err(), EngineError::UnknownPosition("P9".to_string()));
    }
}
