//! Dependency graph: market instrument -> dependent positions
//!
//! The forward map answers "which positions does this tick touch" and the
//! reverse map lets removal run in O(deps) without scanning instruments.
//! Both maps are sharded: lookups take the shard's read lock, mutations the
//! write lock of the affected key only.

use crate::types::{InstrumentId, PositionId};
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependents: DashMap<InstrumentId, HashSet<PositionId>>,
    dependencies: DashMap<PositionId, Vec<InstrumentId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self { dependents: DashMap::new(), dependencies: DashMap::new() }
    }

    /// Positions whose valuation reads `instrument_id`
    pub fn affected_positions(&self, instrument_id: &str) -> Vec<PositionId> {
        self.dependents
            .get(instrument_id)
            .map(|positions| positions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add edges from each dependency to the position. Any previous edges of
    /// the position are replaced.
    pub fn add_position(&self, position_id: &str, deps: Vec<InstrumentId>) {
        self.remove_position(position_id);
        for instrument_id in &deps {
            self.dependents.entry(instrument_id.clone()).or_default().insert(position_id.to_string());
        }
        self.dependencies.insert(position_id.to_string(), deps);
    }

    /// Remove every edge pointing at the position
    pub fn remove_position(&self, position_id: &str) -> Option<Vec<InstrumentId>> {
        let (_, deps) = self.dependencies.remove(position_id)?;
        for instrument_id in &deps {
            // Drop the instrument key once its last dependent is gone
            self.dependents.remove_if_mut(instrument_id, |_, positions| {
                positions.remove(position_id);
                positions.is_empty()
            });
        }
        Some(deps)
    }

    pub fn dependencies_of(&self, position_id: &str) -> Option<Vec<InstrumentId>> {
        self.dependencies.get(position_id).map(|deps| deps.clone())
    }

    /// Total number of instrument -> position edges
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn instrument_count(&self) -> usize {
        self.dependents.len()
    }
}
