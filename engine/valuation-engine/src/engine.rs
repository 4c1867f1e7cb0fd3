//! Valuation Engine facade

use crate::broadcaster::ChangeBroadcaster;
use crate::cache::ValuationCache;
use crate::catalog::{CatalogUpdate, ContractTerms, Instrument, InstrumentCatalog, InstrumentKind};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::DependencyGraph;
use crate::market_data::MarketDataState;
use crate::metrics::{EngineMetrics, MetricsCollector};
use crate::positions::PositionStore;
use crate::pricing::StrategySet;
use crate::scheduler::RecomputeScheduler;
use crate::types::{
    BatchReport, EntityId, InstrumentId, PortfolioId, Position, Quote, Tick, TickReport, Timestamp, Valuation,
    ValuationEvent,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Shared engine components
#[derive(Debug)]
pub(crate) struct EngineState {
    pub config: EngineConfig,
    pub catalog: InstrumentCatalog,
    pub market: MarketDataState,
    pub graph: DependencyGraph,
    pub positions: PositionStore,
    pub cache: ValuationCache,
    pub strategies: StrategySet,
    pub broadcaster: ChangeBroadcaster,
    pub metrics: MetricsCollector,
}

impl EngineState {
    pub(crate) fn publish(&self, valuation: &Arc<Valuation>) {
        if self.config.broadcast.enabled {
            self.broadcaster
                .publish(&ValuationEvent { entity: valuation.entity.clone(), valuation: valuation.clone() });
        }
    }

    pub(crate) fn refresh_registry_gauges(&self) {
        self.metrics.positions_active.set(self.positions.position_count() as u64);
        self.metrics.portfolios_active.set(self.positions.portfolio_count() as u64);
    }
}

/// Registry sizes and metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub instruments: usize,
    pub quotes: usize,
    pub positions: usize,
    pub portfolios: usize,
    pub edges: usize,
    pub cached_valuations: usize,
    pub subscribers: usize,
    pub metrics: EngineMetrics,
}

/// Incremental portfolio valuation engine.
///
/// Cheap to clone; clones share the same state. All operations are
/// synchronous and may be called from any thread.
#[derive(Debug, Clone)]
pub struct ValuationEngine {
    state: Arc<EngineState>,
    scheduler: Arc<RecomputeScheduler>,
}

impl ValuationEngine {
    /// Create an engine with the risk-free rate instrument loaded and seeded
    /// with the configured default rate
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let scheduler = RecomputeScheduler::new(config.worker_threads, config.lock_stripes)?;
        let state = EngineState {
            strategies: StrategySet::from_config(&config.pricing),
            catalog: InstrumentCatalog::new(),
            market: MarketDataState::new(),
            graph: DependencyGraph::new(),
            positions: PositionStore::new(),
            cache: ValuationCache::new(),
            broadcaster: ChangeBroadcaster::new(),
            metrics: MetricsCollector::new(),
            config,
        };

        let rate_id = state.config.pricing.rate_instrument_id.clone();
        let default_rate = Decimal::from_f64(state.config.pricing.default_risk_free_rate)
            .ok_or_else(|| EngineError::InvalidConfig("default_risk_free_rate".to_string()))?;
        state.catalog.load(&rate_id, ContractTerms::Rate);
        state.market.apply(&Tick::new(rate_id.clone(), default_rate, Timestamp::MIN_UTC))?;

        info!(
            "Valuation engine started: {} workers, {} lock stripes, rate {} seeded at {}",
            scheduler.worker_threads(),
            state.config.lock_stripes,
            rate_id,
            default_rate
        );

        Ok(Self { state: Arc::new(state), scheduler: Arc::new(scheduler) })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    /// Load or replace an instrument's terms. Positions already holding the
    /// instrument are rewired and repriced when the terms change.
    pub fn load_instrument(&self, instrument_id: &str, terms: ContractTerms) -> Result<Arc<Instrument>> {
        let rate_id = &self.state.config.pricing.rate_instrument_id;
        if instrument_id == rate_id && terms.kind() != InstrumentKind::Rate {
            return Err(EngineError::NotTradable(instrument_id.to_string()));
        }
        if let ContractTerms::Option(option) = &terms {
            match self.state.catalog.get(&option.underlying_id) {
                Some(underlying) if underlying.is_tradable() => {}
                Some(_) => return Err(EngineError::NotTradable(option.underlying_id.clone())),
                None => return Err(EngineError::UnknownInstrument(option.underlying_id.clone())),
            }
        }

        match self.state.catalog.load(instrument_id, terms) {
            CatalogUpdate::Created(instrument) => {
                info!("Loaded instrument {} ({:?})", instrument_id, instrument.kind());
                Ok(instrument)
            }
            CatalogUpdate::Unchanged(instrument) => Ok(instrument),
            CatalogUpdate::Replaced { current, .. } => {
                let repriced = self.scheduler.reload_holders(&self.state, &current);
                info!(
                    "Replaced terms of {} (version {}); repriced {} positions",
                    instrument_id, current.version, repriced
                );
                Ok(current)
            }
        }
    }

    /// Apply one market-data tick and settle every dependent valuation
    pub fn apply_tick(&self, tick: Tick) -> Result<TickReport> {
        self.scheduler.apply_tick(&self.state, &tick)
    }

    /// Apply a batch of ticks, coalesced per instrument to the newest
    pub fn apply_ticks(&self, ticks: Vec<Tick>) -> BatchReport {
        self.scheduler.apply_batch(&self.state, ticks)
    }

    /// Register and immediately price a position
    pub fn register_position(&self, position: Position) -> Result<Arc<Valuation>> {
        let position_id = position.position_id.clone();
        let portfolio_id = position.portfolio_id.clone();
        let valuation = self.scheduler.register_position(&self.state, position)?;
        info!("Registered position {} in portfolio {}", position_id, portfolio_id);
        Ok(valuation)
    }

    pub fn unregister_position(&self, position_id: &str) -> Result<Position> {
        let position = self.scheduler.unregister_position(&self.state, position_id)?;
        info!("Unregistered position {} from portfolio {}", position_id, position.portfolio_id);
        Ok(position)
    }

    pub fn position_valuation(&self, position_id: &str) -> Result<Arc<Valuation>> {
        self.state
            .cache
            .get(&EntityId::position(position_id))
            .ok_or_else(|| EngineError::UnknownPosition(position_id.to_string()))
    }

    pub fn portfolio_valuation(&self, portfolio_id: &str) -> Result<Arc<Valuation>> {
        self.state
            .cache
            .get(&EntityId::portfolio(portfolio_id))
            .ok_or_else(|| EngineError::UnknownPortfolio(portfolio_id.to_string()))
    }

    /// Ids of every portfolio with at least one registered position
    pub fn portfolio_ids(&self) -> Vec<PortfolioId> {
        self.state.positions.portfolio_ids()
    }

    /// Ids of every loaded instrument of `kind`
    pub fn instrument_ids(&self, kind: InstrumentKind) -> Vec<InstrumentId> {
        self.state.catalog.ids_of_kind(kind)
    }

    pub fn instrument(&self, instrument_id: &str) -> Option<Arc<Instrument>> {
        self.state.catalog.get(instrument_id)
    }

    pub fn quote(&self, instrument_id: &str) -> Option<Arc<Quote>> {
        self.state.market.quote(instrument_id)
    }

    pub fn position(&self, position_id: &str) -> Option<Position> {
        self.state.positions.get(position_id)
    }

    /// Stream of every valuation change
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ValuationEvent> {
        self.state.broadcaster.subscribe()
    }

    /// Stream of changes to one position or portfolio
    pub fn subscribe_entity(&self, entity: EntityId) -> mpsc::UnboundedReceiver<ValuationEvent> {
        self.state.broadcaster.subscribe_entity(entity)
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.state.metrics.snapshot()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            instruments: self.state.catalog.len(),
            quotes: self.state.market.len(),
            positions: self.state.positions.position_count(),
            portfolios: self.state.positions.portfolio_count(),
            edges: self.state.graph.edge_count(),
            cached_valuations: self.state.cache.len(),
            subscribers: self.state.broadcaster.subscriber_count(),
            metrics: self.metrics(),
        }
    }
}
