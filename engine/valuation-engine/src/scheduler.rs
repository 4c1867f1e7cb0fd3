//! Recompute scheduler
//!
//! Drives each tick through `Received -> Dispatched -> Settled`:
//!
//! - **Received**: the instrument must be known and the tick strictly newer
//!   than the current quote.
//! - **Dispatched**: the quote is replaced, the affected positions are read
//!   from the dependency graph and repriced on the worker pool.
//! - **Settled**: every affected position is cached and the owning
//!   portfolios are re-aggregated.
//!
//! Recomputes of one entity are serialized through a striped lock and read
//! their market inputs inside it, so the last write for an entity always
//! carries the newest inputs regardless of which worker finishes first.

use crate::aggregator::{Aggregator, PortfolioTotal};
use crate::cache::PricedInputs;
use crate::catalog::{ContractTerms, Instrument};
use crate::engine::EngineState;
use crate::error::{EngineError, PricingError, Result};
use crate::pricing::MarketSnapshot;
use crate::striped::StripedLocks;
use crate::types::{
    BatchReport, EntityId, InstrumentId, PortfolioId, Position, PositionId, Sensitivities, StaleReason, Tick,
    TickPhase, TickReport, Timestamp, Valuation, ValuationEvent,
};
use rayon::prelude::*;
use rayon::ThreadPool;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Result of repricing one position
#[derive(Debug, Clone)]
pub(crate) struct PositionOutcome {
    pub portfolio_id: PortfolioId,
    pub valuation: Arc<Valuation>,
}

impl PositionOutcome {
    fn failed(&self) -> bool {
        self.valuation.pricing_error().is_some()
    }
}

pub struct RecomputeScheduler {
    pool: ThreadPool,
    locks: StripedLocks,
}

impl RecomputeScheduler {
    pub fn new(worker_threads: usize, lock_stripes: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|index| format!("valuation-worker-{index}"))
            .build()
            .map_err(|e| EngineError::InvalidConfig(format!("worker pool: {e}")))?;

        Ok(Self { pool, locks: StripedLocks::new(lock_stripes) })
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Process one tick to Settled
    pub(crate) fn apply_tick(&self, state: &EngineState, tick: &Tick) -> Result<TickReport> {
        let started = Instant::now();
        state.metrics.ticks_received_total.inc();
        debug!("Tick {} {} @ {} {:?}", tick.instrument_id, tick.price, tick.as_of, TickPhase::Received);

        if !state.catalog.contains(&tick.instrument_id) {
            return Err(EngineError::UnknownInstrument(tick.instrument_id.clone()));
        }
        if let Err(e) = state.market.apply(tick) {
            if e.is_out_of_order() {
                state.metrics.ticks_out_of_order_total.inc();
                warn!("Rejected tick: {}", e);
            }
            return Err(e);
        }

        let affected = state.graph.affected_positions(&tick.instrument_id);
        debug!("Tick {} {:?}: {} affected positions", tick.instrument_id, TickPhase::Dispatched, affected.len());

        let outcomes = self.reprice_positions(state, &affected);
        let pricing_failures = outcomes.iter().filter(|outcome| outcome.failed()).count();
        let portfolios: BTreeSet<PortfolioId> =
            outcomes.iter().map(|outcome| outcome.portfolio_id.clone()).collect();
        self.recompute_portfolios(state, &portfolios);

        let elapsed = started.elapsed();
        state.metrics.ticks_settled_total.inc();
        state.metrics.record_tick_latency(elapsed);

        Ok(TickReport {
            instrument_id: tick.instrument_id.clone(),
            as_of: tick.as_of,
            phase: TickPhase::Settled,
            positions_repriced: outcomes.len(),
            portfolios_recomputed: portfolios.len(),
            pricing_failures,
            elapsed,
        })
    }

    /// Coalesce a batch per instrument, then process the survivors in order of
    /// each instrument's first appearance.
    ///
    /// A failed pricing keeps the position's previous figures, so once a tick
    /// may fail pricing the outcome depends on arrival order: such batches are
    /// applied as received.
    pub(crate) fn apply_batch(&self, state: &EngineState, ticks: Vec<Tick>) -> BatchReport {
        let received = ticks.len();
        let survivors = if ticks.iter().any(Tick::is_degenerate) {
            debug!("Batch of {} ticks holds a degenerate tick; applied without coalescing", received);
            ticks
        } else {
            coalesce(ticks, |instrument_id| state.market.current_as_of(instrument_id))
        };
        let coalesced = received - survivors.len();
        state.metrics.ticks_coalesced_total.add(coalesced as u64);

        let mut report = BatchReport { received, coalesced, ..Default::default() };
        for tick in &survivors {
            match self.apply_tick(state, tick) {
                Ok(settled) => report.settled.push(settled),
                Err(e) => report.rejected.push(e),
            }
        }
        report
    }

    /// Reprice positions on the worker pool. Positions unregistered in the
    /// meantime are skipped.
    pub(crate) fn reprice_positions(&self, state: &EngineState, position_ids: &[PositionId]) -> Vec<PositionOutcome> {
        if position_ids.len() <= 1 {
            return position_ids.iter().filter_map(|id| self.reprice_position(state, id)).collect();
        }
        self.pool.install(|| {
            position_ids.par_iter().filter_map(|id| self.reprice_position(state, id)).collect()
        })
    }

    pub(crate) fn reprice_position(&self, state: &EngineState, position_id: &str) -> Option<PositionOutcome> {
        let entity = EntityId::position(position_id);
        let _guard = self.locks.lock(&entity);
        let position = state.positions.get(position_id)?;
        self.price_locked(state, &position)
    }

    /// Register a position, wire its edges and price it under its entity lock
    pub(crate) fn register_position(&self, state: &EngineState, position: Position) -> Result<Arc<Valuation>> {
        let instrument = state
            .catalog
            .get(&position.instrument_id)
            .ok_or_else(|| EngineError::UnknownInstrument(position.instrument_id.clone()))?;
        if !instrument.is_tradable() {
            return Err(EngineError::NotTradable(position.instrument_id.clone()));
        }

        let entity = EntityId::position(position.position_id.as_str());
        let outcome = {
            let _guard = self.locks.lock(&entity);
            state.positions.insert(position.clone())?;
            state
                .graph
                .add_position(&position.position_id, instrument.dependencies(&state.config.pricing.rate_instrument_id));
            self.price_locked(state, &position)
        };
        state.refresh_registry_gauges();

        let portfolios = BTreeSet::from([position.portfolio_id.clone()]);
        self.recompute_portfolios(state, &portfolios);

        match outcome {
            Some(outcome) => Ok(outcome.valuation),
            None => Err(EngineError::UnknownInstrument(position.instrument_id)),
        }
    }

    pub(crate) fn unregister_position(&self, state: &EngineState, position_id: &str) -> Result<Position> {
        let entity = EntityId::position(position_id);
        let position = {
            let _guard = self.locks.lock(&entity);
            let position = state.positions.remove(position_id)?;
            state.graph.remove_position(position_id);
            state.cache.remove(&entity);
            position
        };
        state.refresh_registry_gauges();
        state.broadcaster.prune_closed();

        let portfolios = BTreeSet::from([position.portfolio_id.clone()]);
        self.recompute_portfolios(state, &portfolios);
        Ok(position)
    }

    /// After new terms are loaded, re-derive edges of every position holding
    /// the instrument and reprice them
    pub(crate) fn reload_holders(&self, state: &EngineState, instrument: &Instrument) -> usize {
        let rate_id = &state.config.pricing.rate_instrument_id;
        let holders: Vec<PositionId> = state
            .graph
            .affected_positions(&instrument.instrument_id)
            .into_iter()
            .filter(|id| {
                state.positions.get(id).is_some_and(|position| position.instrument_id == instrument.instrument_id)
            })
            .collect();

        for position_id in &holders {
            let _guard = self.locks.lock(&EntityId::position(position_id.as_str()));
            if state.positions.contains(position_id) {
                state.graph.add_position(position_id, instrument.dependencies(rate_id));
            }
        }

        let outcomes = self.reprice_positions(state, &holders);
        let portfolios: BTreeSet<PortfolioId> =
            outcomes.iter().map(|outcome| outcome.portfolio_id.clone()).collect();
        self.recompute_portfolios(state, &portfolios);
        outcomes.len()
    }

    /// Caller holds the position's stripe lock
    fn price_locked(&self, state: &EngineState, position: &Position) -> Option<PositionOutcome> {
        let instrument = state.catalog.get(&position.instrument_id)?;
        let (market, inputs) = market_snapshot(state, &instrument);
        let entity = EntityId::position(position.position_id.as_str());
        state.metrics.positions_repriced_total.inc();

        let valuation = match state.strategies.price(&instrument, position.quantity, &market) {
            Ok(priced) => Valuation {
                entity,
                market_value: priced.market_value,
                unit_price: Some(priced.unit_price),
                sensitivities: priced.sensitivities,
                as_of: priced.as_of,
                stale: None,
            },
            Err(err) => {
                state.metrics.pricing_failures_total.inc();
                warn!("Pricing failed for position {}: {}", position.position_id, err);
                let previous = state.cache.get(&entity);
                failed_valuation(entity, err, previous.as_deref(), market.as_of())
            }
        };

        let valuation = state.cache.put_priced(valuation, inputs);
        state.publish(&valuation);
        Some(PositionOutcome { portfolio_id: position.portfolio_id.clone(), valuation })
    }

    pub(crate) fn recompute_portfolios(&self, state: &EngineState, portfolios: &BTreeSet<PortfolioId>) {
        if portfolios.len() <= 1 {
            portfolios.iter().for_each(|id| self.recompute_portfolio(state, id));
            return;
        }
        self.pool.install(|| portfolios.par_iter().for_each(|id| self.recompute_portfolio(state, id)));
    }

    fn recompute_portfolio(&self, state: &EngineState, portfolio_id: &str) {
        let entity = EntityId::portfolio(portfolio_id);
        let _guard = self.locks.lock(&entity);
        state.metrics.portfolios_recomputed_total.inc();

        let aggregator = Aggregator::new(&state.positions, &state.cache, &state.catalog, &state.market);
        match aggregator.recompute(portfolio_id) {
            PortfolioTotal::Valued(valuation) => {
                let valuation = state.cache.put(valuation);
                state.publish(&valuation);
            }
            PortfolioTotal::Pending { members } => {
                debug!("Portfolio {} deferred: {} members still repricing", portfolio_id, members);
            }
            PortfolioTotal::Empty => {
                if state.cache.remove(&entity).is_some() {
                    debug!("Portfolio {} has no live positions; removed", portfolio_id);
                }
            }
        }
    }
}

impl std::fmt::Debug for RecomputeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecomputeScheduler")
            .field("worker_threads", &self.pool.current_num_threads())
            .field("lock_stripes", &self.locks.len())
            .finish()
    }
}

/// Quotes a position's valuation reads, fetched now, and the stamp of what
/// was read
fn market_snapshot(state: &EngineState, instrument: &Instrument) -> (MarketSnapshot, PricedInputs) {
    let own = state.market.quote(&instrument.instrument_id);
    let snapshot = match &instrument.terms {
        ContractTerms::Option(terms) => MarketSnapshot {
            own,
            underlying: state.market.quote(&terms.underlying_id),
            rate: state.market.quote(&state.config.pricing.rate_instrument_id),
        },
        ContractTerms::Stock | ContractTerms::Rate => MarketSnapshot { own, ..Default::default() },
    };

    let mut quotes = vec![(instrument.instrument_id.clone(), snapshot.own.as_ref().map(|quote| quote.as_of))];
    if let ContractTerms::Option(terms) = &instrument.terms {
        quotes.push((terms.underlying_id.clone(), snapshot.underlying.as_ref().map(|quote| quote.as_of)));
        quotes.push((
            state.config.pricing.rate_instrument_id.clone(),
            snapshot.rate.as_ref().map(|quote| quote.as_of),
        ));
    }
    let inputs = PricedInputs {
        instrument_id: instrument.instrument_id.clone(),
        terms_version: instrument.version,
        quotes,
    };
    (snapshot, inputs)
}

/// Stale valuation for a failed pricing. Expired contracts are valued at
/// intrinsic with zero sensitivities; any other failure keeps the previous
/// figures so a failure never reads as a zero value.
fn failed_valuation(
    entity: EntityId,
    err: PricingError,
    previous: Option<&Valuation>,
    market_as_of: Option<Timestamp>,
) -> Valuation {
    let as_of = market_as_of.max(previous.map(|valuation| valuation.as_of)).unwrap_or(Timestamp::MIN_UTC);

    match &err {
        PricingError::ExpiredContract { intrinsic_value, unit_intrinsic } => Valuation {
            entity,
            market_value: *intrinsic_value,
            unit_price: Some(*unit_intrinsic),
            sensitivities: Sensitivities::zero(),
            as_of,
            stale: Some(StaleReason::Pricing(err.clone())),
        },
        _ => Valuation {
            entity,
            market_value: previous.map(|valuation| valuation.market_value).unwrap_or(Decimal::ZERO),
            unit_price: previous.and_then(|valuation| valuation.unit_price),
            sensitivities: previous.map(|valuation| valuation.sensitivities).unwrap_or_default(),
            as_of,
            stale: Some(StaleReason::Pricing(err)),
        },
    }
}

/// Keep the newest tick per instrument.
///
/// Only ticks that would be accepted when applied one by one contribute: a
/// tick is accepted when it is newer than the instrument's current quote
/// and every earlier tick. The newest accepted tick survives and inherits the
/// latest implied volatility seen along that accepted chain. Instruments with
/// no accepted tick keep their first tick so the rejection is still reported.
pub(crate) fn coalesce<F>(ticks: Vec<Tick>, current_as_of: F) -> Vec<Tick>
where
    F: Fn(&str) -> Option<Timestamp>,
{
    let mut order: Vec<InstrumentId> = Vec::new();
    let mut chains: HashMap<InstrumentId, (Option<Timestamp>, Option<Tick>, Option<Tick>)> = HashMap::new();

    for tick in ticks {
        let (high_water, survivor, first) = chains.entry(tick.instrument_id.clone()).or_insert_with(|| {
            order.push(tick.instrument_id.clone());
            (current_as_of(&tick.instrument_id), None, None)
        });
        if first.is_none() {
            *first = Some(tick.clone());
        }
        if high_water.is_some_and(|mark| tick.as_of <= mark) {
            continue;
        }
        *high_water = Some(tick.as_of);

        let carried = survivor.as_ref().and_then(|previous| previous.implied_volatility);
        let mut accepted = tick;
        accepted.implied_volatility = accepted.implied_volatility.or(carried);
        *survivor = Some(accepted);
    }

    order
        .into_iter()
        .filter_map(|instrument_id| {
            chains.remove(&instrument_id).and_then(|(_, survivor, first)| survivor.or(first))
        })
        .collect()
}
