//! # Valuation Engine
//!
//! Keeps the valuation of every registered stock and option position, and
//! of every portfolio, current as market data ticks arrive.
//!
//! A tick replaces its instrument's quote, the dependency graph yields the
//! positions reading that instrument, the recompute scheduler reprices them
//! on a bounded worker pool and the aggregator rolls the new figures into
//! portfolio totals. Readers pull the latest valuation from the cache or
//! subscribe to a push stream of changes.
//!
//! Pricing failures never abort a tick: the affected position is marked stale
//! with the failure as its reason and keeps its previous value.

pub mod aggregator;
pub mod broadcaster;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ingestion;
pub mod market_data;
pub mod metrics;
pub mod positions;
pub mod pricing;
pub mod scheduler;
pub mod striped;
pub mod types;


pub use catalog::{ContractTerms, Instrument, InstrumentKind, OptionKind, OptionTerms};
pub use config::{EngineConfig, IngestionConfig, PricingConfig, DEFAULT_RATE_INSTRUMENT_ID};
pub use engine::{EngineStats, ValuationEngine};
pub use error::{EngineError, MarketField, PricingError, Result};
pub use ingestion::{IngestionStats, TickIngestor, TickSender};
pub use metrics::EngineMetrics;
pub use pricing::{MarketSnapshot, PricedPosition, PricingStrategy};
pub use types::{
    BatchReport, EntityId, InstrumentId, PortfolioId, Position, PositionId, Quote, Sensitivities, StaleReason, Tick,
    TickPhase, TickReport, Timestamp, Valuation, ValuationEvent,
};

/// Current version of the Valuation Engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
