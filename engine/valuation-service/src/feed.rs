//! Simulated market data feed for local runs
//!
//! Publishes stock prices round-robin, one ticker per step, after a random
//! delay. Prices follow geometric Brownian motion per ticker, or are drawn
//! uniformly from a fixed band. Each tick carries the ticker's σ as implied
//! volatility so options on it can be priced.

use crate::config::{FeedConfig, FeedStrategy, TickerModel};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use valuation_engine::{Tick, TickSender, Timestamp};

/// Lowest price the simulator will publish
pub const PRICE_FLOOR: f64 = 0.01;

/// Decimal places on published prices
pub const PRICE_SCALE: u32 = 2;

const RANDOM_PRICE_RANGE: std::ops::Range<f64> = 10.0..1000.0;

/// One GBM step: `S' = S * (1 + μ·τ + σ·ε·√τ)` with `τ = elapsed / year`,
/// floored at [`PRICE_FLOOR`].
pub fn gbm_step(price: f64, mu: f64, sigma: f64, elapsed_secs: f64, year_seconds: f64, epsilon: f64) -> f64 {
    let tau = (elapsed_secs / year_seconds).max(0.0);
    let ratio = mu * tau + sigma * epsilon * tau.sqrt();
    (price * (1.0 + ratio)).max(PRICE_FLOOR)
}

#[derive(Debug, Clone)]
struct TickerState {
    model: TickerModel,
    last_price: Option<Decimal>,
    last_at: Option<Timestamp>,
}

/// Per-ticker price state for the simulated feed
#[derive(Debug)]
pub struct PriceSimulator {
    strategy: FeedStrategy,
    year_seconds: f64,
    tickers: HashMap<String, TickerState>,
    rng: StdRng,
}

impl PriceSimulator {
    pub fn new(config: &FeedConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { strategy: config.strategy, year_seconds: config.year_seconds, tickers: HashMap::new(), rng }
    }

    /// Register a ticker; a no-op when it is already known
    pub fn add_ticker(&mut self, model: TickerModel) {
        self.tickers
            .entry(model.ticker.clone())
            .or_insert(TickerState { model, last_price: None, last_at: None });
    }

    /// Produce the next tick for a ticker at `now`. The first GBM tick of a
    /// ticker publishes its initial price. Returns `None` for unknown tickers.
    pub fn next_tick(&mut self, ticker: &str, now: Timestamp) -> Option<Tick> {
        let state = self.tickers.get_mut(ticker)?;

        // as-of must strictly increase per ticker or the engine drops the tick
        let as_of = match state.last_at {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };

        let raw = match (self.strategy, state.last_price, state.last_at) {
            (FeedStrategy::Random, _, _) => self.rng.gen_range(RANDOM_PRICE_RANGE),
            (FeedStrategy::Gbm, Some(last_price), Some(last_at)) => {
                let elapsed = (as_of - last_at).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0;
                let epsilon: f64 = self.rng.sample(StandardNormal);
                let last = last_price.to_f64().unwrap_or(state.model.initial_price);
                gbm_step(last, state.model.mu, state.model.sigma, elapsed, self.year_seconds, epsilon)
            }
            (FeedStrategy::Gbm, _, _) => state.model.initial_price,
        };

        let price = Decimal::from_f64(raw.max(PRICE_FLOOR))?
            .round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero);
        state.last_price = Some(price);
        state.last_at = Some(as_of);

        Some(Tick::new(ticker, price, as_of).with_volatility(state.model.sigma))
    }

    pub fn last_price(&self, ticker: &str) -> Option<Decimal> {
        self.tickers.get(ticker).and_then(|state| state.last_price)
    }
}

/// Uniform delay in `[min, max]` milliseconds
fn random_delay(rng: &mut impl Rng, min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}

/// Run the feed until shutdown is signalled or the ingestion channel closes.
/// Returns the number of ticks submitted.
pub async fn run_feed(
    config: FeedConfig,
    tickers: Vec<String>,
    sender: TickSender,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    if tickers.is_empty() {
        warn!("Simulated feed has no tickers to publish");
        return 0;
    }

    let mut simulator = PriceSimulator::new(&config);
    for ticker in &tickers {
        simulator.add_ticker(config.model_for(ticker));
    }
    let mut delay_rng = StdRng::seed_from_u64(config.seed.unwrap_or_else(rand::random));

    info!("Simulated feed started: {:?} over {} tickers", config.strategy, tickers.len());
    let mut submitted = 0u64;

    for ticker in tickers.iter().cycle() {
        let delay = random_delay(&mut delay_rng, config.min_interval_ms, config.max_interval_ms);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let Some(tick) = simulator.next_tick(ticker, Utc::now()) else {
            continue;
        };
        debug!("Feed tick {} @ {}", tick.instrument_id, tick.price);
        if sender.submit(tick).await.is_err() {
            warn!("Tick ingestion closed; stopping simulated feed");
            break;
        }
        submitted += 1;
    }

    info!("Simulated feed stopped after {} ticks", submitted);
    submitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seeded_config(strategy: FeedStrategy) -> FeedConfig {
        FeedConfig { strategy, seed: Some(7), ..Default::default() }
    }

    #[test]
    fn test_gbm_step_drift_and_floor() {
        // No noise: price grows by μ·τ
        let price = gbm_step(100.0, 0.08, 0.2, 7_257_600.0, 7_257_600.0, 0.0);
        assert!((price - 108.0).abs() < 1e-9);

        // No elapsed time: unchanged
        assert_eq!(gbm_step(100.0, 0.08, 0.2, 0.0, 7_257_600.0, 3.0), 100.0);

        // Large negative shock floors at one cent
        assert_eq!(gbm_step(100.0, 0.0, 1.0, 7_257_600.0, 7_257_600.0, -5.0), PRICE_FLOOR);
    }

    #[test]
    fn test_first_gbm_tick_is_initial_price() {
        let config = seeded_config(FeedStrategy::Gbm);
        let mut simulator = PriceSimulator::new(&config);
        simulator.add_ticker(config.model_for("AAPL"));
        simulator.add_ticker(config.model_for("XYZ"));
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();

        let tick = simulator.next_tick("AAPL", now).unwrap();
        assert_eq!(tick.price, Decimal::from(110));
        assert_eq!(tick.implied_volatility, Some(0.2));

        let tick = simulator.next_tick("XYZ", now).unwrap();
        assert_eq!(tick.price, Decimal::from(100));
        assert!(simulator.next_tick("MSFT", now).is_none());
    }

    #[test]
    fn test_ticks_strictly_increase_and_stay_positive() {
        let config = seeded_config(FeedStrategy::Gbm);
        let mut simulator = PriceSimulator::new(&config);
        simulator.add_ticker(config.model_for("TELSA"));
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();

        let mut last_as_of = None;
        for step in 0..200 {
            // Same wall-clock instant every other step
            let at = now + chrono::Duration::seconds(step / 2 * 3600);
            let tick = simulator.next_tick("TELSA", at).unwrap();
            assert!(tick.price >= Decimal::new(1, 2));
            assert_eq!(tick.price, tick.price.round_dp(PRICE_SCALE));
            if let Some(previous) = last_as_of {
                assert!(tick.as_of > previous);
            }
            last_as_of = Some(tick.as_of);
        }
        assert!(simulator.last_price("TELSA").is_some());
    }

    #[test]
    fn test_random_strategy_stays_in_band() {
        let config = seeded_config(FeedStrategy::Random);
        let mut simulator = PriceSimulator::new(&config);
        simulator.add_ticker(config.model_for("AAPL"));
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();

        for step in 0..100 {
            let tick = simulator.next_tick("AAPL", now + chrono::Duration::seconds(step)).unwrap();
            assert!(tick.price >= Decimal::from(10) && tick.price <= Decimal::from(1000));
        }
    }

    #[test]
    fn test_random_delay_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let delay = random_delay(&mut rng, 500, 2000);
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(2000));
        }
        assert_eq!(random_delay(&mut rng, 50, 50), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_feed_stops_on_shutdown() {
        use valuation_engine::{ContractTerms, EngineConfig, TickIngestor, ValuationEngine};

        let engine = ValuationEngine::new(EngineConfig { worker_threads: 1, ..Default::default() }).unwrap();
        engine.load_instrument("AAPL", ContractTerms::Stock).unwrap();
        let ingestor = TickIngestor::spawn(engine.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let config = FeedConfig { min_interval_ms: 1, max_interval_ms: 2, seed: Some(3), ..Default::default() };
        let feed = tokio::spawn(run_feed(config, vec!["AAPL".to_string()], ingestor.sender(), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        let submitted = feed.await.unwrap();

        let stats = ingestor.close().await.unwrap();
        assert!(submitted > 0);
        assert_eq!(stats.ticks_received, submitted);
        assert!(engine.quote("AAPL").is_some());
    }
}
