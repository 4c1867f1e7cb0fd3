// Metrics collection for the Valuation Engine

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics collector for engine throughput and pricing health
#[derive(Debug)]
pub struct MetricsCollector {
    // Tick flow
    pub ticks_received_total: Metric,
    pub ticks_settled_total: Metric,
    pub ticks_out_of_order_total: Metric,
    pub ticks_coalesced_total: Metric,
    pub tick_latency: LatencyHistogram,

    // Pricing
    pub positions_repriced_total: Metric,
    pub pricing_failures_total: Metric,
    pub portfolios_recomputed_total: Metric,

    // Registry
    pub positions_active: Metric,
    pub portfolios_active: Metric,

    started_at: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            ticks_received_total: Metric::default(),
            ticks_settled_total: Metric::default(),
            ticks_out_of_order_total: Metric::default(),
            ticks_coalesced_total: Metric::default(),
            tick_latency: LatencyHistogram::default(),
            positions_repriced_total: Metric::default(),
            pricing_failures_total: Metric::default(),
            portfolios_recomputed_total: Metric::default(),
            positions_active: Metric::default(),
            portfolios_active: Metric::default(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record how long a tick took from Received to Settled
    pub fn record_tick_latency(&self, elapsed: Duration) {
        self.tick_latency.record(elapsed);
    }

    /// Health score (0-100) from the percentage of repricings that failed
    pub fn health_score(&self) -> u64 {
        let failures = self.pricing_failures_total.get();
        let failed_pct = match self.positions_repriced_total.get() {
            0 => 0,
            repriced => failures * 100 / repriced,
        };

        match (failures, failed_pct) {
            (0, _) => 100,
            (_, 0..=1) => 75,
            (_, 2..=10) => 25,
            _ => 0,
        }
    }

    pub fn snapshot(&self) -> EngineMetrics {
        EngineMetrics {
            ticks_received_total: self.ticks_received_total.get(),
            ticks_settled_total: self.ticks_settled_total.get(),
            ticks_out_of_order_total: self.ticks_out_of_order_total.get(),
            ticks_coalesced_total: self.ticks_coalesced_total.get(),
            tick_latency_p50_us: self.tick_latency.quantile_us(0.50),
            tick_latency_p99_us: self.tick_latency.quantile_us(0.99),
            positions_repriced_total: self.positions_repriced_total.get(),
            pricing_failures_total: self.pricing_failures_total.get(),
            portfolios_recomputed_total: self.portfolios_recomputed_total.get(),
            positions_active: self.positions_active.get(),
            portfolios_active: self.portfolios_active.get(),
            health_score: self.health_score(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Relaxed `u64` cell used for both counters and gauges
#[derive(Debug, Default)]
pub struct Metric(AtomicU64);

impl Metric {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency histogram with fixed-width microsecond buckets. Samples past the
/// last bucket are counted in it.
#[derive(Debug)]
pub struct LatencyHistogram {
    width_us: u64,
    counts: Box<[AtomicU64]>,
}

impl LatencyHistogram {
    /// `buckets` buckets of `width_us` microseconds each
    pub fn new(buckets: usize, width_us: u64) -> Self {
        let counts = (0..buckets.max(1)).map(|_| AtomicU64::new(0)).collect();
        Self { width_us: width_us.max(1), counts }
    }

    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let slot = usize::try_from(micros / self.width_us).unwrap_or(usize::MAX).min(self.counts.len() - 1);
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.counts.iter().map(|slot| slot.load(Ordering::Relaxed)).sum()
    }

    /// Lower edge, in microseconds, of the bucket containing quantile `q`
    /// (0.0..=1.0); 0 when empty
    pub fn quantile_us(&self, q: f64) -> u64 {
        let rank = ((self.count() as f64 * q.clamp(0.0, 1.0)).ceil() as u64).max(1);
        let mut seen = 0;
        self.counts
            .iter()
            .position(|slot| {
                seen += slot.load(Ordering::Relaxed);
                seen >= rank
            })
            .map_or(0, |slot| slot as u64 * self.width_us)
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        // 10µs resolution up to 10ms
        Self::new(1000, 10)
    }
}

/// Point-in-time copy of the engine metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub ticks_received_total: u64,
    pub ticks_settled_total: u64,
    pub ticks_out_of_order_total: u64,
    pub ticks_coalesced_total: u64,
    pub tick_latency_p50_us: u64,
    pub tick_latency_p99_us: u64,
    pub positions_repriced_total: u64,
    pub pricing_failures_total: u64,
    pub portfolios_recomputed_total: u64,
    pub positions_active: u64,
    pub portfolios_active: u64,
    pub health_score: u64,
    pub uptime_seconds: u64,
}
