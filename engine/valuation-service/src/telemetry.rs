//! Metrics export and periodic valuation reports

use crate::config::MetricsConfig;
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use valuation_engine::{EngineStats, ValuationEngine};

/// Install the Prometheus exporter with an HTTP listener on the configured
/// port. Must be called from within the Tokio runtime.
pub fn install_prometheus(config: &MetricsConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::describe_counter!("valuation_ticks_received_total", "Market data ticks received");
    metrics::describe_counter!("valuation_ticks_out_of_order_total", "Ticks dropped as not newer than the quote");
    metrics::describe_counter!("valuation_pricing_failures_total", "Position repricings that failed");
    metrics::describe_gauge!("valuation_positions_active", "Registered positions");
    metrics::describe_gauge!("valuation_health_score", "Engine health score (0-100)");

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}

/// Mirror the engine's internal counters into the metrics facade
pub fn publish_engine_stats(stats: &EngineStats) {
    let m = &stats.metrics;
    metrics::absolute_counter!("valuation_ticks_received_total", m.ticks_received_total);
    metrics::absolute_counter!("valuation_ticks_settled_total", m.ticks_settled_total);
    metrics::absolute_counter!("valuation_ticks_out_of_order_total", m.ticks_out_of_order_total);
    metrics::absolute_counter!("valuation_ticks_coalesced_total", m.ticks_coalesced_total);
    metrics::absolute_counter!("valuation_positions_repriced_total", m.positions_repriced_total);
    metrics::absolute_counter!("valuation_pricing_failures_total", m.pricing_failures_total);
    metrics::absolute_counter!("valuation_portfolios_recomputed_total", m.portfolios_recomputed_total);

    metrics::gauge!("valuation_instruments", stats.instruments as f64);
    metrics::gauge!("valuation_positions_active", stats.positions as f64);
    metrics::gauge!("valuation_portfolios_active", stats.portfolios as f64);
    metrics::gauge!("valuation_dependency_edges", stats.edges as f64);
    metrics::gauge!("valuation_subscribers", stats.subscribers as f64);
    metrics::gauge!("valuation_tick_latency_p99_us", m.tick_latency_p99_us as f64);
    metrics::gauge!("valuation_health_score", m.health_score as f64);
}

/// Publish engine metrics every `interval` until shutdown
pub async fn run_metrics_publisher(engine: ValuationEngine, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => publish_engine_stats(&engine.stats()),
            _ = shutdown.changed() => break,
        }
    }
}

/// Log every portfolio's valuation every `interval` until shutdown
pub async fn run_valuation_reporter(
    engine: ValuationEngine,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        for portfolio_id in engine.portfolio_ids() {
            match engine.portfolio_valuation(&portfolio_id) {
                Ok(valuation) => info!(
                    portfolio = %portfolio_id,
                    market_value = %valuation.market_value,
                    delta = valuation.sensitivities.delta,
                    vega = valuation.sensitivities.vega,
                    as_of = %valuation.as_of,
                    stale = valuation.is_stale(),
                    "Portfolio valuation"
                ),
                Err(e) => warn!("No valuation for portfolio {}: {}", portfolio_id, e),
            }
        }
    }
}
