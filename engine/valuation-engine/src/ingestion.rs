//! Async tick ingestion with per-window coalescing

use crate::config::IngestionConfig;
use crate::engine::ValuationEngine;
use crate::error::{EngineError, Result};
use crate::types::Tick;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Totals over the lifetime of an ingestor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionStats {
    pub batches: u64,
    pub ticks_received: u64,
    pub ticks_coalesced: u64,
    pub ticks_settled: u64,
    pub ticks_rejected: u64,
}

/// Producer side of the tick channel
#[derive(Debug, Clone)]
pub struct TickSender {
    sender: mpsc::Sender<Tick>,
}

impl TickSender {
    /// Queue a tick, waiting while the channel is full
    pub async fn submit(&self, tick: Tick) -> Result<()> {
        self.sender.send(tick).await.map_err(|_| EngineError::IngestionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Front door for a live feed. A background task collects ticks for up to
/// the coalesce window, coalesces them per instrument and applies each batch
/// on the blocking pool. Batches are applied one at a time in arrival order.
pub struct TickIngestor {
    sender: TickSender,
    task: JoinHandle<IngestionStats>,
}

impl TickIngestor {
    /// Start the ingestion task on the current Tokio runtime
    pub fn spawn(engine: ValuationEngine) -> Self {
        let config = engine.config().ingestion.clone();
        let (sender, receiver) = mpsc::channel(config.channel_capacity);
        let task = tokio::spawn(run_ingestion(engine, receiver, config));
        Self { sender: TickSender { sender }, task }
    }

    pub fn sender(&self) -> TickSender {
        self.sender.clone()
    }

    pub async fn submit(&self, tick: Tick) -> Result<()> {
        self.sender.submit(tick).await
    }

    /// Stop accepting ticks, apply everything still queued and return the
    /// totals. Outstanding [`TickSender`] clones keep the channel open until
    /// they are dropped.
    pub async fn close(self) -> Result<IngestionStats> {
        drop(self.sender);
        self.task.await.map_err(|e| {
            error!("Tick ingestion task failed: {}", e);
            EngineError::IngestionClosed
        })
    }
}

async fn run_ingestion(
    engine: ValuationEngine,
    mut receiver: mpsc::Receiver<Tick>,
    config: IngestionConfig,
) -> IngestionStats {
    let mut stats = IngestionStats::default();
    info!(
        "Tick ingestion started (window {:?}, max batch {})",
        config.coalesce_window(),
        config.max_batch
    );

    while let Some(first) = receiver.recv().await {
        let mut batch = vec![first];
        let deadline = Instant::now() + config.coalesce_window();
        while batch.len() < config.max_batch {
            match timeout_at(deadline, receiver.recv()).await {
                Ok(Some(tick)) => batch.push(tick),
                Ok(None) | Err(_) => break,
            }
        }

        let batch_engine = engine.clone();
        let report = match tokio::task::spawn_blocking(move || batch_engine.apply_ticks(batch)).await {
            Ok(report) => report,
            Err(e) => {
                error!("Tick batch worker failed: {}", e);
                continue;
            }
        };

        for rejected in report.rejected.iter().filter(|e| !e.is_out_of_order()) {
            warn!("Tick rejected: {}", rejected);
        }
        debug!(
            "Batch applied: {} received, {} coalesced, {} settled, {} rejected",
            report.received,
            report.coalesced,
            report.settled.len(),
            report.rejected.len()
        );

        stats.batches += 1;
        stats.ticks_received += report.received as u64;
        stats.ticks_coalesced += report.coalesced as u64;
        stats.ticks_settled += report.settled.len() as u64;
        stats.ticks_rejected += report.rejected.len() as u64;
    }

    info!("Tick ingestion stopped after {} batches", stats.batches);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ContractTerms;
    use crate::config::EngineConfig;
    use crate::types::Position;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn create_test_engine() -> ValuationEngine {
        let config = EngineConfig { worker_threads: 2, ..Default::default() };
        let engine = ValuationEngine::new(config).unwrap();
        engine.load_instrument("AAPL", ContractTerms::Stock).unwrap();
        engine.load_instrument("MSFT", ContractTerms::Stock).unwrap();
        engine.register_position(Position::new("P1", "AAPL", Decimal::from(100), "PF1")).unwrap();
        engine.register_position(Position::new("P2", "MSFT", Decimal::from(10), "PF1")).unwrap();
        engine
    }

    #[tokio::test]
    async fn test_ingestor_applies_and_drains_on_close() {
        let engine = create_test_engine();
        let ingestor = TickIngestor::spawn(engine.clone());
        let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();

        for i in 0..50 {
            ingestor.submit(Tick::new("AAPL", Decimal::from(100 + i), t0 + Duration::seconds(i))).await.unwrap();
        }
        ingestor.submit(Tick::new("MSFT", Decimal::from(400), t0)).await.unwrap();

        let stats = ingestor.close().await.unwrap();
        assert_eq!(stats.ticks_received, 51);
        assert_eq!(stats.ticks_rejected, 0);
        assert_eq!(stats.ticks_settled + stats.ticks_coalesced, 51);

        assert_eq!(engine.position_valuation("P1").unwrap().market_value, Decimal::from(14900));
        assert_eq!(engine.portfolio_valuation("PF1").unwrap().market_value, Decimal::from(18900));
    }

    #[tokio::test]
    async fn test_unknown_instrument_counted_as_rejected() {
        let engine = create_test_engine();
        let ingestor = TickIngestor::spawn(engine);
        let sender = ingestor.sender();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();

        sender.submit(Tick::new("TSLA", Decimal::from(250), t0)).await.unwrap();
        drop(sender);

        let stats = ingestor.close().await.unwrap();
        assert_eq!(stats.ticks_rejected, 1);
        assert_eq!(stats.ticks_settled, 0);
    }

    #[tokio::test]
    async fn test_submit_after_task_stops() {
        let engine = create_test_engine();
        let mut ingestor = TickIngestor::spawn(engine);
        let sender = ingestor.sender();
        ingestor.task.abort();
        // Receiver is dropped with the aborted task
        assert!((&mut ingestor.task).await.is_err());

        let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        let result = sender.submit(Tick::new("AAPL", Decimal::from(1), t0)).await;
        assert_eq!(result, Err(EngineError::IngestionClosed));
        assert!(sender.is_closed());
    }
}
