//! Service state management and component initialization

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};
use valuation_engine::{InstrumentKind, TickIngestor, ValuationEngine};

use crate::config::ServiceConfig;
use crate::{feed, loader, telemetry};

/// Service state containing all initialized components
pub struct ServiceState {
    /// Service configuration
    pub config: ServiceConfig,

    /// Valuation Engine instance
    pub engine: ValuationEngine,

    /// Tick ingestion front door; taken on shutdown
    ingestor: Mutex<Option<TickIngestor>>,

    /// Background tasks awaited on shutdown
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,

    shutdown_tx: watch::Sender<bool>,
}

impl ServiceState {
    /// Create the engine, load reference data and start tick ingestion.
    /// Must be called from within the Tokio runtime.
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        info!("Initializing service components...");

        let engine = ValuationEngine::new(config.engine.clone()).context("Failed to create Valuation Engine")?;
        info!(
            "Valuation Engine initialized ({} workers, {} lock stripes)",
            config.engine.worker_threads, config.engine.lock_stripes
        );

        if let Some(path) = &config.service.instruments_file {
            loader::load_instruments(&engine, path)?;
        }
        if let Some(path) = &config.service.positions_file {
            loader::load_positions(&engine, path, &config.service.default_portfolio_id)?;
        }

        let ingestor = TickIngestor::spawn(engine.clone());
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            engine,
            ingestor: Mutex::new(Some(ingestor)),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    /// Start the simulated feed, if enabled. Publishes the configured
    /// tickers, or every loaded stock when none are configured.
    pub async fn start_feed(&self) -> Result<()> {
        if !self.config.feed.enabled {
            info!("Simulated feed disabled");
            return Ok(());
        }

        let tickers = if self.config.feed.tickers.is_empty() {
            self.engine.instrument_ids(InstrumentKind::Stock)
        } else {
            self.config.feed.tickers.clone()
        };
        let sender = match self.ingestor.lock().await.as_ref() {
            Some(ingestor) => ingestor.sender(),
            None => return Err(anyhow::anyhow!("Tick ingestion already stopped")),
        };

        let handle = tokio::spawn({
            let config = self.config.feed.clone();
            let shutdown = self.shutdown_tx.subscribe();
            async move {
                feed::run_feed(config, tickers, sender, shutdown).await;
            }
        });
        self.tasks.lock().await.push(("feed", handle));
        Ok(())
    }

    /// Start the periodic valuation reporter and, if enabled, metrics export
    pub async fn start_reporting(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        if self.config.metrics.enabled {
            telemetry::install_prometheus(&self.config.metrics)?;
            let handle = tokio::spawn(telemetry::run_metrics_publisher(
                self.engine.clone(),
                self.config.metrics.interval(),
                self.shutdown_tx.subscribe(),
            ));
            tasks.push(("metrics", handle));
        }

        let handle = tokio::spawn(telemetry::run_valuation_reporter(
            self.engine.clone(),
            self.config.service.report_interval(),
            self.shutdown_tx.subscribe(),
        ));
        tasks.push(("reporter", handle));
        Ok(())
    }

    /// Stop background tasks, drain queued ticks and log final totals
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down service components...");
        let _ = self.shutdown_tx.send(true);

        let shutdown_timeout = self.config.service.shutdown_timeout();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for (name, handle) in tasks {
            match timeout(shutdown_timeout, handle).await {
                Ok(Ok(())) => info!("{} stopped gracefully", name),
                Ok(Err(e)) => error!("{} task failed: {}", name, e),
                Err(_) => warn!("{} did not stop within timeout, forcing shutdown", name),
            }
        }

        if let Some(ingestor) = self.ingestor.lock().await.take() {
            match timeout(shutdown_timeout, ingestor.close()).await {
                Ok(Ok(stats)) => info!(
                    "Tick ingestion drained: {} batches, {} ticks ({} coalesced, {} rejected)",
                    stats.batches, stats.ticks_received, stats.ticks_coalesced, stats.ticks_rejected
                ),
                Ok(Err(e)) => error!("Tick ingestion failed: {}", e),
                Err(_) => warn!("Tick ingestion did not drain within timeout"),
            }
        }

        let stats = self.engine.stats();
        info!(
            "Final state: {} instruments, {} positions, {} portfolios, {} ticks settled",
            stats.instruments, stats.positions, stats.portfolios, stats.metrics.ticks_settled_total
        );
        info!("Engine metrics: {}", serde_json::to_string(&stats.metrics).context("Failed to serialize metrics")?);
        Ok(())
    }
}
