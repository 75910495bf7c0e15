//! Process wiring: connect the store and queue, run consumers and the
//! metrics endpoint, shut down on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::ResolvedConfig;
use crate::db::Database;
use crate::metrics::{serve_metrics, WorkerMetrics};
use crate::queue::{Consumer, SqliteQueue};
use crate::store::SqliteEvidenceStore;

use super::producer::Producer;
use super::worker::VerificationWorker;

/// Store and queue sharing one database, owned by the process run loop
pub struct Services {
    pub store: Arc<SqliteEvidenceStore>,
    pub queue: Arc<SqliteQueue>,
    db: Database,
}

impl Services {
    /// Open the configured database and prepare both schemas
    pub async fn connect(config: &ResolvedConfig) -> Result<Self> {
        if let Some(parent) = config.database.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let db = Database::open(&config.database)
            .await
            .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
        let store = SqliteEvidenceStore::with_database(db.clone()).await?;
        let queue = SqliteQueue::with_database(db.clone(), config.queue.queue_options()).await?;

        Ok(Self {
            store: Arc::new(store),
            queue: Arc::new(queue),
            db,
        })
    }

    /// Producer over these services
    pub fn producer(&self) -> Producer {
        Producer::new(self.store.clone(), self.queue.clone())
    }

    /// Drop every handle and close the connection
    pub async fn close(self) -> Result<()> {
        let Self { store, queue, db } = self;
        drop(store);
        drop(queue);
        db.close().await.context("Failed to close database")
    }
}

/// Overrides from the command line
#[derive(Debug, Clone, Default)]
pub struct WorkerOverrides {
    pub concurrency: Option<usize>,
    pub latency: Option<Duration>,
    pub metrics_addr: Option<String>,
}

/// Run the verification worker until Ctrl-C
pub async fn run_worker(config: &ResolvedConfig, overrides: WorkerOverrides) -> Result<()> {
    let concurrency = overrides.concurrency.unwrap_or(config.worker.concurrency).max(1);
    let latency = overrides.latency.unwrap_or_else(|| config.worker.simulated_latency());
    let metrics_addr = overrides
        .metrics_addr
        .unwrap_or_else(|| config.worker.metrics_addr.clone());

    let services = Services::connect(config).await?;

    let metrics = WorkerMetrics::new()
        .and_then(WorkerMetrics::with_process_metrics)
        .context("Failed to register metrics")?;

    let worker = Arc::new(
        VerificationWorker::new(services.store.clone(), metrics.clone()).with_latency(latency),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics address: {}", metrics_addr))?;
    let metrics_task = tokio::spawn(serve_metrics(
        listener,
        metrics.registry().clone(),
        shutdown_rx.clone(),
    ));

    let mut consumers = Vec::with_capacity(concurrency);
    for index in 0..concurrency {
        let consumer = Consumer::new(
            services.queue.clone(),
            worker.clone(),
            config.queue.consumer_options(),
        )
        .with_id(format!("consumer-{}", index));
        let rx = shutdown_rx.clone();
        consumers.push(tokio::spawn(async move { consumer.run(rx).await }));
    }

    info!(
        queue = %config.queue.name,
        concurrency,
        latency_ms = latency.as_millis() as u64,
        database = %config.database.display(),
        "Worker consuming"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down, waiting for in-flight jobs");
    // Receivers are still alive in the tasks, so send cannot fail here
    let _ = shutdown_tx.send(true);

    for handle in consumers {
        if let Err(e) = handle.await {
            error!(error = %e, "Consumer task panicked");
        }
    }
    match metrics_task.await {
        Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
        Err(e) => error!(error = %e, "Metrics task panicked"),
        Ok(Ok(())) => {}
    }

    drop(worker);
    services.close().await?;
    info!("Worker stopped");

    Ok(())
}
