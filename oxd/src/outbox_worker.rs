//! Outbox dispatch worker.
//!
//! Drains due outbox rows on a fixed cadence and publishes them through the
//! broker. Safe to run on every replica; rows are claimed with SKIP LOCKED.

use crate::error::DaemonResult;
use crate::metrics::Metrics;
use ox_eventlog::{dispatch_outbox, EventPublisher};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

pub struct OutboxWorker {
    pool: PgPool,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
    interval_secs: u64,
    batch: i64,
}

impl OutboxWorker {
    pub fn new(
        pool: PgPool,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
        interval_secs: u64,
        batch: i64,
    ) -> Self {
        Self {
            pool,
            publisher,
            metrics,
            interval_secs,
            batch,
        }
    }

    /// Run the dispatch loop until shutdown.
    pub async fn run(self, shutdown: tokio_util::sync::CancellationToken) -> DaemonResult<()> {
        info!(interval_secs = self.interval_secs, "Outbox worker started");

        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        ticker.tick().await; // First tick is immediate

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Outbox worker shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match dispatch_outbox(&self.pool, self.publisher.as_ref(), self.batch).await {
                        Ok((published, failed)) => {
                            if published > 0 || failed > 0 {
                                debug!(published, failed, "Outbox tick");
                            }
                            self.metrics.outbox_published.inc_by(published as u64);
                            self.metrics.outbox_failed.inc_by(failed as u64);
                        }
                        Err(e) => {
                            error!(error = %e, "Outbox dispatch failed (will retry)");
                        }
                    }
                }
            }
        }

        info!("Outbox worker stopped");
        Ok(())
    }
}
