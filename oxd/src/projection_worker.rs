//! Projection consumer.
//!
//! Subscribes to the agent and physics topics and applies each envelope to
//! the read model. Failures retry with backoff; after the configured number
//! of attempts the envelope is routed to the dead letter sink and skipped.

use crate::broker::EventBroker;
use crate::error::DaemonResult;
use crate::metrics::Metrics;
use ox_domain::events::{TOPIC_AGENTS, TOPIC_PHYSICS};
use ox_eventlog::Envelope;
use ox_projector::apply_event_to_projections;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

pub struct ProjectionWorker {
    pool: PgPool,
    metrics: Arc<Metrics>,
    dead_letter_attempts: u32,
    agents: tokio::sync::broadcast::Receiver<Envelope>,
    physics: tokio::sync::broadcast::Receiver<Envelope>,
}

impl ProjectionWorker {
    /// Subscriptions are taken here, before any worker task runs, so the
    /// outbox dispatcher can never publish into an unsubscribed topic.
    pub fn new(
        pool: PgPool,
        broker: &EventBroker,
        metrics: Arc<Metrics>,
        dead_letter_attempts: u32,
    ) -> Self {
        Self {
            pool,
            metrics,
            dead_letter_attempts,
            agents: broker.subscribe(TOPIC_AGENTS),
            physics: broker.subscribe(TOPIC_PHYSICS),
        }
    }

    /// Run the consumer loop until shutdown.
    pub async fn run(mut self, shutdown: tokio_util::sync::CancellationToken) -> DaemonResult<()> {
        info!("Projection worker started");

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Projection worker shutdown requested");
                    break;
                }
                received = self.agents.recv() => (TOPIC_AGENTS, received),
                received = self.physics.recv() => (TOPIC_PHYSICS, received),
            };

            match received {
                (topic, Ok(envelope)) => {
                    self.consume(topic, envelope).await;
                }
                (topic, Err(RecvError::Lagged(missed))) => {
                    // Missed envelopes are still in the event log; a replay
                    // job can rebuild, so lagging is loud but not fatal.
                    warn!(topic, missed, "Projection consumer lagged");
                }
                (topic, Err(RecvError::Closed)) => {
                    error!(topic, "Broker channel closed");
                    break;
                }
            }
        }

        info!("Projection worker stopped");
        Ok(())
    }

    async fn consume(&self, topic: &str, envelope: Envelope) {
        let mut attempt = 0u32;

        loop {
            match apply_event_to_projections(&self.pool, &envelope).await {
                Ok(()) => {
                    self.metrics.projections_applied.inc();
                    debug!(
                        topic,
                        event_id = %envelope.event_id,
                        event_type = %envelope.event_type,
                        "Envelope materialized"
                    );
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.dead_letter_attempts {
                        self.dead_letter(topic, &envelope, &e.to_string()).await;
                        return;
                    }
                    let backoff = Duration::from_millis(100 * 2u64.saturating_pow(attempt));
                    warn!(
                        event_id = %envelope.event_id,
                        attempt,
                        error = %e,
                        "Projection failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn dead_letter(&self, topic: &str, envelope: &Envelope, last_error: &str) {
        self.metrics.projections_dead_lettered.inc();
        error!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            error = %last_error,
            "Envelope dead-lettered"
        );

        let serialized = match serde_json::to_value(envelope) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "Failed to serialize dead letter envelope");
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO dead_letters (event_id, topic, envelope, last_error, attempts)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO UPDATE SET
                last_error = EXCLUDED.last_error,
                attempts = dead_letters.attempts + EXCLUDED.attempts,
                dead_at = NOW()
            "#,
        )
        .bind(envelope.event_id)
        .bind(topic)
        .bind(&serialized)
        .bind(last_error)
        .bind(self.dead_letter_attempts as i32)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to write dead letter row");
        }
    }
}
