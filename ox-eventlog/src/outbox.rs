//! Outbox dispatch with exponential backoff.
//!
//! One dispatch tick claims due rows with `FOR UPDATE SKIP LOCKED` so
//! concurrent replicas drain disjoint slices, publishes each row, deletes on
//! success and reschedules with jittered exponential backoff on failure.

use crate::publisher::EventPublisher;
use crate::types::{Envelope, EventLogError, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

/// Backoff base: one dispatcher period.
const BACKOFF_BASE_SECONDS: i64 = 10;

/// Backoff ceiling: ten minutes.
const BACKOFF_CAP_SECONDS: i64 = 600;

/// A pending publish.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    pub event_id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Compute the delay before retry `attempts + 1`.
///
/// Exponential from a 10 s base, ±25% jitter, capped at 10 minutes.
pub fn publish_backoff(attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 16) as u32;
    let raw = BACKOFF_BASE_SECONDS.saturating_mul(2_i64.saturating_pow(exp));
    let capped = raw.min(BACKOFF_CAP_SECONDS);
    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
    let with_jitter = (capped as f64 * (1.0 + jitter)).round() as i64;
    Duration::seconds(with_jitter.clamp(1, BACKOFF_CAP_SECONDS))
}

/// Run one dispatch tick. Returns (published, failed).
pub async fn dispatch_outbox(
    pool: &PgPool,
    publisher: &dyn EventPublisher,
    batch_size: i64,
) -> Result<(usize, usize)> {
    let mut tx = pool.begin().await?;

    let due: Vec<OutboxRow> = sqlx::query_as(
        r#"
        SELECT event_id, topic, payload, attempts, next_attempt_at, last_error
        FROM outbox
        WHERE next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(batch_size)
    .fetch_all(&mut *tx)
    .await?;

    let mut published = 0usize;
    let mut failed = 0usize;

    for row in &due {
        let envelope: Envelope = match serde_json::from_value(row.payload.clone()) {
            Ok(env) => env,
            Err(e) => {
                // Unparseable rows would wedge the queue; park them with the
                // error recorded and maximum backoff.
                warn!(event_id = %row.event_id, error = %e, "Outbox row is not a valid envelope");
                reschedule(&mut tx, row, &format!("invalid envelope: {e}")).await?;
                failed += 1;
                continue;
            }
        };

        match publisher.publish(&row.topic, &envelope).await {
            Ok(()) => {
                sqlx::query("DELETE FROM outbox WHERE event_id = $1")
                    .bind(row.event_id)
                    .execute(&mut *tx)
                    .await?;

                debug!(event_id = %row.event_id, topic = %row.topic, "Outbox row published");
                published += 1;
            }
            Err(e) => {
                reschedule(&mut tx, row, &e.to_string()).await?;
                warn!(
                    event_id = %row.event_id,
                    topic = %row.topic,
                    attempts = row.attempts + 1,
                    error = %e,
                    "Publish failed, rescheduled"
                );
                failed += 1;
            }
        }
    }

    tx.commit().await?;
    Ok((published, failed))
}

async fn reschedule(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    row: &OutboxRow,
    error: &str,
) -> std::result::Result<(), EventLogError> {
    let delay = publish_backoff(row.attempts);
    sqlx::query(
        r#"
        UPDATE outbox
        SET attempts = attempts + 1,
            next_attempt_at = NOW() + $2 * INTERVAL '1 second',
            last_error = $3
        WHERE event_id = $1
        "#,
    )
    .bind(row.event_id)
    .bind(delay.num_seconds() as f64)
    .bind(error)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        // Jitter is ±25%, so compare against the widened envelope.
        let first = publish_backoff(0).num_seconds();
        assert!((7..=13).contains(&first), "got {first}");

        let third = publish_backoff(2).num_seconds();
        assert!((30..=50).contains(&third), "got {third}");
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempts in [10, 16, 100] {
            assert!(publish_backoff(attempts).num_seconds() <= BACKOFF_CAP_SECONDS);
        }
    }

    #[test]
    fn test_backoff_never_zero() {
        assert!(publish_backoff(0).num_seconds() >= 1);
    }
}
