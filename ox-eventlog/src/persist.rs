//! Transactional event persistence.
//!
//! The event row and its outbox row commit together or not at all. The
//! outbox dispatcher picks the row up after commit and publishes it to the
//! named topic.

use crate::truncate::truncate_payload;
use crate::types::{Envelope, Event, EventLogError, Result};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Persist an event in its own transaction.
pub async fn persist_event(pool: &PgPool, topic: &str, event: Event) -> Result<Envelope> {
    let mut tx = pool.begin().await?;
    let envelope = persist_event_tx(&mut tx, topic, event).await?;
    tx.commit().await?;
    Ok(envelope)
}

/// Persist an event within an existing transaction.
///
/// Use this when event emission must commit atomically with the state change
/// it records (the admission engine always does).
pub async fn persist_event_tx(
    tx: &mut Transaction<'_, Postgres>,
    topic: &str,
    event: Event,
) -> Result<Envelope> {
    let (payload, truncated) = truncate_payload(event.payload);
    if truncated {
        debug!(event_type = %event.event_type, "Payload truncated at 16 KiB cap");
    }

    let envelope = Envelope {
        event_id: Uuid::now_v7(),
        event_type: event.event_type,
        occurred_at: event.occurred_at,
        actor_id: event.actor_id,
        actor_generation: event.actor_generation,
        correlation_id: event.correlation_id,
        idempotency_key: event.idempotency_key,
        payload,
        context: event.context,
    };

    sqlx::query(
        r#"
        INSERT INTO events (
            event_id, event_type, occurred_at, actor_id, actor_generation,
            correlation_id, idempotency_key, payload, context
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(envelope.event_id)
    .bind(&envelope.event_type)
    .bind(envelope.occurred_at)
    .bind(&envelope.actor_id)
    .bind(envelope.actor_generation)
    .bind(envelope.correlation_id)
    .bind(&envelope.idempotency_key)
    .bind(&envelope.payload)
    .bind(&envelope.context)
    .execute(&mut **tx)
    .await?;

    let serialized = serde_json::to_value(&envelope)?;
    sqlx::query(
        r#"
        INSERT INTO outbox (event_id, topic, payload, attempts, next_attempt_at)
        VALUES ($1, $2, $3, 0, NOW())
        "#,
    )
    .bind(envelope.event_id)
    .bind(topic)
    .bind(&serialized)
    .execute(&mut **tx)
    .await?;

    debug!(
        event_id = %envelope.event_id,
        event_type = %envelope.event_type,
        topic = %topic,
        "Event persisted"
    );

    Ok(envelope)
}
