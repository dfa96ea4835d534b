//! Capacity timeline.
//!
//! One row per action event recording the balance movement and cost
//! breakdown, idempotent on source_event_id.

use crate::error::Result;
use crate::types::{actor_agent_id, ActionEventPayload};
use ox_eventlog::Envelope;
use serde_json::json;
use sqlx::PgPool;

pub(crate) async fn record_timeline(
    pool: &PgPool,
    envelope: &Envelope,
    action: &ActionEventPayload,
) -> Result<()> {
    let Some(agent_id) = actor_agent_id(envelope) else {
        return Ok(());
    };

    let cost_breakdown = json!({
        "requested": action.requested_cost,
        "estimated": action.estimated_cost,
        "total": action.total_cost,
        "cognition": action.cognition,
        "reason": action.reason,
    });

    sqlx::query(
        r#"
        INSERT INTO capacity_timeline (
            source_event_id, agent_id, ts, balance_before, balance_after, cost_breakdown
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(agent_id)
    .bind(envelope.occurred_at)
    .bind(action.balance_before)
    .bind(action.balance_after)
    .bind(&cost_breakdown)
    .execute(pool)
    .await?;

    Ok(())
}
