//! Environment history and rejection projections.

use crate::error::Result;
use crate::types::{actor_agent_id, ActionEventPayload, EnvironmentChangePayload};
use ox_eventlog::Envelope;
use sqlx::PgPool;

pub(crate) async fn record_change(
    pool: &PgPool,
    envelope: &Envelope,
    change: &EnvironmentChangePayload,
    change_type: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO environment_history (
            source_event_id, deployment_target, change_type, state, changed_at
        ) VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(&change.deployment_target)
    .bind(change_type)
    .bind(&change.state)
    .bind(envelope.occurred_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn record_rejection(
    pool: &PgPool,
    envelope: &Envelope,
    action: &ActionEventPayload,
) -> Result<()> {
    let Some(agent_id) = actor_agent_id(envelope) else {
        return Ok(());
    };

    sqlx::query(
        r#"
        INSERT INTO environment_rejections (
            source_event_id, deployment_target, agent_id, reason, rejected_at
        ) VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(&action.deployment_target)
    .bind(agent_id)
    .bind(action.reason.as_deref().unwrap_or("environment"))
    .bind(envelope.occurred_at)
    .execute(pool)
    .await?;

    Ok(())
}
