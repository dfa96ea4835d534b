//! Live event materialization.
//!
//! Every envelope becomes one live_events row with a built summary; this is
//! the table the read API pages through and the session/pattern handlers
//! mine for recent activity.

use crate::error::Result;
use crate::types::{actor_agent_id, context_sponsor_id};
use ox_domain::events::event_types;
use ox_eventlog::Envelope;
use sqlx::PgPool;

pub(crate) async fn materialize(pool: &PgPool, envelope: &Envelope) -> Result<()> {
    let deployment_target = envelope
        .payload
        .get("deployment_target")
        .and_then(|v| v.as_str())
        .or_else(|| {
            envelope
                .context
                .as_ref()
                .and_then(|c| c.get("deployment_target"))
                .and_then(|v| v.as_str())
        })
        .map(str::to_string);

    sqlx::query(
        r#"
        INSERT INTO live_events (
            source_event_id, event_type, occurred_at, agent_id,
            deployment_target, summary, payload, sponsor_id
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(&envelope.event_type)
    .bind(envelope.occurred_at)
    .bind(actor_agent_id(envelope))
    .bind(deployment_target)
    .bind(build_summary(envelope))
    .bind(&envelope.payload)
    .bind(context_sponsor_id(envelope))
    .execute(pool)
    .await?;

    Ok(())
}

/// Compact, role-independent one-liner for viewers.
fn build_summary(envelope: &Envelope) -> String {
    let payload = &envelope.payload;
    let action = payload.get("action_type").and_then(|v| v.as_str()).unwrap_or("?");

    match envelope.event_type.as_str() {
        event_types::ACTION_ACCEPTED => format!("Agent action accepted: {action}"),
        event_types::ACTION_REJECTED => {
            let reason = payload.get("reason").and_then(|v| v.as_str()).unwrap_or("rejected");
            format!("Agent action rejected: {action} ({reason})")
        }
        event_types::ACTION_REJECTED_ENVIRONMENT => {
            let reason = payload.get("reason").and_then(|v| v.as_str()).unwrap_or("environment");
            format!("Environment refused {action} ({reason})")
        }
        event_types::ARTIFACT_ISSUED => "Artifact issued".to_string(),
        event_types::ARTIFACT_IMPLICATES_AGENT => {
            let implication = payload
                .get("implication_type")
                .and_then(|v| v.as_str())
                .unwrap_or("implication");
            format!("Artifact implicates agent ({implication})")
        }
        event_types::PRESSURE_ISSUED => {
            let ptype = payload.get("pressure_type").and_then(|v| v.as_str()).unwrap_or("?");
            format!("Sponsor pressure issued: {ptype}")
        }
        event_types::PRESSURE_CANCELLED => "Sponsor pressure cancelled".to_string(),
        event_types::CREDITS_PURCHASED => "Sponsor credits purchased".to_string(),
        event_types::CREDITS_ALLOCATED => "Sponsor credits allocated".to_string(),
        event_types::POLICY_APPLIED => "Sponsor policy applied".to_string(),
        event_types::POLICY_SKIPPED => "Sponsor policy skipped".to_string(),
        event_types::ENVIRONMENT_STATE_CHANGED => "Environment constraints changed".to_string(),
        event_types::ENVIRONMENT_STATE_REMOVED => "Environment constraints removed".to_string(),
        event_types::BRAID_COMPUTED => "Physics braid computed".to_string(),
        other => format!("Event: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(event_type: &str, payload: serde_json::Value) -> Envelope {
        Envelope {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            occurred_at: Utc::now(),
            actor_id: None,
            actor_generation: None,
            correlation_id: None,
            idempotency_key: None,
            payload,
            context: None,
        }
    }

    #[test]
    fn test_summary_includes_rejection_reason() {
        let env = envelope(
            event_types::ACTION_REJECTED,
            json!({"action_type": "create", "reason": "insufficient_capacity"}),
        );
        assert_eq!(
            build_summary(&env),
            "Agent action rejected: create (insufficient_capacity)"
        );
    }

    #[test]
    fn test_summary_for_unknown_type_passes_through() {
        let env = envelope("agent.totally_new", json!({}));
        assert_eq!(build_summary(&env), "Event: agent.totally_new");
    }
}
