//! Artifact derivation from accepted actions.
//!
//! Artifacts are bounded records, never full bodies: summaries clip at 200
//! characters and heavy payload fields stay out of metadata. Implicating
//! actions additionally write the implication row linking issuer to
//! subject.

use crate::error::Result;
use crate::types::{actor_agent_id, clip, context_sponsor_id, ActionEventPayload};
use ox_domain::ActionType;
use ox_eventlog::Envelope;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Summary clip length.
const SUMMARY_LEN: usize = 200;

/// Payload fields too heavy for artifact metadata.
const BODY_FIELDS: [&str; 4] = ["body", "content", "data", "message"];

pub(crate) async fn derive(
    pool: &PgPool,
    envelope: &Envelope,
    action: &ActionEventPayload,
) -> Result<()> {
    let Some(agent_id) = actor_agent_id(envelope) else {
        return Ok(());
    };
    let Ok(action_type) = ActionType::parse(&action.action_type) else {
        return Ok(());
    };

    let Some(derived) = derive_artifact(action_type, &action.payload) else {
        return Ok(());
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO artifacts (
            artifact_id, source_event_id, artifact_type, agent_id,
            subject_agent_id, title, content_summary, metadata, sponsor_id, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(envelope.event_id)
    .bind(&derived.artifact_type)
    .bind(agent_id)
    .bind(action.subject_agent_id)
    .bind(&derived.title)
    .bind(&derived.summary)
    .bind(&derived.metadata)
    .bind(context_sponsor_id(envelope))
    .bind(envelope.occurred_at)
    .execute(&mut *tx)
    .await?;

    if action_type.is_implicating() {
        if let Some(subject_agent_id) = action.subject_agent_id {
            write_implication(&mut tx, envelope, agent_id, subject_agent_id, action_type).await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn write_implication(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &Envelope,
    issuing_agent_id: Uuid,
    subject_agent_id: Uuid,
    action_type: ActionType,
) -> Result<()> {
    // Replays skip the artifact insert above, so the id must be looked up,
    // not remembered.
    let artifact_id: Option<Uuid> =
        sqlx::query_scalar("SELECT artifact_id FROM artifacts WHERE source_event_id = $1")
            .bind(envelope.event_id)
            .fetch_optional(&mut **tx)
            .await?;

    let Some(artifact_id) = artifact_id else {
        return Ok(());
    };

    sqlx::query(
        r#"
        INSERT INTO artifact_implications (
            source_event_id, artifact_id, issuing_agent_id, subject_agent_id,
            implication_type, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(artifact_id)
    .bind(issuing_agent_id)
    .bind(subject_agent_id)
    .bind(action_type.as_str())
    .bind(envelope.occurred_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

struct DerivedArtifact {
    artifact_type: String,
    title: String,
    summary: String,
    metadata: Value,
}

/// The derivation table: action type + payload hints to artifact shape.
fn derive_artifact(action_type: ActionType, payload: &Value) -> Option<DerivedArtifact> {
    let text = |key: &str| payload.get(key).and_then(Value::as_str);

    let artifact = match action_type {
        ActionType::Communicate => DerivedArtifact {
            artifact_type: "message".to_string(),
            title: "Communication".to_string(),
            summary: clip(text("message").unwrap_or(""), SUMMARY_LEN).to_string(),
            metadata: strip_body(payload),
        },
        ActionType::Create => {
            let payload_type = text("type").unwrap_or("");
            let title = text("title").unwrap_or("Creation").to_string();
            match payload_type {
                "proposal" => DerivedArtifact {
                    artifact_type: "proposal".to_string(),
                    title,
                    summary: clip(text("summary").unwrap_or(""), SUMMARY_LEN).to_string(),
                    metadata: strip_body(payload),
                },
                "diagram" | "dataset" => DerivedArtifact {
                    artifact_type: payload_type.to_string(),
                    title,
                    // Metadata only; no body summary for structured creations.
                    summary: String::new(),
                    metadata: strip_body(payload),
                },
                _ => DerivedArtifact {
                    artifact_type: "creation".to_string(),
                    title,
                    summary: clip(text("summary").unwrap_or(""), SUMMARY_LEN).to_string(),
                    metadata: strip_body(payload),
                },
            }
        }
        ActionType::Exchange => DerivedArtifact {
            artifact_type: "message".to_string(),
            title: "Exchange".to_string(),
            summary: "Exchange between agents".to_string(),
            metadata: strip_body(payload),
        },
        ActionType::Critique
        | ActionType::CounterModel
        | ActionType::Refusal
        | ActionType::Rederivation => {
            let summary = text("summary").or_else(|| text("reason")).unwrap_or("");
            DerivedArtifact {
                artifact_type: action_type.as_str().to_string(),
                title: implicating_title(action_type).to_string(),
                summary: clip(summary, SUMMARY_LEN).to_string(),
                metadata: strip_body(payload),
            }
        }
        // Associative and escalatory actions leave no artifact.
        ActionType::Associate | ActionType::Conflict | ActionType::Withdraw => return None,
    };

    Some(artifact)
}

fn implicating_title(action_type: ActionType) -> &'static str {
    match action_type {
        ActionType::Critique => "Critique",
        ActionType::CounterModel => "Counter-model",
        ActionType::Refusal => "Refusal",
        ActionType::Rederivation => "Rederivation",
        _ => "Artifact",
    }
}

/// Metadata keeps the payload minus its heavy body fields.
fn strip_body(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let stripped: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !BODY_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(stripped)
        }
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_communicate_clips_message() {
        let payload = json!({"message": "m".repeat(500)});
        let artifact = derive_artifact(ActionType::Communicate, &payload).unwrap();
        assert_eq!(artifact.artifact_type, "message");
        assert_eq!(artifact.title, "Communication");
        assert_eq!(artifact.summary.len(), SUMMARY_LEN);
        // body field stays out of metadata
        assert!(artifact.metadata.get("message").is_none());
    }

    #[test]
    fn test_create_proposal_uses_payload_title() {
        let payload = json!({"type": "proposal", "title": "Mesh v2", "summary": "A plan"});
        let artifact = derive_artifact(ActionType::Create, &payload).unwrap();
        assert_eq!(artifact.artifact_type, "proposal");
        assert_eq!(artifact.title, "Mesh v2");
        assert_eq!(artifact.summary, "A plan");
    }

    #[test]
    fn test_diagram_is_metadata_only() {
        let payload = json!({"type": "diagram", "title": "Topology", "body": "<svg>...</svg>"});
        let artifact = derive_artifact(ActionType::Create, &payload).unwrap();
        assert_eq!(artifact.artifact_type, "diagram");
        assert!(artifact.summary.is_empty());
        assert!(artifact.metadata.get("body").is_none());
    }

    #[test]
    fn test_critique_falls_back_to_reason() {
        let payload = json!({"reason": "model ignores decay"});
        let artifact = derive_artifact(ActionType::Critique, &payload).unwrap();
        assert_eq!(artifact.artifact_type, "critique");
        assert_eq!(artifact.summary, "model ignores decay");
    }

    #[test]
    fn test_conflict_leaves_no_artifact() {
        assert!(derive_artifact(ActionType::Conflict, &json!({})).is_none());
        assert!(derive_artifact(ActionType::Associate, &json!({})).is_none());
    }
}
