//! Session derivation.
//!
//! Sessions group action events by deployment and time. An action joins an
//! active session started within the last five minutes when the agent is
//! already a participant or another agent acted in the last thirty seconds;
//! otherwise a new session opens only for co-present activity or an
//! escalation. Stale sessions close lazily on the next observation.

use crate::error::Result;
use crate::types::ActionEventPayload;
use chrono::{DateTime, Duration, Utc};
use ox_domain::events::event_types;
use ox_domain::ActionType;
use ox_eventlog::Envelope;
use serde_json::json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Join window measured from session start.
const SESSION_WINDOW_SECS: i64 = 300;

/// Co-presence window for joining or opening a session.
const CO_PRESENCE_SECS: i64 = 30;

#[derive(Debug, FromRow)]
struct SessionRow {
    session_id: Uuid,
    participating_agent_ids: Vec<Uuid>,
    derived_topic: String,
    action_type_counts: serde_json::Value,
}

pub(crate) async fn apply_action(
    pool: &PgPool,
    envelope: &Envelope,
    action: &ActionEventPayload,
) -> Result<()> {
    let Some(agent_id) = crate::types::actor_agent_id(envelope) else {
        return Ok(());
    };
    let ts = envelope.occurred_at;
    let deployment = action.deployment_target.as_str();

    let mut tx = pool.begin().await?;

    // Replay guard: the session_event row is the witness that this event
    // was already folded in.
    let seen: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM session_events WHERE source_event_id = $1")
            .bind(envelope.event_id)
            .fetch_optional(&mut *tx)
            .await?;
    if seen.is_some() {
        tx.rollback().await?;
        return Ok(());
    }

    close_stale_sessions(&mut tx, deployment, ts).await?;

    let joinable: Option<SessionRow> = sqlx::query_as(
        r#"
        SELECT session_id, participating_agent_ids, derived_topic, action_type_counts
        FROM sessions
        WHERE deployment_target = $1
          AND is_active
          AND start_ts >= $2
          AND ($3 = ANY(participating_agent_ids)
               OR EXISTS (
                   SELECT 1 FROM session_events se
                   WHERE se.session_id = sessions.session_id
                     AND se.agent_id <> $3
                     AND se.ts >= $4
               ))
        ORDER BY start_ts DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(deployment)
    .bind(ts - Duration::seconds(SESSION_WINDOW_SECS))
    .bind(agent_id)
    .bind(ts - Duration::seconds(CO_PRESENCE_SECS))
    .fetch_optional(&mut *tx)
    .await?;

    match joinable {
        Some(session) => {
            extend_session(&mut tx, envelope, action, &session, agent_id, ts).await?;
        }
        None => {
            maybe_create_session(&mut tx, envelope, action, agent_id, ts).await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn close_stale_sessions(
    tx: &mut Transaction<'_, Postgres>,
    deployment: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sessions
        SET is_active = FALSE, end_ts = last_event_ts
        WHERE deployment_target = $1
          AND is_active
          AND last_event_ts < $2
        "#,
    )
    .bind(deployment)
    .bind(now - Duration::seconds(SESSION_WINDOW_SECS))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn extend_session(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &Envelope,
    action: &ActionEventPayload,
    session: &SessionRow,
    agent_id: Uuid,
    ts: DateTime<Utc>,
) -> Result<()> {
    let mut counts = counts_from_json(&session.action_type_counts);
    *counts.entry(action.action_type.clone()).or_insert(0) += 1;
    let topic = derive_topic(&counts);

    let mut participants = session.participating_agent_ids.clone();
    if !participants.contains(&agent_id) {
        participants.push(agent_id);
    }

    sqlx::query(
        r#"
        UPDATE sessions
        SET participating_agent_ids = $2,
            last_event_ts = GREATEST(last_event_ts, $3),
            event_count = event_count + 1,
            action_type_counts = $4,
            derived_topic = $5
        WHERE session_id = $1
        "#,
    )
    .bind(session.session_id)
    .bind(&participants)
    .bind(ts)
    .bind(counts_to_json(&counts))
    .bind(topic)
    .execute(&mut **tx)
    .await?;

    insert_session_event(tx, envelope, session.session_id, agent_id, &action.action_type, ts)
        .await?;

    if topic != session.derived_topic {
        insert_narrative_frame(
            tx,
            envelope,
            session.session_id,
            &action.deployment_target,
            topic,
            Some(session.derived_topic.as_str()),
            participants.len(),
            &counts,
        )
        .await?;
    }

    Ok(())
}

#[derive(Debug, FromRow)]
struct RecentActionRow {
    source_event_id: Uuid,
    agent_id: Uuid,
    action_type: Option<String>,
    occurred_at: DateTime<Utc>,
}

async fn maybe_create_session(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &Envelope,
    action: &ActionEventPayload,
    agent_id: Uuid,
    ts: DateTime<Utc>,
) -> Result<()> {
    // Co-present activity: other agents' action events on this deployment
    // in the last thirty seconds. Their events seed the new session, so the
    // session contains the activity that justified opening it.
    let recent: Vec<RecentActionRow> = sqlx::query_as(
        r#"
        SELECT source_event_id, agent_id, payload->>'action_type' AS action_type, occurred_at
        FROM live_events
        WHERE deployment_target = $1
          AND agent_id IS NOT NULL
          AND agent_id <> $2
          AND occurred_at >= $3
          AND occurred_at <= $4
          AND event_type IN ($5, $6, $7)
        ORDER BY occurred_at
        "#,
    )
    .bind(&action.deployment_target)
    .bind(agent_id)
    .bind(ts - Duration::seconds(CO_PRESENCE_SECS))
    .bind(ts)
    .bind(event_types::ACTION_ACCEPTED)
    .bind(event_types::ACTION_REJECTED)
    .bind(event_types::ACTION_REJECTED_ENVIRONMENT)
    .fetch_all(&mut **tx)
    .await?;

    let escalation = ActionType::parse(&action.action_type)
        .map(|t| t.is_escalation())
        .unwrap_or(false);

    if recent.is_empty() && !escalation {
        return Ok(());
    }

    let mut participants = vec![agent_id];
    for row in &recent {
        if !participants.contains(&row.agent_id) {
            participants.push(row.agent_id);
        }
    }

    let start_ts = recent.first().map(|r| r.occurred_at).unwrap_or(ts).min(ts);

    let session_id = Uuid::now_v7();
    let created = sqlx::query(
        r#"
        INSERT INTO sessions (
            session_id, deployment_target, participating_agent_ids,
            start_ts, last_event_ts, is_active, derived_topic,
            action_type_counts, event_count, source_event_id
        ) VALUES ($1, $2, $3, $4, $5, TRUE, 'general_activity', '{}', 0, $6)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(session_id)
    .bind(&action.deployment_target)
    .bind(&participants)
    .bind(start_ts)
    .bind(ts)
    .bind(envelope.event_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if created == 0 {
        return Ok(());
    }

    // Fold the seed events in. An event already claimed by another session
    // keeps its original membership (primary key on source_event_id).
    let mut counts = BTreeMap::new();
    let mut folded = 0i64;

    for row in &recent {
        let action_type = row.action_type.clone().unwrap_or_else(|| "unknown".to_string());
        let inserted = sqlx::query(
            r#"
            INSERT INTO session_events (source_event_id, session_id, agent_id, action_type, ts)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_event_id) DO NOTHING
            "#,
        )
        .bind(row.source_event_id)
        .bind(session_id)
        .bind(row.agent_id)
        .bind(&action_type)
        .bind(row.occurred_at)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            *counts.entry(action_type).or_insert(0) += 1;
            folded += 1;
        }
    }

    *counts.entry(action.action_type.clone()).or_insert(0) += 1;
    folded += 1;
    insert_session_event(tx, envelope, session_id, agent_id, &action.action_type, ts).await?;

    let topic = derive_topic(&counts);
    sqlx::query(
        r#"
        UPDATE sessions
        SET event_count = $2, action_type_counts = $3, derived_topic = $4
        WHERE session_id = $1
        "#,
    )
    .bind(session_id)
    .bind(folded as i32)
    .bind(counts_to_json(&counts))
    .bind(topic)
    .execute(&mut **tx)
    .await?;

    insert_narrative_frame(
        tx,
        envelope,
        session_id,
        &action.deployment_target,
        topic,
        None,
        participants.len(),
        &counts,
    )
    .await?;

    debug!(
        session_id = %session_id,
        deployment = %action.deployment_target,
        participants = participants.len(),
        events = folded,
        topic,
        "Session opened"
    );

    Ok(())
}

async fn insert_session_event(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &Envelope,
    session_id: Uuid,
    agent_id: Uuid,
    action_type: &str,
    ts: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO session_events (source_event_id, session_id, agent_id, action_type, ts)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(session_id)
    .bind(agent_id)
    .bind(action_type)
    .bind(ts)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_narrative_frame(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &Envelope,
    session_id: Uuid,
    deployment: &str,
    topic: &str,
    previous_topic: Option<&str>,
    participant_count: usize,
    counts: &BTreeMap<String, i64>,
) -> Result<()> {
    let dominant = counts
        .iter()
        .max_by_key(|(_, n)| **n)
        .map(|(t, _)| t.as_str())
        .unwrap_or("none");

    let summary = match previous_topic {
        Some(previous) => format!(
            "Session shifted from {previous} to {topic}; {participant_count} agents, mostly {dominant}"
        ),
        None => format!("Session opened as {topic}; {participant_count} agents"),
    };

    sqlx::query(
        r#"
        INSERT INTO narrative_frames (
            source_event_id, session_id, deployment_target, frame_type,
            previous_topic, summary, participant_count, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(session_id)
    .bind(deployment)
    .bind(topic)
    .bind(previous_topic)
    .bind(summary)
    .bind(participant_count as i32)
    .bind(envelope.occurred_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn counts_from_json(value: &serde_json::Value) -> BTreeMap<String, i64> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default()
}

fn counts_to_json(counts: &BTreeMap<String, i64>) -> serde_json::Value {
    json!(counts)
}

/// Topic precedence over the multiset of action types seen so far.
fn derive_topic(counts: &BTreeMap<String, i64>) -> &'static str {
    let has = |t: &str| counts.get(t).copied().unwrap_or(0) > 0;

    if has("conflict") {
        "conflict_scene"
    } else if has("exchange") {
        "exchange_scene"
    } else if has("associate") {
        "association_scene"
    } else if has("communicate") && has("create") {
        "collaborative_scene"
    } else if has("communicate") {
        "communication_scene"
    } else if has("create") {
        "creation_scene"
    } else {
        "general_activity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_conflict_dominates_everything() {
        let c = counts(&[("communicate", 5), ("create", 3), ("conflict", 1)]);
        assert_eq!(derive_topic(&c), "conflict_scene");
    }

    #[test]
    fn test_exchange_beats_association() {
        let c = counts(&[("associate", 2), ("exchange", 1)]);
        assert_eq!(derive_topic(&c), "exchange_scene");
    }

    #[test]
    fn test_collaborative_needs_both() {
        assert_eq!(
            derive_topic(&counts(&[("communicate", 1), ("create", 1)])),
            "collaborative_scene"
        );
        assert_eq!(derive_topic(&counts(&[("communicate", 2)])), "communication_scene");
        assert_eq!(derive_topic(&counts(&[("create", 2)])), "creation_scene");
    }

    #[test]
    fn test_empty_is_general_activity() {
        assert_eq!(derive_topic(&BTreeMap::new()), "general_activity");
        assert_eq!(derive_topic(&counts(&[("withdraw", 3)])), "general_activity");
    }
}
