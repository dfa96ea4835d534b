//! Agent pattern observation.
//!
//! One row per (agent, daily window): action frequency per type split into
//! total/accepted/rejected, plus collaboration breadth (distinct co-acting
//! agents within ±30 s). Recomputed from live_events on every action event,
//! which makes replays harmless.

use crate::error::Result;
use crate::types::ActionEventPayload;
use chrono::{DateTime, Duration, DurationRound, TimeDelta, Utc};
use ox_domain::events::event_types;
use ox_eventlog::Envelope;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;

#[derive(Debug, FromRow)]
struct TypeCount {
    action_type: Option<String>,
    event_type: String,
    count: i64,
}

pub(crate) async fn update_window(
    pool: &PgPool,
    envelope: &Envelope,
    _action: &ActionEventPayload,
) -> Result<()> {
    let Some(agent_id) = crate::types::actor_agent_id(envelope) else {
        return Ok(());
    };

    let window_start = day_window(envelope.occurred_at);
    let window_end = window_start + Duration::hours(24);

    let counts: Vec<TypeCount> = sqlx::query_as(
        r#"
        SELECT payload->>'action_type' AS action_type, event_type, COUNT(*) AS count
        FROM live_events
        WHERE agent_id = $1
          AND occurred_at >= $2 AND occurred_at < $3
          AND event_type IN ($4, $5, $6)
        GROUP BY 1, 2
        "#,
    )
    .bind(agent_id)
    .bind(window_start)
    .bind(window_end)
    .bind(event_types::ACTION_ACCEPTED)
    .bind(event_types::ACTION_REJECTED)
    .bind(event_types::ACTION_REJECTED_ENVIRONMENT)
    .fetch_all(pool)
    .await?;

    let mut frequencies: BTreeMap<String, (i64, i64, i64)> = BTreeMap::new();
    for row in counts {
        let entry = frequencies
            .entry(row.action_type.unwrap_or_else(|| "unknown".to_string()))
            .or_insert((0, 0, 0));
        entry.0 += row.count;
        if row.event_type == event_types::ACTION_ACCEPTED {
            entry.1 += row.count;
        } else {
            entry.2 += row.count;
        }
    }

    // Collaboration breadth: distinct other agents whose action events land
    // within ±30 s of this agent's action events inside the window.
    let breadth: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT other.agent_id)
        FROM live_events mine
        JOIN live_events other
          ON other.deployment_target = mine.deployment_target
         AND other.agent_id IS NOT NULL
         AND other.agent_id <> mine.agent_id
         AND other.occurred_at BETWEEN mine.occurred_at - INTERVAL '30 seconds'
                                   AND mine.occurred_at + INTERVAL '30 seconds'
         AND other.event_type IN ($4, $5, $6)
        WHERE mine.agent_id = $1
          AND mine.occurred_at >= $2 AND mine.occurred_at < $3
          AND mine.event_type IN ($4, $5, $6)
        "#,
    )
    .bind(agent_id)
    .bind(window_start)
    .bind(window_end)
    .bind(event_types::ACTION_ACCEPTED)
    .bind(event_types::ACTION_REJECTED)
    .bind(event_types::ACTION_REJECTED_ENVIRONMENT)
    .fetch_one(pool)
    .await?;

    let observation = json!({
        "action_frequency": frequencies
            .iter()
            .map(|(action_type, (total, accepted, rejected))| {
                (
                    action_type.clone(),
                    json!({ "total": total, "accepted": accepted, "rejected": rejected }),
                )
            })
            .collect::<serde_json::Map<_, _>>(),
        "collaboration_breadth": breadth,
    });

    sqlx::query(
        r#"
        INSERT INTO agent_patterns (agent_id, window_start, window_end, observation, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (agent_id, window_start)
            DO UPDATE SET observation = EXCLUDED.observation,
                          window_end = EXCLUDED.window_end,
                          updated_at = NOW()
        "#,
    )
    .bind(agent_id)
    .bind(window_start)
    .bind(window_end)
    .bind(&observation)
    .execute(pool)
    .await?;

    Ok(())
}

fn day_window(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::days(1)).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_window_truncates_to_midnight() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 17, 45, 9).unwrap();
        assert_eq!(day_window(at), Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    }
}
