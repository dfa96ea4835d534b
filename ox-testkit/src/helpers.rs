//! Test helper functions for database seeding and envelope construction.

use chrono::{DateTime, Utc};
use ox_eventlog::Envelope;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::Result;

/// Seed an active agent with capacity. Returns the agent id.
pub async fn seed_agent(
    pool: &PgPool,
    deployment_target: &str,
    balance: i64,
    max_balance: i64,
    regen_per_hour: i64,
) -> Result<Uuid> {
    let agent_id = Uuid::now_v7();

    sqlx::query(
        r#"
        INSERT INTO agents (
            agent_id, display_name, status, deployment_target,
            cognition_provider, throttle_profile, generation
        ) VALUES ($1, $2, 'active', $3, 'none', 'normal', 1)
        "#,
    )
    .bind(agent_id)
    .bind(format!("test-agent-{agent_id}"))
    .bind(deployment_target)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO agent_capacity (agent_id, balance, max_balance, regen_per_hour) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(agent_id)
    .bind(balance)
    .bind(max_balance)
    .bind(regen_per_hour)
    .execute(pool)
    .await?;

    sqlx::query("INSERT INTO agent_configs (agent_id) VALUES ($1)")
        .bind(agent_id)
        .execute(pool)
        .await?;

    Ok(agent_id)
}

/// Seed a sponsor wallet with a balance. Returns the sponsor id.
pub async fn seed_wallet(pool: &PgPool, balance: Decimal) -> Result<Uuid> {
    let sponsor_id = Uuid::now_v7();

    sqlx::query("INSERT INTO sponsor_wallets (sponsor_id, balance) VALUES ($1, $2)")
        .bind(sponsor_id)
        .bind(balance)
        .execute(pool)
        .await?;

    Ok(sponsor_id)
}

/// Build an envelope without touching the database.
pub fn make_envelope(
    event_type: &str,
    payload: serde_json::Value,
    actor_id: Option<String>,
    occurred_at: DateTime<Utc>,
) -> Envelope {
    Envelope {
        event_id: Uuid::now_v7(),
        event_type: event_type.to_string(),
        occurred_at,
        actor_id,
        actor_generation: Some(1),
        correlation_id: None,
        idempotency_key: None,
        payload,
        context: None,
    }
}

/// Options for building action event envelopes.
pub struct ActionEnvelopeOptions {
    pub agent_id: Uuid,
    pub deployment_target: String,
    pub action_type: String,
    pub accepted: bool,
    pub occurred_at: DateTime<Utc>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub subject_agent_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

impl ActionEnvelopeOptions {
    pub fn accepted(
        agent_id: Uuid,
        deployment_target: &str,
        action_type: &str,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id,
            deployment_target: deployment_target.to_string(),
            action_type: action_type.to_string(),
            accepted: true,
            occurred_at,
            balance_before: 100,
            balance_after: 90,
            subject_agent_id: None,
            payload: json!({}),
        }
    }
}

/// Build an action event envelope shaped like the admission engine's.
pub fn make_action_envelope(options: ActionEnvelopeOptions) -> Envelope {
    let event_type = if options.accepted {
        ox_domain::events::event_types::ACTION_ACCEPTED
    } else {
        ox_domain::events::event_types::ACTION_REJECTED
    };

    let payload = json!({
        "action_type": options.action_type,
        "requested_cost": options.balance_before - options.balance_after,
        "estimated_cost": 0,
        "total_cost": options.balance_before - options.balance_after,
        "subject_agent_id": options.subject_agent_id,
        "deployment_target": options.deployment_target,
        "balance_before": options.balance_before,
        "balance_after": options.balance_after,
        "payload": options.payload,
        "cognition": null,
    });

    Envelope {
        event_id: Uuid::now_v7(),
        event_type: event_type.to_string(),
        occurred_at: options.occurred_at,
        actor_id: Some(options.agent_id.to_string()),
        actor_generation: Some(1),
        correlation_id: None,
        idempotency_key: None,
        payload,
        context: Some(json!({ "deployment_target": options.deployment_target })),
    }
}
