//! Agent repository.
//!
//! One row per agent; lifecycle mutations go through here so the status and
//! generation invariants live in one place.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use ox_domain::{Agent, AgentConfig, AgentStatus, ThrottleProfile};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct AgentRow {
    agent_id: Uuid,
    display_name: String,
    status: String,
    deployment_target: String,
    sponsor_id: Option<Uuid>,
    cognition_provider: String,
    throttle_profile: String,
    generation: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = StoreError;

    fn try_from(row: AgentRow) -> Result<Agent> {
        Ok(Agent {
            agent_id: row.agent_id,
            display_name: row.display_name,
            status: AgentStatus::parse(&row.status)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?,
            deployment_target: row.deployment_target,
            sponsor_id: row.sponsor_id,
            cognition_provider: row.cognition_provider,
            throttle_profile: ThrottleProfile::parse(&row.throttle_profile)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?,
            generation: row.generation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const AGENT_COLUMNS: &str = "agent_id, display_name, status, deployment_target, sponsor_id, \
     cognition_provider, throttle_profile, generation, created_at, updated_at";

/// Insert a new agent along with its capacity and config rows.
pub async fn create_agent(
    tx: &mut Transaction<'_, Postgres>,
    agent: &Agent,
    max_balance: i64,
    initial_balance: i64,
    regen_per_hour: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO agents (
            agent_id, display_name, status, deployment_target, sponsor_id,
            cognition_provider, throttle_profile, generation, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        "#,
    )
    .bind(agent.agent_id)
    .bind(&agent.display_name)
    .bind(agent.status.as_str())
    .bind(&agent.deployment_target)
    .bind(agent.sponsor_id)
    .bind(&agent.cognition_provider)
    .bind(agent.throttle_profile.as_str())
    .bind(agent.generation)
    .bind(agent.created_at)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO agent_capacity (agent_id, balance, max_balance, regen_per_hour, last_reconciled_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(agent.agent_id)
    .bind(initial_balance.min(max_balance))
    .bind(max_balance)
    .bind(regen_per_hour)
    .bind(agent.created_at)
    .execute(&mut **tx)
    .await?;

    sqlx::query("INSERT INTO agent_configs (agent_id) VALUES ($1)")
        .bind(agent.agent_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub async fn get_agent(pool: &PgPool, agent_id: Uuid) -> Result<Option<Agent>> {
    let row: Option<AgentRow> =
        sqlx::query_as(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1"))
            .bind(agent_id)
            .fetch_optional(pool)
            .await?;

    row.map(Agent::try_from).transpose()
}

/// Load an agent inside a transaction (admission path).
pub async fn get_agent_tx(
    tx: &mut Transaction<'_, Postgres>,
    agent_id: Uuid,
) -> Result<Option<Agent>> {
    let row: Option<AgentRow> =
        sqlx::query_as(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1"))
            .bind(agent_id)
            .fetch_optional(&mut **tx)
            .await?;

    row.map(Agent::try_from).transpose()
}

/// List active agents sponsored by `sponsor_id` (policy sweep input).
pub async fn list_sponsored_agents(pool: &PgPool, sponsor_id: Uuid) -> Result<Vec<Agent>> {
    let rows: Vec<AgentRow> = sqlx::query_as(&format!(
        "SELECT {AGENT_COLUMNS} FROM agents WHERE sponsor_id = $1 AND status = 'active' \
         ORDER BY created_at"
    ))
    .bind(sponsor_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Agent::try_from).collect()
}

/// Archive an agent. One-way; archiving an archived agent is a no-op error.
pub async fn archive_agent(pool: &PgPool, agent_id: Uuid) -> Result<Agent> {
    let row: Option<AgentRow> = sqlx::query_as(&format!(
        r#"
        UPDATE agents SET status = 'archived', updated_at = NOW()
        WHERE agent_id = $1 AND status = 'active'
        RETURNING {AGENT_COLUMNS}
        "#
    ))
    .bind(agent_id)
    .fetch_optional(pool)
    .await?;

    row.map(Agent::try_from)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("agent", agent_id.to_string()))
}

/// Redeploy: swap target, reactivate, bump the generation.
pub async fn redeploy_agent(pool: &PgPool, agent_id: Uuid, target: &str) -> Result<Agent> {
    let row: Option<AgentRow> = sqlx::query_as(&format!(
        r#"
        UPDATE agents
        SET deployment_target = $2, status = 'active',
            generation = generation + 1, updated_at = NOW()
        WHERE agent_id = $1
        RETURNING {AGENT_COLUMNS}
        "#
    ))
    .bind(agent_id)
    .bind(target)
    .fetch_optional(pool)
    .await?;

    row.map(Agent::try_from)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("agent", agent_id.to_string()))
}

/// Reassign the sponsor.
pub async fn set_sponsor(pool: &PgPool, agent_id: Uuid, sponsor_id: Option<Uuid>) -> Result<Agent> {
    let row: Option<AgentRow> = sqlx::query_as(&format!(
        r#"
        UPDATE agents SET sponsor_id = $2, updated_at = NOW()
        WHERE agent_id = $1
        RETURNING {AGENT_COLUMNS}
        "#
    ))
    .bind(agent_id)
    .bind(sponsor_id)
    .fetch_optional(pool)
    .await?;

    row.map(Agent::try_from)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("agent", agent_id.to_string()))
}

/// Change provider and/or throttle profile.
pub async fn set_provider_profile(
    pool: &PgPool,
    agent_id: Uuid,
    provider: Option<&str>,
    profile: Option<ThrottleProfile>,
) -> Result<Agent> {
    let row: Option<AgentRow> = sqlx::query_as(&format!(
        r#"
        UPDATE agents
        SET cognition_provider = COALESCE($2, cognition_provider),
            throttle_profile = COALESCE($3, throttle_profile),
            updated_at = NOW()
        WHERE agent_id = $1
        RETURNING {AGENT_COLUMNS}
        "#
    ))
    .bind(agent_id)
    .bind(provider)
    .bind(profile.map(|p| p.as_str()))
    .fetch_optional(pool)
    .await?;

    row.map(Agent::try_from)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("agent", agent_id.to_string()))
}

// =============================================================================
// Agent config
// =============================================================================

#[derive(Debug, FromRow)]
struct ConfigRow {
    agent_id: Uuid,
    bias: serde_json::Value,
    throttle_config: serde_json::Value,
    cognition_config: serde_json::Value,
    version: i64,
    portable_config: Option<serde_json::Value>,
    updated_at: DateTime<Utc>,
}

pub async fn get_config(pool: &PgPool, agent_id: Uuid) -> Result<Option<AgentConfig>> {
    let row: Option<ConfigRow> = sqlx::query_as(
        "SELECT agent_id, bias, throttle_config, cognition_config, version, \
         portable_config, updated_at FROM agent_configs WHERE agent_id = $1",
    )
    .bind(agent_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        let bias = r
            .bias
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::Deserialization("bias is not an object".into()))?;
        Ok(AgentConfig {
            agent_id: r.agent_id,
            bias,
            throttle_config: r.throttle_config,
            cognition_config: r.cognition_config,
            version: r.version,
            portable_config: r.portable_config,
            updated_at: r.updated_at,
        })
    })
    .transpose()
}

/// Replace config fields and bump the monotonic version.
///
/// The portable snapshot is refreshed on every change so exports never see a
/// half-updated config.
pub async fn update_config(
    pool: &PgPool,
    agent_id: Uuid,
    bias: &serde_json::Map<String, serde_json::Value>,
    throttle_config: &serde_json::Value,
    cognition_config: &serde_json::Value,
) -> Result<i64> {
    AgentConfig::validate_bias(bias)?;

    let snapshot = serde_json::json!({
        "bias": bias,
        "throttle": throttle_config,
        "cognition": cognition_config,
    });

    let version: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE agent_configs
        SET bias = $2, throttle_config = $3, cognition_config = $4,
            portable_config = $5, version = version + 1, updated_at = NOW()
        WHERE agent_id = $1
        RETURNING version
        "#,
    )
    .bind(agent_id)
    .bind(serde_json::Value::Object(bias.clone()))
    .bind(throttle_config)
    .bind(cognition_config)
    .bind(&snapshot)
    .fetch_optional(pool)
    .await?;

    version.ok_or_else(|| StoreError::not_found("agent_config", agent_id.to_string()))
}
