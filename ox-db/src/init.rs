//! Minimal data initialization for the OX substrate.
//!
//! Seeds a sponsor wallet and one demo agent so the system has something to
//! admit on first boot. Uses INSERT ... ON CONFLICT DO NOTHING for
//! idempotency.

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::Result;

/// Initialize minimal data for the system to start.
///
/// Returns (sponsor_id, agent_id). Re-running with the same ids is a no-op.
pub async fn init_minimal_data(
    pool: &PgPool,
    sponsor_id: Option<Uuid>,
    deployment_target: Option<String>,
) -> Result<(Uuid, Uuid)> {
    let sponsor_id = sponsor_id.unwrap_or_else(Uuid::now_v7);
    let deployment_target = deployment_target.unwrap_or_else(|| "world-default".to_string());

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO sponsor_wallets (sponsor_id, balance) VALUES ($1, 0) \
         ON CONFLICT (sponsor_id) DO NOTHING",
    )
    .bind(sponsor_id)
    .execute(&mut *tx)
    .await?;

    // Reuse an existing seed agent for this sponsor if one exists.
    let existing: Option<Uuid> = sqlx::query_scalar(
        "SELECT agent_id FROM agents WHERE sponsor_id = $1 AND display_name = 'seed-agent' LIMIT 1",
    )
    .bind(sponsor_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(agent_id) = existing {
        info!(%sponsor_id, %agent_id, "Seed data already present");
        tx.commit().await?;
        return Ok((sponsor_id, agent_id));
    }

    let agent_id = Uuid::now_v7();
    info!(%sponsor_id, %agent_id, deployment = %deployment_target, "Creating seed agent");

    sqlx::query(
        r#"
        INSERT INTO agents (
            agent_id, display_name, status, deployment_target, sponsor_id,
            cognition_provider, throttle_profile, generation
        ) VALUES ($1, 'seed-agent', 'active', $2, $3, 'none', 'normal', 1)
        ON CONFLICT (agent_id) DO NOTHING
        "#,
    )
    .bind(agent_id)
    .bind(&deployment_target)
    .bind(sponsor_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO agent_capacity (agent_id, balance, max_balance, regen_per_hour)
        VALUES ($1, 100, 100, 10)
        ON CONFLICT (agent_id) DO NOTHING
        "#,
    )
    .bind(agent_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO agent_configs (agent_id) VALUES ($1) ON CONFLICT (agent_id) DO NOTHING")
        .bind(agent_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("Minimal data initialized successfully");
    Ok((sponsor_id, agent_id))
}
