//! Environment state repository.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use ox_domain::{CognitionAvailability, EnvironmentState};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

#[derive(Debug, FromRow)]
struct EnvironmentRow {
    deployment_target: String,
    cognition_availability: String,
    max_throughput_per_minute: Option<i32>,
    throttle_factor: f64,
    active_window_start: Option<DateTime<Utc>>,
    active_window_end: Option<DateTime<Utc>>,
    reason: Option<String>,
    imposed_at: DateTime<Utc>,
}

impl TryFrom<EnvironmentRow> for EnvironmentState {
    type Error = StoreError;

    fn try_from(row: EnvironmentRow) -> Result<EnvironmentState> {
        Ok(EnvironmentState {
            deployment_target: row.deployment_target,
            cognition_availability: CognitionAvailability::parse(&row.cognition_availability)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?,
            max_throughput_per_minute: row.max_throughput_per_minute,
            throttle_factor: row.throttle_factor,
            active_window_start: row.active_window_start,
            active_window_end: row.active_window_end,
            reason: row.reason,
            imposed_at: row.imposed_at,
        })
    }
}

const ENV_COLUMNS: &str = "deployment_target, cognition_availability, max_throughput_per_minute, \
     throttle_factor, active_window_start, active_window_end, reason, imposed_at";

/// Read the environment state for a target, if any is imposed.
pub async fn get_environment(pool: &PgPool, target: &str) -> Result<Option<EnvironmentState>> {
    let row: Option<EnvironmentRow> = sqlx::query_as(&format!(
        "SELECT {ENV_COLUMNS} FROM environment_states WHERE deployment_target = $1"
    ))
    .bind(target)
    .fetch_optional(pool)
    .await?;

    row.map(EnvironmentState::try_from).transpose()
}

/// Same, inside the admission transaction.
pub async fn get_environment_tx(
    tx: &mut Transaction<'_, Postgres>,
    target: &str,
) -> Result<Option<EnvironmentState>> {
    let row: Option<EnvironmentRow> = sqlx::query_as(&format!(
        "SELECT {ENV_COLUMNS} FROM environment_states WHERE deployment_target = $1"
    ))
    .bind(target)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(EnvironmentState::try_from).transpose()
}

/// Impose or replace environment constraints on a target.
pub async fn upsert_environment(
    tx: &mut Transaction<'_, Postgres>,
    state: &EnvironmentState,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO environment_states (
            deployment_target, cognition_availability, max_throughput_per_minute,
            throttle_factor, active_window_start, active_window_end, reason, imposed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (deployment_target) DO UPDATE SET
            cognition_availability = EXCLUDED.cognition_availability,
            max_throughput_per_minute = EXCLUDED.max_throughput_per_minute,
            throttle_factor = EXCLUDED.throttle_factor,
            active_window_start = EXCLUDED.active_window_start,
            active_window_end = EXCLUDED.active_window_end,
            reason = EXCLUDED.reason,
            imposed_at = EXCLUDED.imposed_at
        "#,
    )
    .bind(&state.deployment_target)
    .bind(state.cognition_availability.as_str())
    .bind(state.max_throughput_per_minute)
    .bind(state.throttle_factor)
    .bind(state.active_window_start)
    .bind(state.active_window_end)
    .bind(&state.reason)
    .bind(state.imposed_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Lift constraints. Returns false when none were imposed.
pub async fn remove_environment(tx: &mut Transaction<'_, Postgres>, target: &str) -> Result<bool> {
    let deleted = sqlx::query("DELETE FROM environment_states WHERE deployment_target = $1")
        .bind(target)
        .execute(&mut **tx)
        .await?
        .rows_affected();

    Ok(deleted > 0)
}

/// Deployment targets that currently have pressures or environment state;
/// the physics tick sweeps these.
pub async fn deployments_with_pressure(pool: &PgPool) -> Result<Vec<String>> {
    let targets: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT target_deployment FROM pressures \
         WHERE cancelled_at IS NULL AND expires_at > NOW()",
    )
    .fetch_all(pool)
    .await?;

    Ok(targets)
}
