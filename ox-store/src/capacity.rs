//! Capacity repository.
//!
//! The capacity row is the admission engine's mutual-exclusion point: it is
//! locked `FOR UPDATE` for the whole admission transaction, and the balance
//! is lazily regenerated on every touch.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use ox_domain::AgentCapacity;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct CapacityRow {
    agent_id: Uuid,
    balance: i64,
    max_balance: i64,
    regen_per_hour: i64,
    last_reconciled_at: DateTime<Utc>,
}

impl From<CapacityRow> for AgentCapacity {
    fn from(row: CapacityRow) -> Self {
        Self {
            agent_id: row.agent_id,
            balance: row.balance,
            max_balance: row.max_balance,
            regen_per_hour: row.regen_per_hour,
            last_reconciled_at: row.last_reconciled_at,
        }
    }
}

/// Lock the capacity row for the duration of the transaction.
pub async fn lock_capacity(
    tx: &mut Transaction<'_, Postgres>,
    agent_id: Uuid,
) -> Result<AgentCapacity> {
    let row: Option<CapacityRow> = sqlx::query_as(
        "SELECT agent_id, balance, max_balance, regen_per_hour, last_reconciled_at \
         FROM agent_capacity WHERE agent_id = $1 FOR UPDATE",
    )
    .bind(agent_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(AgentCapacity::from)
        .ok_or_else(|| StoreError::not_found("agent_capacity", agent_id.to_string()))
}

/// Write back a reconciled (and possibly spent) balance.
pub async fn store_balance(
    tx: &mut Transaction<'_, Postgres>,
    agent_id: Uuid,
    balance: i64,
    reconciled_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE agent_capacity SET balance = $2, last_reconciled_at = $3 WHERE agent_id = $1",
    )
    .bind(agent_id)
    .bind(balance)
    .bind(reconciled_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Read capacity without locking (read API, policy context).
pub async fn get_capacity(pool: &PgPool, agent_id: Uuid) -> Result<Option<AgentCapacity>> {
    let row: Option<CapacityRow> = sqlx::query_as(
        "SELECT agent_id, balance, max_balance, regen_per_hour, last_reconciled_at \
         FROM agent_capacity WHERE agent_id = $1",
    )
    .bind(agent_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(AgentCapacity::from))
}

