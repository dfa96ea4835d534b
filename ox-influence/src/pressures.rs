//! Pressure issuance and cancellation.

use crate::error::{InfluenceError, Result};
use chrono::{DateTime, Utc};
use ox_domain::events::{event_types, TOPIC_AGENTS};
use ox_domain::{pressure_credit_cost, HalfLife, Magnitude, Pressure, PressureType};
use ox_eventlog::{persist_event_tx, Event};
use ox_store::credits::{self, tx_types};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct PressureRow {
    pressure_id: Uuid,
    sponsor_id: Uuid,
    target_deployment: String,
    target_agent_id: Option<Uuid>,
    pressure_type: String,
    magnitude: f64,
    half_life_seconds: i64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    credit_cost: Decimal,
}

impl TryFrom<PressureRow> for Pressure {
    type Error = InfluenceError;

    fn try_from(row: PressureRow) -> Result<Pressure> {
        Ok(Pressure {
            pressure_id: row.pressure_id,
            sponsor_id: row.sponsor_id,
            target_deployment: row.target_deployment,
            target_agent_id: row.target_agent_id,
            pressure_type: PressureType::parse(&row.pressure_type)?,
            magnitude: row.magnitude,
            half_life_seconds: row.half_life_seconds,
            created_at: row.created_at,
            expires_at: row.expires_at,
            cancelled_at: row.cancelled_at,
            credit_cost: row.credit_cost,
        })
    }
}

/// Issue a pressure: deduct `ceil(10 * |magnitude|)` from the sponsor
/// wallet, insert the pressure with its derived expiry, and emit
/// `sponsor.pressure_issued`, all in one transaction.
pub async fn issue_pressure(
    pool: &PgPool,
    sponsor_id: Uuid,
    target_deployment: &str,
    target_agent_id: Option<Uuid>,
    pressure_type: PressureType,
    magnitude: f64,
    half_life_seconds: i64,
    correlation_id: Option<Uuid>,
    idempotency_key: Option<&str>,
) -> Result<Pressure> {
    let magnitude = Magnitude::new(magnitude)?;
    let half_life = HalfLife::new(half_life_seconds)?;
    let cost = pressure_credit_cost(magnitude);

    let pressure = Pressure::issue(
        sponsor_id,
        target_deployment,
        target_agent_id,
        pressure_type,
        magnitude,
        half_life,
        Utc::now(),
    );

    let mut tx = pool.begin().await.map_err(ox_store::StoreError::from)?;

    let wallet_balance =
        credits::debit_wallet(&mut tx, sponsor_id, cost, tx_types::PRESSURE_DEBIT, idempotency_key)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO pressures (
            pressure_id, sponsor_id, target_deployment, target_agent_id,
            pressure_type, magnitude, half_life_seconds,
            created_at, expires_at, credit_cost
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(pressure.pressure_id)
    .bind(pressure.sponsor_id)
    .bind(&pressure.target_deployment)
    .bind(pressure.target_agent_id)
    .bind(pressure.pressure_type.as_str())
    .bind(pressure.magnitude)
    .bind(pressure.half_life_seconds)
    .bind(pressure.created_at)
    .bind(pressure.expires_at)
    .bind(pressure.credit_cost)
    .execute(&mut *tx)
    .await
    .map_err(ox_store::StoreError::from)?;

    let mut event = Event::new(
        event_types::PRESSURE_ISSUED,
        json!({
            "pressure_id": pressure.pressure_id,
            "sponsor_id": sponsor_id,
            "target_deployment": pressure.target_deployment,
            "target_agent_id": pressure.target_agent_id,
            "pressure_type": pressure.pressure_type.as_str(),
            "magnitude": pressure.magnitude,
            "half_life_seconds": pressure.half_life_seconds,
            "expires_at": pressure.expires_at,
            "credit_cost": cost,
            "wallet_balance": wallet_balance,
        }),
    )
    .with_actor(format!("sponsor:{sponsor_id}"), None);
    if let Some(correlation_id) = correlation_id {
        event = event.with_correlation_id(correlation_id);
    }
    if let Some(key) = idempotency_key {
        event = event.with_idempotency_key(key);
    }
    persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;

    tx.commit().await.map_err(ox_store::StoreError::from)?;

    info!(
        pressure_id = %pressure.pressure_id,
        %sponsor_id,
        deployment = %pressure.target_deployment,
        magnitude = pressure.magnitude,
        "Pressure issued"
    );

    Ok(pressure)
}

/// Cancel a pressure.
///
/// No refund and no change to the decay curve; the pressure just stops
/// participating in braids. Cancelling twice is not found.
pub async fn cancel_pressure(
    pool: &PgPool,
    sponsor_id: Uuid,
    pressure_id: Uuid,
    correlation_id: Option<Uuid>,
) -> Result<()> {
    let mut tx = pool.begin().await.map_err(ox_store::StoreError::from)?;

    let cancelled = sqlx::query(
        "UPDATE pressures SET cancelled_at = NOW() \
         WHERE pressure_id = $1 AND sponsor_id = $2 AND cancelled_at IS NULL",
    )
    .bind(pressure_id)
    .bind(sponsor_id)
    .execute(&mut *tx)
    .await
    .map_err(ox_store::StoreError::from)?
    .rows_affected();

    if cancelled == 0 {
        return Err(InfluenceError::PressureNotFound(pressure_id));
    }

    let mut event = Event::new(
        event_types::PRESSURE_CANCELLED,
        json!({ "pressure_id": pressure_id, "sponsor_id": sponsor_id }),
    )
    .with_actor(format!("sponsor:{sponsor_id}"), None);
    if let Some(correlation_id) = correlation_id {
        event = event.with_correlation_id(correlation_id);
    }
    persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;

    tx.commit().await.map_err(ox_store::StoreError::from)?;

    info!(%pressure_id, %sponsor_id, "Pressure cancelled");
    Ok(())
}

/// Active, uncancelled, unexpired pressures for one deployment.
pub async fn list_braidable(
    pool: &PgPool,
    deployment_target: &str,
    at: DateTime<Utc>,
) -> Result<Vec<Pressure>> {
    let rows: Vec<PressureRow> = sqlx::query_as(
        r#"
        SELECT pressure_id, sponsor_id, target_deployment, target_agent_id,
               pressure_type, magnitude, half_life_seconds,
               created_at, expires_at, cancelled_at, credit_cost
        FROM pressures
        WHERE target_deployment = $1
          AND cancelled_at IS NULL
          AND expires_at > $2
        ORDER BY created_at
        "#,
    )
    .bind(deployment_target)
    .bind(at)
    .fetch_all(pool)
    .await
    .map_err(ox_store::StoreError::from)?;

    rows.into_iter().map(Pressure::try_from).collect()
}
