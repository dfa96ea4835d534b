//! Locality repository.
//!
//! Localities partition a deployment into named regions; membership weights
//! of one agent are normalized to sum to 1 whenever they are replaced.

use crate::error::{Result, StoreError};
use ox_domain::{Locality, LocalityMembership};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct LocalityRow {
    locality_id: Uuid,
    deployment_target: String,
    name: String,
    density: f64,
    interference_density: f64,
    visibility_radius: f64,
    evidence_half_life: i64,
    active: bool,
}

impl From<LocalityRow> for Locality {
    fn from(row: LocalityRow) -> Self {
        Self {
            locality_id: row.locality_id,
            deployment_target: row.deployment_target,
            name: row.name,
            density: row.density,
            interference_density: row.interference_density,
            visibility_radius: row.visibility_radius,
            evidence_half_life: row.evidence_half_life,
            active: row.active,
        }
    }
}

/// Create or update a locality, keyed by (deployment, name).
pub async fn upsert_locality(pool: &PgPool, locality: &Locality) -> Result<Uuid> {
    let locality_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO localities (
            locality_id, deployment_target, name, density, interference_density,
            visibility_radius, evidence_half_life, active
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (deployment_target, name) DO UPDATE SET
            density = EXCLUDED.density,
            interference_density = EXCLUDED.interference_density,
            visibility_radius = EXCLUDED.visibility_radius,
            evidence_half_life = EXCLUDED.evidence_half_life,
            active = EXCLUDED.active
        RETURNING locality_id
        "#,
    )
    .bind(locality.locality_id)
    .bind(&locality.deployment_target)
    .bind(&locality.name)
    .bind(locality.density)
    .bind(locality.interference_density)
    .bind(locality.visibility_radius)
    .bind(locality.evidence_half_life)
    .bind(locality.active)
    .fetch_one(pool)
    .await?;

    Ok(locality_id)
}

pub async fn list_localities(pool: &PgPool, deployment_target: &str) -> Result<Vec<Locality>> {
    let rows: Vec<LocalityRow> = sqlx::query_as(
        "SELECT locality_id, deployment_target, name, density, interference_density, \
         visibility_radius, evidence_half_life, active \
         FROM localities WHERE deployment_target = $1 AND active ORDER BY name",
    )
    .bind(deployment_target)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Locality::from).collect())
}

/// Replace an agent's memberships with a normalized weight set.
pub async fn set_memberships(
    pool: &PgPool,
    agent_id: Uuid,
    memberships: &[(Uuid, f64)],
) -> Result<Vec<LocalityMembership>> {
    if memberships.iter().any(|(_, w)| !w.is_finite() || *w < 0.0) {
        return Err(StoreError::Deserialization(
            "membership weights must be finite and non-negative".into(),
        ));
    }

    let mut weights: Vec<f64> = memberships.iter().map(|(_, w)| *w).collect();
    LocalityMembership::normalize(&mut weights);

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM locality_memberships WHERE agent_id = $1")
        .bind(agent_id)
        .execute(&mut *tx)
        .await?;

    let mut result = Vec::with_capacity(memberships.len());
    for ((locality_id, _), weight) in memberships.iter().zip(weights) {
        sqlx::query(
            "INSERT INTO locality_memberships (agent_id, locality_id, weight) VALUES ($1, $2, $3)",
        )
        .bind(agent_id)
        .bind(locality_id)
        .bind(weight)
        .execute(&mut *tx)
        .await?;

        result.push(LocalityMembership {
            agent_id,
            locality_id: *locality_id,
            weight,
        });
    }

    tx.commit().await?;
    Ok(result)
}

pub async fn get_memberships(pool: &PgPool, agent_id: Uuid) -> Result<Vec<LocalityMembership>> {
    let rows: Vec<(Uuid, Uuid, f64)> = sqlx::query_as(
        "SELECT agent_id, locality_id, weight FROM locality_memberships WHERE agent_id = $1",
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(agent_id, locality_id, weight)| LocalityMembership {
            agent_id,
            locality_id,
            weight,
        })
        .collect())
}
