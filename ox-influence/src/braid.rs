//! Braid composition.
//!
//! Each physics tick folds a deployment's braidable pressures into a
//! 4-vector (capacity, throttle, cognition, redeploy_bias). Opposite-sign
//! pressures of the same type interfere pairwise: the interference
//! probability is `min(1, |a|*|b| / 10000)` and both pressures are reduced
//! by `1 - probability` before summation. A pressure caught in several
//! interfering pairs is reduced multiplicatively.

use crate::error::Result;
use crate::pressures::list_braidable;
use chrono::{DateTime, Utc};
use ox_domain::events::{event_types, TOPIC_PHYSICS};
use ox_domain::{Pressure, PressureType};
use ox_eventlog::{persist_event_tx, Event};
use ox_store::environment::deployments_with_pressure;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info};

/// Per-deployment aggregation of pressure intensity by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BraidVector {
    pub capacity: f64,
    pub throttle: f64,
    pub cognition: f64,
    pub redeploy_bias: f64,
}

impl BraidVector {
    fn component_mut(&mut self, pressure_type: PressureType) -> &mut f64 {
        match pressure_type {
            PressureType::Capacity => &mut self.capacity,
            PressureType::Throttle => &mut self.throttle,
            PressureType::Cognition => &mut self.cognition,
            PressureType::RedeployBias => &mut self.redeploy_bias,
        }
    }
}

/// One recorded interference between two opposite-sign pressures.
#[derive(Debug, Clone, Serialize)]
pub struct Interference {
    pub pressure_type: PressureType,
    pub pressure_a: uuid::Uuid,
    pub pressure_b: uuid::Uuid,
    pub probability: f64,
    pub reduction_factor: f64,
}

/// Compose the braid vector for a pressure set at instant `at`.
///
/// Pure; the physics tick persists what this returns.
pub fn compose_braid(pressures: &[Pressure], at: DateTime<Utc>) -> (BraidVector, Vec<Interference>) {
    let mut braid = BraidVector::default();
    let mut interferences = Vec::new();

    for pressure_type in PressureType::ALL {
        let group: Vec<(&Pressure, f64)> = pressures
            .iter()
            .filter(|p| p.pressure_type == pressure_type && p.is_braidable(at))
            .map(|p| (p, p.current_magnitude(at)))
            .collect();

        // Multiplicative reduction per pressure across all interfering pairs.
        let mut reduction = vec![1.0_f64; group.len()];

        for i in 0..group.len() {
            for j in (i + 1)..group.len() {
                let (a, ma) = group[i];
                let (b, mb) = group[j];
                if ma.signum() * mb.signum() >= 0.0 {
                    continue;
                }

                let probability = (ma.abs() * mb.abs() / 10_000.0).min(1.0);
                let factor = 1.0 - probability;
                reduction[i] *= factor;
                reduction[j] *= factor;

                interferences.push(Interference {
                    pressure_type,
                    pressure_a: a.pressure_id,
                    pressure_b: b.pressure_id,
                    probability,
                    reduction_factor: factor,
                });
            }
        }

        let component = braid.component_mut(pressure_type);
        for ((_, magnitude), factor) in group.iter().zip(&reduction) {
            *component += magnitude * factor;
        }
    }

    (braid, interferences)
}

/// Run one physics tick across every deployment with braidable pressures.
///
/// Safe to run concurrently across replicas: the braid snapshot insert is
/// keyed by (tick_id, deployment) and the `physics.braid_computed` event is
/// emitted only by the replica that won that insert.
pub async fn run_physics_tick(pool: &PgPool, tick_seconds: i64) -> Result<usize> {
    let now = Utc::now();
    let tick_id = now.timestamp() / tick_seconds.max(1);

    let deployments = deployments_with_pressure(pool).await?;
    let mut computed = 0usize;

    for deployment in &deployments {
        let pressures = list_braidable(pool, deployment, now).await?;
        if pressures.is_empty() {
            continue;
        }

        let (braid, interferences) = compose_braid(&pressures, now);

        let mut tx = pool.begin().await.map_err(ox_store::StoreError::from)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO braid_snapshots (
                tick_id, deployment_target, capacity, throttle, cognition,
                redeploy_bias, pressure_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tick_id, deployment_target) DO NOTHING
            "#,
        )
        .bind(tick_id)
        .bind(deployment)
        .bind(braid.capacity)
        .bind(braid.throttle)
        .bind(braid.cognition)
        .bind(braid.redeploy_bias)
        .bind(pressures.len() as i32)
        .execute(&mut *tx)
        .await
        .map_err(ox_store::StoreError::from)?
        .rows_affected();

        if inserted == 0 {
            // Another replica already computed this tick.
            tx.rollback().await.map_err(ox_store::StoreError::from)?;
            continue;
        }

        for interference in &interferences {
            sqlx::query(
                r#"
                INSERT INTO pressure_interferences (
                    tick_id, deployment_target, pressure_type, pressure_a,
                    pressure_b, interference_probability, reduction_factor
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (tick_id, pressure_a, pressure_b) DO NOTHING
                "#,
            )
            .bind(tick_id)
            .bind(deployment)
            .bind(interference.pressure_type.as_str())
            .bind(interference.pressure_a)
            .bind(interference.pressure_b)
            .bind(interference.probability)
            .bind(interference.reduction_factor)
            .execute(&mut *tx)
            .await
            .map_err(ox_store::StoreError::from)?;
        }

        let event = Event::new(
            event_types::BRAID_COMPUTED,
            json!({
                "tick_id": tick_id,
                "deployment_target": deployment,
                "braid": braid,
                "pressure_count": pressures.len(),
                "interference_count": interferences.len(),
            }),
        )
        .with_actor("physics", None);
        persist_event_tx(&mut tx, TOPIC_PHYSICS, event).await?;

        tx.commit().await.map_err(ox_store::StoreError::from)?;

        debug!(
            deployment = %deployment,
            tick_id,
            capacity = braid.capacity,
            throttle = braid.throttle,
            "Braid computed"
        );
        computed += 1;
    }

    if computed > 0 {
        info!(tick_id, deployments = computed, "Physics tick complete");
    }

    Ok(computed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ox_domain::{HalfLife, Magnitude};
    use uuid::Uuid;

    fn pressure(pressure_type: PressureType, magnitude: f64, half_life: i64) -> Pressure {
        Pressure::issue(
            Uuid::now_v7(),
            "world-1",
            None,
            pressure_type,
            Magnitude::new(magnitude).unwrap(),
            HalfLife::new(half_life).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_same_sign_pressures_sum_without_interference() {
        let pressures = vec![
            pressure(PressureType::Capacity, 30.0, 600),
            pressure(PressureType::Capacity, 20.0, 600),
        ];
        let at = pressures[0].created_at;

        let (braid, interferences) = compose_braid(&pressures, at);
        assert!((braid.capacity - 50.0).abs() < 0.01);
        assert!(interferences.is_empty());
    }

    #[test]
    fn test_opposite_signs_interfere() {
        let pressures = vec![
            pressure(PressureType::Throttle, 50.0, 600),
            pressure(PressureType::Throttle, -40.0, 600),
        ];
        let at = pressures[0].created_at;

        let (braid, interferences) = compose_braid(&pressures, at);
        assert_eq!(interferences.len(), 1);

        let probability = 50.0 * 40.0 / 10_000.0;
        assert!((interferences[0].probability - probability).abs() < 1e-9);

        // Both reduced by (1 - p) before the sum.
        let expected = (50.0 - 40.0) * (1.0 - probability);
        assert!((braid.throttle - expected).abs() < 0.01, "got {}", braid.throttle);
    }

    #[test]
    fn test_probability_caps_at_one() {
        let pressures = vec![
            pressure(PressureType::Cognition, 100.0, 600),
            pressure(PressureType::Cognition, -100.0, 600),
        ];
        let at = pressures[0].created_at;

        let (braid, interferences) = compose_braid(&pressures, at);
        assert!((interferences[0].probability - 1.0).abs() < 1e-9);
        // Full interference cancels both contributions.
        assert!(braid.cognition.abs() < 1e-9);
    }

    #[test]
    fn test_types_do_not_cross_interfere() {
        let pressures = vec![
            pressure(PressureType::Capacity, 60.0, 600),
            pressure(PressureType::Throttle, -60.0, 600),
        ];
        let at = pressures[0].created_at;

        let (braid, interferences) = compose_braid(&pressures, at);
        assert!(interferences.is_empty());
        assert!((braid.capacity - 60.0).abs() < 0.01);
        assert!((braid.throttle + 60.0).abs() < 0.01);
    }

    #[test]
    fn test_expired_pressure_is_absent_from_braid() {
        let p = pressure(PressureType::Capacity, 40.0, 600);
        let at = p.expires_at;
        let (braid, _) = compose_braid(&[p], at);
        assert_eq!(braid.capacity, 0.0);
    }
}
