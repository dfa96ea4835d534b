//! Domain Entities for the OX Substrate
//!
//! Core entities with identity and lifecycle. Capacity reconciliation is a
//! pure function of the stored row and the caller's clock, so replicas that
//! disagree about wall time by less than an hour converge on reads.

use crate::value_objects::{
    AgentStatus, CognitionAvailability, DomainError, ThrottleProfile,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an Agent
pub type AgentId = Uuid;

/// Unique identifier for a Sponsor
pub type SponsorId = Uuid;

// =============================================================================
// Agent
// =============================================================================

/// A simulated agent admitted into one deployment target ("world").
///
/// Exactly one row per agent. The deployment target stamped on events comes
/// from this row, never from the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub display_name: String,
    pub status: AgentStatus,
    pub deployment_target: String,
    pub sponsor_id: Option<SponsorId>,
    pub cognition_provider: String,
    pub throttle_profile: ThrottleProfile,
    /// Bumped on redeploy; stamped on events as actor_generation.
    pub generation: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new active agent.
    pub fn new(display_name: impl Into<String>, deployment_target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: Uuid::now_v7(),
            display_name: display_name.into(),
            status: AgentStatus::Active,
            deployment_target: deployment_target.into(),
            sponsor_id: None,
            cognition_provider: "none".to_string(),
            throttle_profile: ThrottleProfile::Normal,
            generation: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    /// Archive is one-way within a generation.
    pub fn archive(&mut self) -> Result<(), DomainError> {
        if self.status == AgentStatus::Archived {
            return Err(DomainError::InvalidStateTransition(
                "agent already archived".to_string(),
            ));
        }
        self.status = AgentStatus::Archived;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Redeploy swaps the target, reactivates, and bumps the generation.
    pub fn redeploy(&mut self, target: impl Into<String>) {
        self.deployment_target = target.into();
        self.status = AgentStatus::Active;
        self.generation += 1;
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Capacity
// =============================================================================

/// Per-agent capacity account with lazy hourly regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapacity {
    pub agent_id: AgentId,
    pub balance: i64,
    pub max_balance: i64,
    pub regen_per_hour: i64,
    pub last_reconciled_at: DateTime<Utc>,
}

impl AgentCapacity {
    /// Compute the reconciled balance at `now`.
    ///
    /// `min(max_balance, balance + floor(hours_elapsed * regen_per_hour))`;
    /// whole-unit regen only, never exceeds max, never goes backwards.
    pub fn reconciled_balance(&self, now: DateTime<Utc>) -> i64 {
        let elapsed = now - self.last_reconciled_at;
        let secs = elapsed.num_seconds();
        if secs <= 0 || self.regen_per_hour <= 0 {
            return self.balance;
        }
        let regen = (secs as f64 / 3600.0 * self.regen_per_hour as f64).floor() as i64;
        (self.balance + regen).min(self.max_balance)
    }
}

// =============================================================================
// Agent config
// =============================================================================

/// Versioned per-agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: AgentId,
    /// Named bias weights, each in [-1, 1].
    pub bias: serde_json::Map<String, serde_json::Value>,
    pub throttle_config: serde_json::Value,
    pub cognition_config: serde_json::Value,
    pub version: i64,
    pub portable_config: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl AgentConfig {
    /// Validate a bias map: every value a finite number in [-1, 1].
    pub fn validate_bias(
        bias: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), DomainError> {
        for (key, value) in bias {
            let v = value.as_f64().ok_or_else(|| {
                DomainError::InvalidBias(format!("bias '{key}' is not a number"))
            })?;
            if !v.is_finite() || !(-1.0..=1.0).contains(&v) {
                return Err(DomainError::InvalidBias(format!(
                    "bias '{key}' must be within [-1, 1], got {v}"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Operator-imposed constraints on one deployment target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub deployment_target: String,
    pub cognition_availability: CognitionAvailability,
    pub max_throughput_per_minute: Option<i32>,
    pub throttle_factor: f64,
    pub active_window_start: Option<DateTime<Utc>>,
    pub active_window_end: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub imposed_at: DateTime<Utc>,
}

impl EnvironmentState {
    /// An absent window means always active; a half-open window binds only
    /// on the side that is present.
    pub fn within_active_window(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.active_window_start {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.active_window_end {
            if now >= end {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Localities
// =============================================================================

/// A named region of a deployment target with its own physics parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Locality {
    pub locality_id: Uuid,
    pub deployment_target: String,
    pub name: String,
    pub density: f64,
    pub interference_density: f64,
    pub visibility_radius: f64,
    pub evidence_half_life: i64,
    pub active: bool,
}

/// Weighted membership of an agent in a locality.
///
/// An agent's membership weights are normalized to sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalityMembership {
    pub agent_id: AgentId,
    pub locality_id: Uuid,
    pub weight: f64,
}

impl LocalityMembership {
    /// Normalize a weight set in place so it sums to 1 (uniform when all zero).
    pub fn normalize(weights: &mut [f64]) {
        let sum: f64 = weights.iter().sum();
        if sum > 0.0 {
            for w in weights.iter_mut() {
                *w /= sum;
            }
        } else if !weights.is_empty() {
            let uniform = 1.0 / weights.len() as f64;
            for w in weights.iter_mut() {
                *w = uniform;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn capacity(balance: i64, max: i64, regen: i64, last: DateTime<Utc>) -> AgentCapacity {
        AgentCapacity {
            agent_id: Uuid::now_v7(),
            balance,
            max_balance: max,
            regen_per_hour: regen,
            last_reconciled_at: last,
        }
    }

    #[test]
    fn test_reconcile_floors_partial_hours() {
        let now = Utc::now();
        let cap = capacity(50, 100, 10, now - Duration::minutes(90));
        // 1.5h * 10/h = 15
        assert_eq!(cap.reconciled_balance(now), 65);
    }

    #[test]
    fn test_reconcile_exact_hour_boundary() {
        let now = Utc::now();
        let cap = capacity(50, 100, 10, now - Duration::hours(1));
        assert_eq!(cap.reconciled_balance(now), 60);

        // One second shy of the hour still floors down
        let cap = capacity(50, 100, 10, now - Duration::seconds(3599));
        assert_eq!(cap.reconciled_balance(now), 9 + 50);
    }

    #[test]
    fn test_reconcile_clamps_to_max() {
        let now = Utc::now();
        let cap = capacity(95, 100, 10, now - Duration::hours(4));
        assert_eq!(cap.reconciled_balance(now), 100);
    }

    #[test]
    fn test_reconcile_never_regresses() {
        let now = Utc::now();
        // A clock skew putting last_reconciled_at in the future must not drain
        let cap = capacity(50, 100, 10, now + Duration::hours(1));
        assert_eq!(cap.reconciled_balance(now), 50);
    }

    #[test]
    fn test_archive_is_one_way() {
        let mut agent = Agent::new("a", "world-1");
        assert!(agent.archive().is_ok());
        assert!(agent.archive().is_err());
    }

    #[test]
    fn test_redeploy_reactivates_and_bumps_generation() {
        let mut agent = Agent::new("a", "world-1");
        agent.archive().unwrap();
        agent.redeploy("world-2");
        assert!(agent.is_active());
        assert_eq!(agent.deployment_target, "world-2");
        assert_eq!(agent.generation, 2);
    }

    #[test]
    fn test_bias_validation() {
        let mut bias = serde_json::Map::new();
        bias.insert("novelty".into(), serde_json::json!(0.5));
        bias.insert("caution".into(), serde_json::json!(-1.0));
        assert!(AgentConfig::validate_bias(&bias).is_ok());

        bias.insert("overdrive".into(), serde_json::json!(1.5));
        assert!(AgentConfig::validate_bias(&bias).is_err());
    }

    #[test]
    fn test_active_window_half_open() {
        let now = Utc::now();
        let mut env = EnvironmentState {
            deployment_target: "world-1".into(),
            cognition_availability: CognitionAvailability::Full,
            max_throughput_per_minute: None,
            throttle_factor: 1.0,
            active_window_start: None,
            active_window_end: None,
            reason: None,
            imposed_at: now,
        };
        assert!(env.within_active_window(now));

        env.active_window_start = Some(now + Duration::minutes(5));
        assert!(!env.within_active_window(now));

        env.active_window_start = Some(now - Duration::minutes(5));
        env.active_window_end = Some(now - Duration::minutes(1));
        assert!(!env.within_active_window(now));
    }

    #[test]
    fn test_membership_normalization() {
        let mut weights = [2.0, 2.0, 4.0];
        LocalityMembership::normalize(&mut weights);
        assert_eq!(weights, [0.25, 0.25, 0.5]);

        let mut zeros = [0.0, 0.0];
        LocalityMembership::normalize(&mut zeros);
        assert_eq!(zeros, [0.5, 0.5]);
    }
}
