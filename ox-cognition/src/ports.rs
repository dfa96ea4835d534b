//! Cognition port definitions.
//!
//! Two operations: `estimate_cost` is a pure function of payload and
//! context used during admission; `execute` performs the bounded inference
//! call after admission. Implementations must not retry internally.

use crate::error::CognitionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sentinel provider name that short-circuits both operations.
pub const NONE_PROVIDER: &str = "none";

/// Context handed to the provider alongside the action payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionContext {
    pub agent_id: String,
    pub deployment_target: String,
    pub action_type: String,
    /// Opaque per-agent cognition configuration.
    pub config: serde_json::Value,
}

/// Result of a successful cognition execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionOutcome {
    pub tokens_used: i64,
    pub actual_cost: i64,
    pub latency_ms: i64,
    pub provider: String,
}

/// Port for cognition backends.
///
/// Implementations:
/// - `StubCognition` - deterministic, for tests
/// - `HttpCognition` - real inference collaborator over HTTP
#[async_trait]
pub trait CognitionProvider: Send + Sync {
    /// Estimate the capacity cost of executing cognition for this payload.
    ///
    /// Must be pure: same payload and context, same estimate. Called during
    /// admission before any capacity is deducted.
    fn estimate_cost(&self, payload: &serde_json::Value, context: &CognitionContext) -> i64;

    /// Execute cognition. Bounded by the implementation's own deadline; no
    /// retries. `Err(CognitionError::Paused)` rejects the action without a
    /// deduction, any other error degrades to base-cost-only admission.
    async fn execute(
        &self,
        payload: &serde_json::Value,
        context: &CognitionContext,
    ) -> Result<CognitionOutcome, CognitionError>;
}
