//! Stub cognition provider for testing.
//!
//! Deterministic estimates, configurable execution outcomes, no I/O.

use crate::error::CognitionError;
use crate::ports::{CognitionContext, CognitionOutcome, CognitionProvider};
use async_trait::async_trait;
use std::sync::RwLock;

/// Stub provider with scriptable behavior.
pub struct StubCognition {
    /// Cost returned by estimate_cost regardless of payload.
    estimate: i64,
    /// Actual cost reported on execution (defaults to the estimate).
    actual: RwLock<Option<i64>>,
    /// Whether the next execution signals Paused.
    pause_next: RwLock<bool>,
    /// Whether the next execution fails with a transport error.
    fail_next: RwLock<bool>,
}

impl StubCognition {
    pub fn new(estimate: i64) -> Self {
        Self {
            estimate,
            actual: RwLock::new(None),
            pause_next: RwLock::new(false),
            fail_next: RwLock::new(false),
        }
    }

    /// Report a specific actual cost on execution.
    pub fn set_actual_cost(&self, actual: i64) {
        *self.actual.write().unwrap() = Some(actual);
    }

    /// Signal Paused on the next execution.
    pub fn set_pause_next(&self, pause: bool) {
        *self.pause_next.write().unwrap() = pause;
    }

    /// Fail the next execution with a transport error.
    pub fn set_fail_next(&self, fail: bool) {
        *self.fail_next.write().unwrap() = fail;
    }

    fn take_flag(flag: &RwLock<bool>) -> bool {
        let mut guard = flag.write().unwrap();
        std::mem::take(&mut *guard)
    }
}

#[async_trait]
impl CognitionProvider for StubCognition {
    fn estimate_cost(&self, _payload: &serde_json::Value, _context: &CognitionContext) -> i64 {
        self.estimate
    }

    async fn execute(
        &self,
        _payload: &serde_json::Value,
        _context: &CognitionContext,
    ) -> Result<CognitionOutcome, CognitionError> {
        if Self::take_flag(&self.pause_next) {
            return Err(CognitionError::Paused);
        }
        if Self::take_flag(&self.fail_next) {
            return Err(CognitionError::Unreachable("simulated failure".to_string()));
        }

        let actual = self.actual.read().unwrap().unwrap_or(self.estimate);
        Ok(CognitionOutcome {
            tokens_used: actual * 10,
            actual_cost: actual,
            latency_ms: 1,
            provider: "stub".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> CognitionContext {
        CognitionContext {
            agent_id: "a".into(),
            deployment_target: "world-1".into(),
            action_type: "communicate".into(),
            config: json!({}),
        }
    }

    #[tokio::test]
    async fn test_stub_reports_estimate_as_actual_by_default() {
        let stub = StubCognition::new(7);
        assert_eq!(stub.estimate_cost(&json!({}), &ctx()), 7);

        let outcome = stub.execute(&json!({}), &ctx()).await.unwrap();
        assert_eq!(outcome.actual_cost, 7);
    }

    #[tokio::test]
    async fn test_pause_flag_is_one_shot() {
        let stub = StubCognition::new(5);
        stub.set_pause_next(true);
        assert!(matches!(
            stub.execute(&json!({}), &ctx()).await,
            Err(CognitionError::Paused)
        ));
        assert!(stub.execute(&json!({}), &ctx()).await.is_ok());
    }
}
