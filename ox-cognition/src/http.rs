//! HTTP cognition adapter.
//!
//! Calls an inference collaborator over HTTP with a hard per-request
//! deadline and no retries. Estimation never touches the network: it is a
//! deterministic function of payload size and configured base cost, so
//! admission stays pure.

use crate::error::CognitionError;
use crate::ports::{CognitionContext, CognitionOutcome, CognitionProvider};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default execution deadline.
const DEFAULT_TIMEOUT_MS: u64 = 1_500;

/// Estimate: one capacity unit per KiB of payload, plus the base cost.
const BYTES_PER_UNIT: usize = 1024;

pub struct HttpCognition {
    client: reqwest::Client,
    endpoint: String,
    provider_name: String,
    base_cost: i64,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    tokens_used: i64,
    actual_cost: i64,
    #[serde(default)]
    paused: bool,
}

impl HttpCognition {
    pub fn new(
        endpoint: impl Into<String>,
        provider_name: impl Into<String>,
        base_cost: i64,
    ) -> Result<Self, CognitionError> {
        let timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CognitionError::Unreachable(format!("client build: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            provider_name: provider_name.into(),
            base_cost,
            timeout,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CognitionProvider for HttpCognition {
    fn estimate_cost(&self, payload: &serde_json::Value, _context: &CognitionContext) -> i64 {
        let size = payload.to_string().len();
        self.base_cost + (size / BYTES_PER_UNIT) as i64
    }

    async fn execute(
        &self,
        payload: &serde_json::Value,
        context: &CognitionContext,
    ) -> Result<CognitionOutcome, CognitionError> {
        let started = Instant::now();

        let request = serde_json::json!({
            "agent_id": context.agent_id,
            "deployment_target": context.deployment_target,
            "action_type": context.action_type,
            "config": context.config,
            "payload": payload,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CognitionError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    CognitionError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CognitionError::Unreachable(format!(
                "provider returned {status}"
            )));
        }

        let body: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| CognitionError::InvalidResponse(e.to_string()))?;

        if body.paused {
            return Err(CognitionError::Paused);
        }

        let latency_ms = started.elapsed().as_millis() as i64;
        debug!(
            provider = %self.provider_name,
            tokens = body.tokens_used,
            actual_cost = body.actual_cost,
            latency_ms,
            "Cognition executed"
        );

        Ok(CognitionOutcome {
            tokens_used: body.tokens_used,
            actual_cost: body.actual_cost,
            latency_ms,
            provider: self.provider_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_scales_with_payload_size() {
        let provider = HttpCognition::new("http://localhost:9/cognition", "http", 3).unwrap();
        let ctx = CognitionContext {
            agent_id: "a".into(),
            deployment_target: "w".into(),
            action_type: "create".into(),
            config: json!({}),
        };

        assert_eq!(provider.estimate_cost(&json!({}), &ctx), 3);

        let big = json!({"body": "x".repeat(4096)});
        assert!(provider.estimate_cost(&big, &ctx) >= 7);
    }
}
