//! The admission pipeline.

use crate::error::{EngineError, Result};
use chrono::Utc;
use ox_cognition::{CognitionContext, CognitionError, CognitionOutcome, ProviderRegistry};
use ox_domain::events::{event_types, rejection_reasons, TOPIC_AGENTS};
use ox_domain::{ActionType, Agent, CognitionAvailability, ThrottleProfile};
use ox_eventlog::{persist_event_tx, Envelope, Event};
use ox_store::{capacity, environment, throughput, StoreError};
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock budget for the whole admission transaction.
    pub transaction_budget_ms: u64,
    /// Outer deadline on cognition execution, inside the transaction budget.
    pub cognition_timeout_ms: u64,
    /// Cap on provider-reported actual cost, as a multiple of the estimate.
    pub max_cost_multiplier: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transaction_budget_ms: 2_000,
            cognition_timeout_ms: 1_500,
            max_cost_multiplier: 2,
        }
    }
}

// =============================================================================
// Request / Response
// =============================================================================

/// Body of `POST /agents/:id/attempt`.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub action_type: String,
    pub requested_cost: i64,
    pub payload: Option<Value>,
    pub idempotency_key: Option<String>,
    pub subject_agent_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AttemptResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub environment_constraint: bool,
    pub remaining_balance: i64,
    pub event: Envelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cognition: Option<CognitionOutcome>,
}

// =============================================================================
// Engine
// =============================================================================

/// The Agent Action Engine.
pub struct ActionEngine {
    providers: Arc<ProviderRegistry>,
    config: EngineConfig,
}

impl ActionEngine {
    pub fn new(providers: Arc<ProviderRegistry>, config: EngineConfig) -> Self {
        Self { providers, config }
    }

    /// Admit or refuse one action attempt.
    ///
    /// Validation failures surface as `InvalidArgument` with no side
    /// effects; every other outcome commits an event. Database errors roll
    /// the whole transaction back and are safe to retry with the same
    /// idempotency key.
    pub async fn attempt(
        &self,
        pool: &PgPool,
        agent_id: Uuid,
        request: AttemptRequest,
    ) -> Result<AttemptResponse> {
        // Step 1: validate shape before any state is touched.
        let action_type = ActionType::parse(&request.action_type)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        if request.requested_cost < 0 {
            return Err(EngineError::InvalidArgument(
                "requested_cost must be a non-negative number".to_string(),
            ));
        }

        if action_type.is_implicating() && request.subject_agent_id.is_none() {
            return Err(EngineError::InvalidArgument(format!(
                "subject_agent_id is required for {action_type}"
            )));
        }

        let budget = Duration::from_millis(self.config.transaction_budget_ms);
        let outcome = tokio::time::timeout(
            budget,
            self.attempt_tx(pool, agent_id, action_type, &request),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err @ EngineError::Store(StoreError::Duplicate { .. }))) => {
                // Lost a concurrent race on the idempotency index; the other
                // attempt committed, serve its result.
                if let Some(key) = request.idempotency_key.as_deref() {
                    if let Some(response) = self.replay(pool, key).await? {
                        return Ok(response);
                    }
                }
                Err(err)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Timeout(self.config.transaction_budget_ms)),
        }
    }

    async fn attempt_tx(
        &self,
        pool: &PgPool,
        agent_id: Uuid,
        action_type: ActionType,
        request: &AttemptRequest,
    ) -> Result<AttemptResponse> {
        let now = Utc::now();
        let mut tx = pool.begin().await.map_err(StoreError::from)?;

        // Step 2: load agent.
        let agent = ox_store::agents::get_agent_tx(&mut tx, agent_id)
            .await?
            .ok_or(EngineError::AgentNotFound(agent_id))?;
        if !agent.is_active() {
            return Err(EngineError::AgentUnavailable(agent_id));
        }

        // Step 3: idempotency short-circuit survives process restarts
        // because it reads the committed action log, not process memory.
        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(response) = self.replay(pool, key).await? {
                return Ok(response);
            }
        }

        // Step 4: environment gate; rejections never touch capacity.
        if let Some(env) = environment::get_environment_tx(&mut tx, &agent.deployment_target).await?
        {
            let reason = if !env.within_active_window(now) {
                Some(rejection_reasons::OUTSIDE_ACTIVE_WINDOW)
            } else if env.cognition_availability == CognitionAvailability::Unavailable {
                Some(rejection_reasons::COGNITION_UNAVAILABLE)
            } else if let Some(cap) = env.max_throughput_per_minute {
                let used =
                    throughput::current_minute_count(&mut tx, &agent.deployment_target, now)
                        .await?;
                (used >= cap).then_some(rejection_reasons::THROUGHPUT_EXCEEDED)
            } else {
                None
            };

            if let Some(reason) = reason {
                return self
                    .finish_environment_rejection(tx, &agent, action_type, request, reason)
                    .await;
            }
        }

        // Step 5: the capacity row lock is the admission mutex.
        let cap = capacity::lock_capacity(&mut tx, agent_id).await?;
        let balance_before = cap.reconciled_balance(now);

        // Step 6: cost composition.
        let provider = match self.providers.resolve(&agent.cognition_provider) {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    agent_id = %agent_id,
                    provider = %agent.cognition_provider,
                    error = %e,
                    "Cognition provider not registered, treating as none"
                );
                None
            }
        };

        let cognition_ctx = CognitionContext {
            agent_id: agent_id.to_string(),
            deployment_target: agent.deployment_target.clone(),
            action_type: action_type.as_str().to_string(),
            config: json!({}),
        };
        let client_payload = request.payload.clone().unwrap_or(Value::Null);

        let estimated = provider
            .as_ref()
            .map(|p| p.estimate_cost(&client_payload, &cognition_ctx).max(0))
            .unwrap_or(0);
        let required = request.requested_cost + estimated;

        // Step 7: throttle check.
        if agent.throttle_profile == ThrottleProfile::Paused {
            return self
                .finish_rejection(
                    tx,
                    &agent,
                    action_type,
                    request,
                    rejection_reasons::THROTTLE_PAUSED,
                    balance_before,
                    estimated,
                    required,
                    now,
                )
                .await;
        }

        // Step 8: admission.
        if balance_before < required {
            return self
                .finish_rejection(
                    tx,
                    &agent,
                    action_type,
                    request,
                    rejection_reasons::INSUFFICIENT_CAPACITY,
                    balance_before,
                    estimated,
                    required,
                    now,
                )
                .await;
        }

        // Step 9: cognition execution. Failures never roll the transaction
        // back; Paused flips to rejection, everything else degrades to the
        // base cost.
        let mut cognition: Option<CognitionOutcome> = None;
        let mut deducted = request.requested_cost;

        if let Some(provider) = provider.as_ref() {
            let deadline = Duration::from_millis(self.config.cognition_timeout_ms);
            let executed =
                tokio::time::timeout(deadline, provider.execute(&client_payload, &cognition_ctx))
                    .await;

            match executed {
                Ok(Ok(mut outcome)) => {
                    let cost_cap = estimated.saturating_mul(self.config.max_cost_multiplier);
                    if outcome.actual_cost > cost_cap {
                        warn!(
                            agent_id = %agent_id,
                            actual = outcome.actual_cost,
                            cap = cost_cap,
                            "Provider actual_cost exceeds the multiplier cap, clamping"
                        );
                        outcome.actual_cost = cost_cap;
                    }
                    deducted = request.requested_cost + outcome.actual_cost.max(0);
                    cognition = Some(outcome);
                }
                Ok(Err(CognitionError::Paused)) => {
                    return self
                        .finish_rejection(
                            tx,
                            &agent,
                            action_type,
                            request,
                            rejection_reasons::COGNITION_PAUSED,
                            balance_before,
                            estimated,
                            required,
                            now,
                        )
                        .await;
                }
                Ok(Err(e)) => {
                    warn!(agent_id = %agent_id, error = %e, "Cognition failed, using base cost");
                }
                Err(_) => {
                    warn!(
                        agent_id = %agent_id,
                        timeout_ms = self.config.cognition_timeout_ms,
                        "Cognition deadline elapsed, using base cost"
                    );
                }
            }
        }

        // Step 10: persist capacity, event, action log, artifact events.
        let balance_after = balance_before - deducted;
        capacity::store_balance(&mut tx, agent_id, balance_after, now).await?;

        let payload = json!({
            "action_type": action_type.as_str(),
            "requested_cost": request.requested_cost,
            "estimated_cost": estimated,
            "total_cost": deducted,
            "subject_agent_id": request.subject_agent_id,
            "deployment_target": agent.deployment_target,
            "balance_before": balance_before,
            "balance_after": balance_after,
            "payload": client_payload,
            "cognition": cognition,
        });

        let event = persist_event_tx(
            &mut tx,
            TOPIC_AGENTS,
            self.base_event(event_types::ACTION_ACCEPTED, payload, &agent, request),
        )
        .await?;

        insert_action_log(
            &mut tx,
            agent_id,
            action_type,
            request,
            deducted,
            true,
            None,
            event.event_id,
        )
        .await?;

        if action_type.is_implicating() {
            // Subject existence is deliberately not verified; observers may
            // see a dangling reference.
            self.emit_artifact_events(&mut tx, &agent, action_type, request, &event)
                .await?;
        }

        // Step 11: throughput counter.
        throughput::increment_minute(&mut tx, &agent.deployment_target, now).await?;

        // Step 12: commit; the outbox dispatcher publishes asynchronously.
        tx.commit().await.map_err(StoreError::from)?;

        debug!(
            agent_id = %agent_id,
            action = %action_type,
            cost = deducted,
            balance = balance_after,
            "Action accepted"
        );

        Ok(AttemptResponse {
            accepted: true,
            reason: None,
            idempotent: false,
            environment_constraint: false,
            remaining_balance: balance_after,
            event,
            cognition,
        })
    }

    /// Reject without touching capacity; commits the event and action log.
    async fn finish_environment_rejection(
        &self,
        mut tx: Transaction<'_, Postgres>,
        agent: &Agent,
        action_type: ActionType,
        request: &AttemptRequest,
        reason: &str,
    ) -> Result<AttemptResponse> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM agent_capacity WHERE agent_id = $1")
                .bind(agent.agent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        let balance = balance.unwrap_or(0);

        let payload = json!({
            "action_type": action_type.as_str(),
            "requested_cost": request.requested_cost,
            "reason": reason,
            "deployment_target": agent.deployment_target,
            "balance_before": balance,
            "balance_after": balance,
            "payload": request.payload.clone().unwrap_or(Value::Null),
        });

        let event = persist_event_tx(
            &mut tx,
            TOPIC_AGENTS,
            self.base_event(event_types::ACTION_REJECTED_ENVIRONMENT, payload, agent, request),
        )
        .await?;

        insert_action_log(
            &mut tx,
            agent.agent_id,
            action_type,
            request,
            request.requested_cost,
            false,
            Some(reason),
            event.event_id,
        )
        .await?;

        tx.commit().await.map_err(StoreError::from)?;

        debug!(agent_id = %agent.agent_id, reason, "Action rejected by environment");

        Ok(AttemptResponse {
            accepted: false,
            reason: Some(reason.to_string()),
            idempotent: false,
            environment_constraint: true,
            remaining_balance: balance,
            event,
            cognition: None,
        })
    }

    /// Reject after the capacity row was locked; persists the reconciled
    /// balance but deducts nothing.
    #[allow(clippy::too_many_arguments)]
    async fn finish_rejection(
        &self,
        mut tx: Transaction<'_, Postgres>,
        agent: &Agent,
        action_type: ActionType,
        request: &AttemptRequest,
        reason: &str,
        balance: i64,
        estimated: i64,
        required: i64,
        now: chrono::DateTime<Utc>,
    ) -> Result<AttemptResponse> {
        capacity::store_balance(&mut tx, agent.agent_id, balance, now).await?;

        let payload = json!({
            "action_type": action_type.as_str(),
            "requested_cost": request.requested_cost,
            "estimated_cost": estimated,
            "total_cost": required,
            "reason": reason,
            "subject_agent_id": request.subject_agent_id,
            "deployment_target": agent.deployment_target,
            "balance_before": balance,
            "balance_after": balance,
            "payload": request.payload.clone().unwrap_or(Value::Null),
        });

        let event = persist_event_tx(
            &mut tx,
            TOPIC_AGENTS,
            self.base_event(event_types::ACTION_REJECTED, payload, agent, request),
        )
        .await?;

        insert_action_log(
            &mut tx,
            agent.agent_id,
            action_type,
            request,
            required,
            false,
            Some(reason),
            event.event_id,
        )
        .await?;

        tx.commit().await.map_err(StoreError::from)?;

        debug!(agent_id = %agent.agent_id, reason, "Action rejected");

        Ok(AttemptResponse {
            accepted: false,
            reason: Some(reason.to_string()),
            idempotent: false,
            environment_constraint: false,
            remaining_balance: balance,
            event,
            cognition: None,
        })
    }

    /// Emit the artifact pair for an accepted implicating action.
    async fn emit_artifact_events(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        agent: &Agent,
        action_type: ActionType,
        request: &AttemptRequest,
        action_event: &Envelope,
    ) -> Result<()> {
        let issued = json!({
            "action_event_id": action_event.event_id,
            "agent_id": agent.agent_id,
            "subject_agent_id": request.subject_agent_id,
            "action_type": action_type.as_str(),
            "deployment_target": agent.deployment_target,
        });
        persist_event_tx(
            tx,
            TOPIC_AGENTS,
            self.base_event(event_types::ARTIFACT_ISSUED, issued, agent, request),
        )
        .await?;

        let implicates = json!({
            "action_event_id": action_event.event_id,
            "issuing_agent_id": agent.agent_id,
            "subject_agent_id": request.subject_agent_id,
            "implication_type": action_type.as_str(),
            "deployment_target": agent.deployment_target,
        });
        persist_event_tx(
            tx,
            TOPIC_AGENTS,
            self.base_event(event_types::ARTIFACT_IMPLICATES_AGENT, implicates, agent, request),
        )
        .await?;

        Ok(())
    }

    fn base_event(
        &self,
        event_type: &str,
        payload: Value,
        agent: &Agent,
        request: &AttemptRequest,
    ) -> Event {
        let mut event = Event::new(event_type, payload)
            .with_actor(agent.agent_id.to_string(), Some(agent.generation))
            .with_context(json!({
                "deployment_target": agent.deployment_target,
                "sponsor_id": agent.sponsor_id,
            }));

        if let Some(correlation_id) = request.correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(key) = request.idempotency_key.as_deref() {
            event = event.with_idempotency_key(key);
        }
        event
    }

    /// Serve a previously committed attempt for this idempotency key.
    async fn replay(&self, pool: &PgPool, key: &str) -> Result<Option<AttemptResponse>> {
        let row: Option<ActionLogRow> = sqlx::query_as(
            "SELECT accepted, reason, event_id FROM action_log WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let event = ox_eventlog::fetch_event(pool, row.event_id).await?;
        let remaining_balance = event
            .payload
            .get("balance_after")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let cognition = event
            .payload
            .get("cognition")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let environment_constraint =
            event.event_type == event_types::ACTION_REJECTED_ENVIRONMENT;

        debug!(key, event_id = %row.event_id, "Idempotent attempt replayed");

        Ok(Some(AttemptResponse {
            accepted: row.accepted,
            reason: row.reason,
            idempotent: true,
            environment_constraint,
            remaining_balance,
            event,
            cognition,
        }))
    }
}

#[derive(Debug, FromRow)]
struct ActionLogRow {
    accepted: bool,
    reason: Option<String>,
    event_id: Uuid,
}

#[allow(clippy::too_many_arguments)]
async fn insert_action_log(
    tx: &mut Transaction<'_, Postgres>,
    agent_id: Uuid,
    action_type: ActionType,
    request: &AttemptRequest,
    total_cost: i64,
    accepted: bool,
    reason: Option<&str>,
    event_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO action_log (
            agent_id, action_type, requested_cost, total_cost,
            accepted, reason, idempotency_key, event_id
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(agent_id)
    .bind(action_type.as_str())
    .bind(request.requested_cost)
    .bind(total_cost)
    .bind(accepted)
    .bind(reason)
    .bind(&request.idempotency_key)
    .bind(event_id)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::from)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_serialization_hides_default_flags() {
        let response = AttemptResponse {
            accepted: true,
            reason: None,
            idempotent: false,
            environment_constraint: false,
            remaining_balance: 70,
            event: Envelope {
                event_id: Uuid::now_v7(),
                event_type: event_types::ACTION_ACCEPTED.to_string(),
                occurred_at: Utc::now(),
                actor_id: None,
                actor_generation: None,
                correlation_id: None,
                idempotency_key: None,
                payload: json!({}),
                context: None,
            },
            cognition: None,
        };

        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["accepted"], json!(true));
        assert_eq!(body["remaining_balance"], json!(70));
        // false flags and absent fields stay off the wire
        assert!(body.get("idempotent").is_none());
        assert!(body.get("environment_constraint").is_none());
        assert!(body.get("reason").is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.transaction_budget_ms, 2_000);
        assert_eq!(config.max_cost_multiplier, 2);
    }
}
