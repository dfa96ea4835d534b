//! Sponsor policy sweep.
//!
//! Policies past their cadence are evaluated against each sponsored agent.
//! Application is idempotent per (policy, tick, agent) through the run log's
//! primary key, so overlapping sweeps across replicas cannot double-apply.

use crate::error::{InfluenceError, Result};
use chrono::Utc;
use ox_domain::events::{event_types, TOPIC_AGENTS};
use ox_domain::{evaluate_rules, Agent, PolicyAction, PolicyRule, RuleMatch};
use ox_eventlog::{persist_event_tx, Event};
use ox_store::{agents, capacity, credits, environment};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct PolicyRow {
    policy_id: Uuid,
    sponsor_id: Uuid,
    rules: Value,
    cadence_seconds: i64,
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepSummary {
    pub policies_run: usize,
    pub applied: usize,
    pub skipped: usize,
}

/// Create a policy after validating its rules and cadence.
pub async fn create_policy(
    pool: &PgPool,
    sponsor_id: Uuid,
    policy_type: &str,
    rules: Value,
    cadence_seconds: i64,
) -> Result<Uuid> {
    if cadence_seconds < 60 {
        return Err(InfluenceError::InvalidRules(
            "cadence_seconds must be >= 60".to_string(),
        ));
    }
    let parsed: Vec<PolicyRule> = serde_json::from_value(rules.clone())
        .map_err(|e| InfluenceError::InvalidRules(e.to_string()))?;
    if parsed.is_empty() {
        return Err(InfluenceError::InvalidRules("rules must not be empty".to_string()));
    }

    let policy_id = Uuid::now_v7();
    sqlx::query(
        r#"
        INSERT INTO sponsor_policies (policy_id, sponsor_id, policy_type, rules, cadence_seconds)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(policy_id)
    .bind(sponsor_id)
    .bind(policy_type)
    .bind(&rules)
    .bind(cadence_seconds)
    .execute(pool)
    .await
    .map_err(ox_store::StoreError::from)?;

    info!(%policy_id, %sponsor_id, policy_type, "Policy created");
    Ok(policy_id)
}

/// Run one sweep over all policies past their cadence.
pub async fn run_policy_sweep(pool: &PgPool) -> Result<SweepSummary> {
    let now = Utc::now();

    let due: Vec<PolicyRow> = sqlx::query_as(
        r#"
        SELECT policy_id, sponsor_id, rules, cadence_seconds
        FROM sponsor_policies
        WHERE active
          AND (last_run_at IS NULL
               OR last_run_at + cadence_seconds * INTERVAL '1 second' <= $1)
        ORDER BY policy_id
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await
    .map_err(ox_store::StoreError::from)?;

    let mut summary = SweepSummary::default();

    for policy in &due {
        let rules: Vec<PolicyRule> = match serde_json::from_value(policy.rules.clone()) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(policy_id = %policy.policy_id, error = %e, "Skipping policy with unparseable rules");
                continue;
            }
        };

        // Deterministic tick id: replicas sweeping the same cadence window
        // agree on it, so the run-log key dedupes across them.
        let tick_id = now.timestamp() / policy.cadence_seconds.max(60);

        let sponsored = agents::list_sponsored_agents(pool, policy.sponsor_id).await?;
        for agent in &sponsored {
            match run_policy_for_agent(pool, policy, &rules, tick_id, agent).await {
                Ok(Some(true)) => summary.applied += 1,
                Ok(Some(false)) => summary.skipped += 1,
                Ok(None) => {} // another replica took this (policy, tick, agent)
                Err(e) => {
                    warn!(
                        policy_id = %policy.policy_id,
                        agent_id = %agent.agent_id,
                        error = %e,
                        "Policy application failed for agent"
                    );
                }
            }
        }

        sqlx::query("UPDATE sponsor_policies SET last_run_at = $2 WHERE policy_id = $1")
            .bind(policy.policy_id)
            .bind(now)
            .execute(pool)
            .await
            .map_err(ox_store::StoreError::from)?;

        summary.policies_run += 1;
    }

    if summary.policies_run > 0 {
        info!(
            policies = summary.policies_run,
            applied = summary.applied,
            skipped = summary.skipped,
            "Policy sweep complete"
        );
    }

    Ok(summary)
}

/// Evaluate and apply one policy for one agent, atomically.
///
/// Returns Some(applied) on a fresh run, None when the (policy, tick, agent)
/// key was already claimed.
async fn run_policy_for_agent(
    pool: &PgPool,
    policy: &PolicyRow,
    rules: &[PolicyRule],
    tick_id: i64,
    agent: &Agent,
) -> Result<Option<bool>> {
    let mut tx = pool.begin().await.map_err(ox_store::StoreError::from)?;

    let reserved = sqlx::query(
        r#"
        INSERT INTO policy_run_log (policy_id, tick_id, agent_id, outcome)
        VALUES ($1, $2, $3, 'pending')
        ON CONFLICT (policy_id, tick_id, agent_id) DO NOTHING
        "#,
    )
    .bind(policy.policy_id)
    .bind(tick_id)
    .bind(agent.agent_id)
    .execute(&mut *tx)
    .await
    .map_err(ox_store::StoreError::from)?
    .rows_affected();

    if reserved == 0 {
        tx.rollback().await.map_err(ox_store::StoreError::from)?;
        return Ok(None);
    }

    let context = build_context(pool, agent).await?;
    let evaluation = evaluate_rules(rules, &context);

    let (outcome, reason, applied, diff) = match evaluation {
        RuleMatch::Matched { rule_index, action } => {
            let diff = apply_action(&mut tx, policy, tick_id, agent, &action).await?;
            emit_policy_event(
                &mut tx,
                policy,
                tick_id,
                agent,
                event_types::POLICY_APPLIED,
                json!({
                    "rule_index": rule_index,
                    "action": action,
                    "diff": diff,
                }),
            )
            .await?;
            ("applied", format!("rule {rule_index} matched"), true, Some(diff))
        }
        RuleMatch::NoMatch => {
            emit_policy_event(
                &mut tx,
                policy,
                tick_id,
                agent,
                event_types::POLICY_SKIPPED,
                json!({ "reason": "no_rule_matched" }),
            )
            .await?;
            ("skipped", "no_rule_matched".to_string(), false, None)
        }
    };

    sqlx::query(
        r#"
        UPDATE policy_run_log
        SET outcome = $4, reason = $5, applied = $6, diff = $7
        WHERE policy_id = $1 AND tick_id = $2 AND agent_id = $3
        "#,
    )
    .bind(policy.policy_id)
    .bind(tick_id)
    .bind(agent.agent_id)
    .bind(outcome)
    .bind(&reason)
    .bind(applied)
    .bind(&diff)
    .execute(&mut *tx)
    .await
    .map_err(ox_store::StoreError::from)?;

    tx.commit().await.map_err(ox_store::StoreError::from)?;

    debug!(
        policy_id = %policy.policy_id,
        agent_id = %agent.agent_id,
        outcome,
        "Policy evaluated"
    );

    Ok(Some(applied))
}

/// Evaluation context: the fields predicates may reference.
async fn build_context(pool: &PgPool, agent: &Agent) -> Result<Value> {
    let credit_balance = credits::agent_credit_balance(pool, agent.agent_id).await?;
    let cap = capacity::get_capacity(pool, agent.agent_id).await?;
    let env = environment::get_environment(pool, &agent.deployment_target).await?;

    let (availability, throttle_factor) = env
        .map(|e| (e.cognition_availability.as_str(), e.throttle_factor))
        .unwrap_or(("full", 1.0));

    Ok(json!({
        "agent": {
            "status": agent.status.as_str(),
            "balance": credit_balance.to_f64().unwrap_or(0.0),
            "capacity": cap.map(|c| c.reconciled_balance(Utc::now())).unwrap_or(0),
            "provider": agent.cognition_provider,
            "profile": agent.throttle_profile.as_str(),
        },
        "env": {
            "cognition_availability": availability,
            "throttle_factor": throttle_factor,
        },
    }))
}

async fn apply_action(
    tx: &mut Transaction<'_, Postgres>,
    policy: &PolicyRow,
    tick_id: i64,
    agent: &Agent,
    action: &PolicyAction,
) -> Result<Value> {
    let idempotency_key = format!("policy:{}:{}:{}", policy.policy_id, tick_id, agent.agent_id);

    let diff = match action {
        PolicyAction::AllocateDelta { amount } => {
            let balance =
                credits::adjust_agent_credits(tx, agent.agent_id, *amount, Some(&idempotency_key))
                    .await?;
            json!({ "credit_delta": amount, "agent_balance": balance })
        }
        PolicyAction::SetProvider { provider } => {
            sqlx::query(
                "UPDATE agents SET cognition_provider = $2, updated_at = NOW() WHERE agent_id = $1",
            )
            .bind(agent.agent_id)
            .bind(provider)
            .execute(&mut **tx)
            .await
            .map_err(ox_store::StoreError::from)?;
            json!({ "provider": { "from": agent.cognition_provider, "to": provider } })
        }
        PolicyAction::SetProfile { profile } => {
            sqlx::query(
                "UPDATE agents SET throttle_profile = $2, updated_at = NOW() WHERE agent_id = $1",
            )
            .bind(agent.agent_id)
            .bind(profile.as_str())
            .execute(&mut **tx)
            .await
            .map_err(ox_store::StoreError::from)?;
            json!({ "profile": { "from": agent.throttle_profile.as_str(), "to": profile.as_str() } })
        }
        PolicyAction::Redeploy { target } => {
            sqlx::query(
                r#"
                UPDATE agents
                SET deployment_target = $2, status = 'active',
                    generation = generation + 1, updated_at = NOW()
                WHERE agent_id = $1
                "#,
            )
            .bind(agent.agent_id)
            .bind(target)
            .execute(&mut **tx)
            .await
            .map_err(ox_store::StoreError::from)?;
            json!({ "deployment": { "from": agent.deployment_target, "to": target } })
        }
    };

    Ok(diff)
}

async fn emit_policy_event(
    tx: &mut Transaction<'_, Postgres>,
    policy: &PolicyRow,
    tick_id: i64,
    agent: &Agent,
    event_type: &str,
    detail: Value,
) -> Result<()> {
    let mut payload = json!({
        "policy_id": policy.policy_id,
        "sponsor_id": policy.sponsor_id,
        "tick_id": tick_id,
        "agent_id": agent.agent_id,
        "deployment_target": agent.deployment_target,
    });
    if let (Some(obj), Some(extra)) = (payload.as_object_mut(), detail.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }

    let event = Event::new(event_type, payload)
        .with_actor(format!("policy:{}", policy.policy_id), None)
        .with_idempotency_key(format!(
            "policy:{}:{}:{}",
            policy.policy_id, tick_id, agent.agent_id
        ));
    persist_event_tx(tx, TOPIC_AGENTS, event).await?;

    Ok(())
}
