//! Read-only observation API with role gating.
//!
//! Every endpoint resolves the observer (header-driven, default viewer),
//! enforces its minimum role and per-(endpoint, observer) rate limit,
//! writes an observer access log row, and returns a role-filtered view:
//! viewers see summaries, analysts see full projection payloads with
//! sponsor attribution hidden, auditors see everything including source
//! event ids.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use ox_domain::ObserverRole;
use ox_store::observer_log::{record_access_best_effort, AccessRecord};
use ox_store::{environment, StoreError};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{ApiError, ApiState};

type ApiResult<T> = Result<T, ApiError>;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/ox/live", get(live_handler))
        .route("/ox/sessions", get(sessions_handler))
        .route("/ox/artifacts", get(artifacts_handler))
        .route("/ox/agents/:id/perceived-by", get(perceived_by_handler))
        .route("/ox/observe", get(observe_handler))
        .route("/ox/events", get(events_handler))
}

// =============================================================================
// Observer resolution and gating
// =============================================================================

#[derive(Debug, Clone)]
struct Observer {
    id: String,
    role: ObserverRole,
}

fn resolve_observer(headers: &HeaderMap) -> Observer {
    let id = headers
        .get("x-observer-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("anonymous")
        .to_string();

    let role = headers
        .get("x-observer-role")
        .and_then(|v| v.to_str().ok())
        .map(ObserverRole::parse_or_viewer)
        .unwrap_or(ObserverRole::Viewer);

    Observer { id, role }
}

/// Role check, rate limit, and the denial audit trail in one place.
async fn gate(
    state: &ApiState,
    headers: &HeaderMap,
    endpoint: &str,
    required: ObserverRole,
    per_minute: u64,
) -> ApiResult<Observer> {
    let observer = resolve_observer(headers);

    if observer.role < required {
        record_access_best_effort(
            state.db.core(),
            &AccessRecord {
                observer_id: observer.id.clone(),
                observer_role: observer.role,
                endpoint: endpoint.to_string(),
                query_params: json!({ "denied": "insufficient observer role" }),
                response_count: 0,
            },
        )
        .await;
        return Err(ApiError::Forbidden("insufficient observer role".to_string()));
    }

    if !state.rate_limiter.check(endpoint, &observer.id, per_minute) {
        return Err(ApiError::RateLimited);
    }

    Ok(observer)
}

async fn audit(
    state: &ApiState,
    observer: &Observer,
    endpoint: &str,
    query_params: Value,
    response_count: usize,
) {
    record_access_best_effort(
        state.db.core(),
        &AccessRecord {
            observer_id: observer.id.clone(),
            observer_role: observer.role,
            endpoint: endpoint.to_string(),
            query_params,
            response_count: response_count as i32,
        },
    )
    .await;
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// =============================================================================
// /ox/live
// =============================================================================

#[derive(Debug, Deserialize)]
struct LiveQuery {
    #[serde(default)]
    deployment: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, FromRow)]
struct LiveEventRow {
    source_event_id: Uuid,
    event_type: String,
    occurred_at: DateTime<Utc>,
    agent_id: Option<Uuid>,
    deployment_target: Option<String>,
    summary: String,
    payload: Value,
    sponsor_id: Option<Uuid>,
}

impl LiveEventRow {
    fn for_role(&self, role: ObserverRole) -> Value {
        let mut view = json!({
            "event_type": self.event_type,
            "occurred_at": self.occurred_at,
            "agent_id": self.agent_id,
            "deployment_target": self.deployment_target,
            "summary": self.summary,
        });

        if role >= ObserverRole::Analyst {
            view["payload"] = self.payload.clone();
        }
        if role >= ObserverRole::Auditor {
            view["source_event_id"] = json!(self.source_event_id);
            view["sponsor_id"] = json!(self.sponsor_id);
        }
        view
    }
}

async fn live_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<LiveQuery>,
) -> ApiResult<Json<Value>> {
    let observer = gate(
        &state,
        &headers,
        "/ox/live",
        ObserverRole::Viewer,
        state.config.rate_limits.live_per_minute,
    )
    .await?;

    let limit = clamp_limit(query.limit);
    let rows: Vec<LiveEventRow> = sqlx::query_as(
        r#"
        SELECT source_event_id, event_type, occurred_at, agent_id,
               deployment_target, summary, payload, sponsor_id
        FROM live_events
        WHERE ($1::text IS NULL OR deployment_target = $1)
        ORDER BY occurred_at DESC
        LIMIT $2
        "#,
    )
    .bind(&query.deployment)
    .bind(limit)
    .fetch_all(state.db.core())
    .await
    .map_err(|e| ApiError::from(StoreError::from(e)))?;

    let data: Vec<Value> = rows.iter().map(|r| r.for_role(observer.role)).collect();

    audit(
        &state,
        &observer,
        "/ox/live",
        json!({ "deployment": query.deployment, "limit": limit }),
        data.len(),
    )
    .await;

    Ok(Json(json!({ "events": data, "count": data.len() })))
}

// =============================================================================
// /ox/sessions
// =============================================================================

#[derive(Debug, Deserialize)]
struct SessionsQuery {
    #[serde(default)]
    deployment: Option<String>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, FromRow)]
struct SessionViewRow {
    session_id: Uuid,
    deployment_target: String,
    participating_agent_ids: Vec<Uuid>,
    start_ts: DateTime<Utc>,
    end_ts: Option<DateTime<Utc>>,
    is_active: bool,
    derived_topic: String,
    action_type_counts: Value,
    event_count: i32,
    source_event_id: Uuid,
}

impl SessionViewRow {
    fn for_role(&self, role: ObserverRole) -> Value {
        let mut view = json!({
            "session_id": self.session_id,
            "deployment_target": self.deployment_target,
            "derived_topic": self.derived_topic,
            "start_ts": self.start_ts,
            "end_ts": self.end_ts,
            "is_active": self.is_active,
            "participant_count": self.participating_agent_ids.len(),
            "event_count": self.event_count,
        });

        if role >= ObserverRole::Analyst {
            view["participating_agent_ids"] = json!(self.participating_agent_ids);
            view["action_type_counts"] = self.action_type_counts.clone();
        }
        if role >= ObserverRole::Auditor {
            view["source_event_id"] = json!(self.source_event_id);
        }
        view
    }
}

async fn sessions_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<Value>> {
    let observer = gate(
        &state,
        &headers,
        "/ox/sessions",
        ObserverRole::Viewer,
        state.config.rate_limits.sessions_per_minute,
    )
    .await?;

    let limit = clamp_limit(query.limit);
    let rows: Vec<SessionViewRow> = sqlx::query_as(
        r#"
        SELECT session_id, deployment_target, participating_agent_ids,
               start_ts, end_ts, is_active, derived_topic, action_type_counts,
               event_count, source_event_id
        FROM sessions
        WHERE ($1::text IS NULL OR deployment_target = $1)
          AND ($2::boolean IS NULL OR is_active = $2)
        ORDER BY start_ts DESC
        LIMIT $3
        "#,
    )
    .bind(&query.deployment)
    .bind(query.active)
    .bind(limit)
    .fetch_all(state.db.core())
    .await
    .map_err(|e| ApiError::from(StoreError::from(e)))?;

    let data: Vec<Value> = rows.iter().map(|r| r.for_role(observer.role)).collect();

    audit(
        &state,
        &observer,
        "/ox/sessions",
        json!({ "deployment": query.deployment, "active": query.active, "limit": limit }),
        data.len(),
    )
    .await;

    Ok(Json(json!({ "sessions": data, "count": data.len() })))
}

// =============================================================================
// /ox/artifacts and /ox/agents/:id/perceived-by
// =============================================================================

#[derive(Debug, Deserialize)]
struct ArtifactsQuery {
    #[serde(default)]
    agent_id: Option<Uuid>,
    #[serde(default)]
    artifact_type: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, FromRow)]
struct ArtifactRow {
    artifact_id: Uuid,
    source_event_id: Uuid,
    artifact_type: String,
    agent_id: Uuid,
    subject_agent_id: Option<Uuid>,
    title: String,
    content_summary: String,
    metadata: Value,
    sponsor_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl ArtifactRow {
    fn for_role(&self, role: ObserverRole) -> Value {
        let mut view = json!({
            "artifact_id": self.artifact_id,
            "artifact_type": self.artifact_type,
            "agent_id": self.agent_id,
            "subject_agent_id": self.subject_agent_id,
            "title": self.title,
            "content_summary": self.content_summary,
            "created_at": self.created_at,
        });

        if role >= ObserverRole::Analyst {
            view["metadata"] = self.metadata.clone();
        }
        if role >= ObserverRole::Auditor {
            view["source_event_id"] = json!(self.source_event_id);
            view["sponsor_id"] = json!(self.sponsor_id);
        }
        view
    }
}

async fn artifacts_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<ArtifactsQuery>,
) -> ApiResult<Json<Value>> {
    let observer = gate(
        &state,
        &headers,
        "/ox/artifacts",
        ObserverRole::Viewer,
        state.config.rate_limits.artifacts_per_minute,
    )
    .await?;

    let limit = clamp_limit(query.limit);
    let rows: Vec<ArtifactRow> = sqlx::query_as(
        r#"
        SELECT artifact_id, source_event_id, artifact_type, agent_id,
               subject_agent_id, title, content_summary, metadata, sponsor_id, created_at
        FROM artifacts
        WHERE ($1::uuid IS NULL OR agent_id = $1)
          AND ($2::text IS NULL OR artifact_type = $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(query.agent_id)
    .bind(&query.artifact_type)
    .bind(limit)
    .fetch_all(state.db.core())
    .await
    .map_err(|e| ApiError::from(StoreError::from(e)))?;

    let data: Vec<Value> = rows.iter().map(|r| r.for_role(observer.role)).collect();

    audit(
        &state,
        &observer,
        "/ox/artifacts",
        json!({
            "agent_id": query.agent_id,
            "artifact_type": query.artifact_type,
            "limit": limit,
        }),
        data.len(),
    )
    .await;

    Ok(Json(json!({ "artifacts": data, "count": data.len() })))
}

#[derive(Debug, FromRow)]
struct PerceivedRow {
    artifact_id: Uuid,
    source_event_id: Uuid,
    artifact_type: String,
    title: String,
    content_summary: String,
    sponsor_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    issuing_agent_id: Uuid,
    implication_type: String,
}

/// Artifacts implicating this agent as subject; dangling subjects are
/// served as-is, the agent itself need not exist.
async fn perceived_by_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let observer = gate(
        &state,
        &headers,
        "/ox/agents/:id/perceived-by",
        ObserverRole::Analyst,
        state.config.rate_limits.artifacts_per_minute,
    )
    .await?;

    let rows: Vec<PerceivedRow> = sqlx::query_as(
        r#"
        SELECT a.artifact_id, a.source_event_id, a.artifact_type, a.title,
               a.content_summary, a.sponsor_id, a.created_at,
               i.issuing_agent_id, i.implication_type
        FROM artifact_implications i
        JOIN artifacts a ON a.artifact_id = i.artifact_id
        WHERE i.subject_agent_id = $1
        ORDER BY a.created_at DESC
        LIMIT $2
        "#,
    )
    .bind(agent_id)
    .bind(MAX_LIMIT)
    .fetch_all(state.db.core())
    .await
    .map_err(|e| ApiError::from(StoreError::from(e)))?;

    let data: Vec<Value> = rows
        .iter()
        .map(|r| {
            let mut view = json!({
                "artifact_id": r.artifact_id,
                "artifact_type": r.artifact_type,
                "title": r.title,
                "content_summary": r.content_summary,
                "created_at": r.created_at,
                "issuing_agent_id": r.issuing_agent_id,
                "implication_type": r.implication_type,
            });
            if observer.role >= ObserverRole::Auditor {
                view["source_event_id"] = json!(r.source_event_id);
                view["sponsor_id"] = json!(r.sponsor_id);
            }
            view
        })
        .collect();

    audit(
        &state,
        &observer,
        "/ox/agents/:id/perceived-by",
        json!({ "subject_agent_id": agent_id }),
        data.len(),
    )
    .await;

    Ok(Json(json!({ "subject_agent_id": agent_id, "artifacts": data, "count": data.len() })))
}

// =============================================================================
// /ox/observe
// =============================================================================

#[derive(Debug, Deserialize)]
struct ObserveQuery {
    deployment: String,
}

#[derive(Debug, FromRow)]
struct BraidRow {
    tick_id: i64,
    capacity: f64,
    throttle: f64,
    cognition: f64,
    redeploy_bias: f64,
    pressure_count: i32,
    computed_at: DateTime<Utc>,
}

/// Deployment overview: environment constraints, latest braid, session and
/// rejection activity.
async fn observe_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<ObserveQuery>,
) -> ApiResult<Json<Value>> {
    let observer = gate(
        &state,
        &headers,
        "/ox/observe",
        ObserverRole::Analyst,
        state.config.rate_limits.observe_per_minute,
    )
    .await?;

    let pool = state.db.core();

    let env = environment::get_environment(pool, &query.deployment).await?;
    let env_json = env
        .map(|e| serde_json::to_value(&e))
        .transpose()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let braid: Option<BraidRow> = sqlx::query_as(
        r#"
        SELECT tick_id, capacity, throttle, cognition, redeploy_bias,
               pressure_count, computed_at
        FROM braid_snapshots
        WHERE deployment_target = $1
        ORDER BY tick_id DESC
        LIMIT 1
        "#,
    )
    .bind(&query.deployment)
    .fetch_optional(pool)
    .await
    .map_err(|e| ApiError::from(StoreError::from(e)))?;

    let active_sessions: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sessions WHERE deployment_target = $1 AND is_active",
    )
    .bind(&query.deployment)
    .fetch_one(pool)
    .await
    .map_err(|e| ApiError::from(StoreError::from(e)))?;

    let recent_rejections: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM environment_rejections \
         WHERE deployment_target = $1 AND rejected_at > NOW() - INTERVAL '1 hour'",
    )
    .bind(&query.deployment)
    .fetch_one(pool)
    .await
    .map_err(|e| ApiError::from(StoreError::from(e)))?;

    let frames: Vec<(String, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT frame_type, summary, created_at FROM narrative_frames \
         WHERE deployment_target = $1 ORDER BY created_at DESC LIMIT 10",
    )
    .bind(&query.deployment)
    .fetch_all(pool)
    .await
    .map_err(|e| ApiError::from(StoreError::from(e)))?;

    let localities = ox_store::localities::list_localities(pool, &query.deployment).await?;

    let response = json!({
        "deployment_target": query.deployment,
        "environment": env_json,
        "localities": localities
            .iter()
            .map(|l| json!({
                "locality_id": l.locality_id,
                "name": l.name,
                "density": l.density,
                "interference_density": l.interference_density,
                "visibility_radius": l.visibility_radius,
            }))
            .collect::<Vec<_>>(),
        "braid": braid.map(|b| json!({
            "tick_id": b.tick_id,
            "capacity": b.capacity,
            "throttle": b.throttle,
            "cognition": b.cognition,
            "redeploy_bias": b.redeploy_bias,
            "pressure_count": b.pressure_count,
            "computed_at": b.computed_at,
        })),
        "active_sessions": active_sessions,
        "recent_environment_rejections": recent_rejections,
        "narrative_frames": frames
            .iter()
            .map(|(frame_type, summary, created_at)| json!({
                "frame_type": frame_type,
                "summary": summary,
                "created_at": created_at,
            }))
            .collect::<Vec<_>>(),
    });

    audit(
        &state,
        &observer,
        "/ox/observe",
        json!({ "deployment": query.deployment }),
        1,
    )
    .await;

    Ok(Json(response))
}

// =============================================================================
// /ox/events (auditor only)
// =============================================================================

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    actor_id: Option<String>,
    #[serde(default)]
    correlation_id: Option<Uuid>,
    #[serde(default)]
    limit: Option<i64>,
}

/// Raw event log access. The event log is ground truth for causality, so
/// only auditors see it.
async fn events_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let observer = gate(
        &state,
        &headers,
        "/ox/events",
        ObserverRole::Auditor,
        state.config.rate_limits.observe_per_minute,
    )
    .await?;

    let mut options = ox_eventlog::QueryOptions::new()
        .limit(clamp_limit(query.limit))
        .descending();
    if let Some(event_type) = &query.event_type {
        options = options.event_type(event_type);
    }
    if let Some(actor_id) = &query.actor_id {
        options = options.actor(actor_id);
    }
    if let Some(correlation_id) = query.correlation_id {
        options = options.correlation(correlation_id);
    }

    let events = ox_eventlog::query_events(state.db.core(), options)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let data: Vec<Value> = events
        .iter()
        .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
        .collect();

    audit(
        &state,
        &observer,
        "/ox/events",
        json!({
            "event_type": query.event_type,
            "actor_id": query.actor_id,
            "correlation_id": query.correlation_id,
        }),
        data.len(),
    )
    .await;

    Ok(Json(json!({ "events": data, "count": data.len() })))
}
