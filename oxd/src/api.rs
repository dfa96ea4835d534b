//! HTTP admission API for the OX daemon.
//!
//! Write-path endpoints:
//! - Agent lifecycle (create, archive, redeploy, sponsor/provider changes)
//! - Action attempts
//! - Capacity and credit allocation
//! - Pressure issuance and cancellation
//! - Sponsor policies
//! - Environment administration (ops-gated)
//!
//! Every inbound request carries a correlation id (minted when absent) that
//! propagates to every event; 5xx responses are fingerprinted into the
//! error inbox.

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use ox_domain::events::{event_types, TOPIC_AGENTS};
use ox_domain::{
    Agent, CognitionAvailability, EnvironmentState, PressureType, ThrottleProfile,
};
use ox_engine::{ActionEngine, AttemptRequest, EngineError};
use ox_eventlog::{persist_event, persist_event_tx, Event};
use ox_influence::InfluenceError;
use ox_store::error_inbox::record_error_best_effort;
use ox_store::{agents, capacity, environment, with_idempotency, Db, StoreError};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::rate_limit::RateLimiter;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub db: Db,
    pub engine: Arc<ActionEngine>,
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Correlation id extracted or minted by the middleware.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

/// Error sample attached to 5xx responses for the error inbox.
#[derive(Debug, Clone)]
struct ErrorSample(String);

// =============================================================================
// Error mapping
// =============================================================================

/// API error with its HTTP status mapping.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    RateLimited,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::BadRequest(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Internal(m) => m.clone(),
            Self::RateLimited => "rate_limited".to_string(),
        };

        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Details stay in the error inbox, not on the wire.
            json!({ "error": "internal_error" })
        } else {
            json!({ "error": message })
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            response.extensions_mut().insert(ErrorSample(message));
        }
        response
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidArgument(m) => Self::BadRequest(m),
            EngineError::AgentNotFound(_) => Self::NotFound("agent not found".to_string()),
            EngineError::AgentUnavailable(_) => Self::Conflict("agent_unavailable".to_string()),
            EngineError::Store(e) => Self::from(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity_type, .. } => {
                Self::NotFound(format!("{entity_type} not found"))
            }
            StoreError::IdempotencyConflict { key } => {
                Self::Conflict(format!("idempotency key reused with a different body: {key}"))
            }
            StoreError::IdempotencyPending { key } => {
                Self::Conflict(format!("idempotent request in flight: {key}"))
            }
            StoreError::InsufficientCredits { holder, .. } => {
                if holder.starts_with("sponsor:") {
                    Self::BadRequest("sponsor_credit_insufficient".to_string())
                } else {
                    Self::BadRequest("insufficient_credits".to_string())
                }
            }
            StoreError::Domain(e) => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<InfluenceError> for ApiError {
    fn from(err: InfluenceError) -> Self {
        match err {
            InfluenceError::NonPositiveAmount => {
                Self::BadRequest("amount must be positive".to_string())
            }
            InfluenceError::PressureNotFound(_) => {
                Self::NotFound("pressure not found".to_string())
            }
            InfluenceError::PolicyNotFound(_) => Self::NotFound("policy not found".to_string()),
            InfluenceError::InvalidRules(m) => Self::BadRequest(m),
            InfluenceError::Domain(e) => Self::BadRequest(e.to_string()),
            InfluenceError::Store(e) => Self::from(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ox_eventlog::EventLogError> for ApiError {
    fn from(err: ox_eventlog::EventLogError) -> Self {
        Self::Internal(err.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Middleware
// =============================================================================

/// Extract or mint the correlation id and echo it on the response.
///
/// The minted id is written back into the request headers so every handler
/// (and through them, every event) sees the same value.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::now_v7);

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        request.headers_mut().insert("x-correlation-id", value);
    }
    request.extensions_mut().insert(CorrelationId(correlation_id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}

/// Fingerprint 5xx responses into the error inbox.
async fn error_inbox_middleware(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        let message = response
            .extensions()
            .get::<ErrorSample>()
            .map(|s| s.0.clone())
            .unwrap_or_else(|| "internal error".to_string());
        record_error_best_effort(state.db.core(), &method, &path, &message).await;
    }

    response
}

// =============================================================================
// Router
// =============================================================================

/// Create the full API router (admission + read side).
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Agents
        .route("/agents", post(create_agent_handler))
        .route("/agents/:id", get(get_agent_handler).patch(patch_agent_handler))
        .route("/agents/:id/attempt", post(attempt_handler))
        .route("/agents/:id/archive", post(archive_agent_handler))
        .route("/agents/:id/redeploy", post(redeploy_agent_handler))
        .route("/agents/:id/capacity/allocate", post(allocate_capacity_handler))
        .route(
            "/agents/:id/config",
            get(get_config_handler).put(put_config_handler),
        )
        .route("/agents/:id/localities", put(set_memberships_handler))
        // Sponsor economy
        .route("/sponsor/:s/credits/purchase", post(purchase_credits_handler))
        .route("/sponsor/:s/agents/:a/credits/allocate", post(allocate_credits_handler))
        .route("/sponsor/:s/pressures", post(issue_pressure_handler))
        .route("/sponsor/:s/pressures/:id", delete(cancel_pressure_handler))
        .route("/sponsor/:s/policies", post(create_policy_handler))
        // Environment administration
        .route(
            "/admin/environment/:target",
            put(put_environment_handler).delete(delete_environment_handler),
        )
        .route("/admin/localities/:target", put(put_locality_handler))
        // Read side
        .merge(crate::read_api::router())
        .layer(middleware::from_fn_with_state(state.clone(), error_inbox_middleware))
        .layer(middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn correlation(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn idempotency_key(headers: &HeaderMap, body_key: Option<&str>) -> Option<String> {
    headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| body_key.map(str::to_string))
}

// =============================================================================
// Health / metrics
// =============================================================================

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(state): State<Arc<ApiState>>) -> ApiResult<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.metrics.registry.gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| ApiError::Internal(e.to_string()))
}

// =============================================================================
// Agent lifecycle
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateAgentRequest {
    display_name: String,
    deployment_target: String,
    #[serde(default)]
    sponsor_id: Option<Uuid>,
    #[serde(default)]
    cognition_provider: Option<String>,
    #[serde(default)]
    throttle_profile: Option<String>,
    #[serde(default = "default_max_balance")]
    max_balance: i64,
    #[serde(default)]
    initial_balance: Option<i64>,
    #[serde(default = "default_regen")]
    regen_per_hour: i64,
}

fn default_max_balance() -> i64 {
    100
}

fn default_regen() -> i64 {
    10
}

async fn create_agent_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    if body.display_name.trim().is_empty() || body.deployment_target.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "display_name and deployment_target are required".to_string(),
        ));
    }
    if body.max_balance < 0 || body.regen_per_hour < 0 {
        return Err(ApiError::BadRequest(
            "capacity parameters must be non-negative".to_string(),
        ));
    }

    let mut agent = Agent::new(body.display_name.trim(), body.deployment_target.trim());
    agent.sponsor_id = body.sponsor_id;
    if let Some(provider) = body.cognition_provider {
        agent.cognition_provider = provider;
    }
    if let Some(profile) = &body.throttle_profile {
        agent.throttle_profile =
            ThrottleProfile::parse(profile).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }

    let pool = state.db.core();
    let mut tx = pool.begin().await.map_err(StoreError::from)?;
    agents::create_agent(
        &mut tx,
        &agent,
        body.max_balance,
        body.initial_balance.unwrap_or(body.max_balance),
        body.regen_per_hour,
    )
    .await?;

    let mut event = Event::new(
        event_types::AGENT_CREATED,
        json!({
            "agent_id": agent.agent_id,
            "display_name": agent.display_name,
            "deployment_target": agent.deployment_target,
            "sponsor_id": agent.sponsor_id,
        }),
    )
    .with_actor(agent.agent_id.to_string(), Some(agent.generation));
    if let Some(correlation_id) = correlation(&headers) {
        event = event.with_correlation_id(correlation_id);
    }
    persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;
    tx.commit().await.map_err(StoreError::from)?;

    Ok((StatusCode::CREATED, Json(agent)))
}

async fn get_agent_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let pool = state.db.core();
    let agent = agents::get_agent(pool, agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("agent not found".to_string()))?;
    let cap = capacity::get_capacity(pool, agent_id).await?;

    Ok(Json(json!({
        "agent": agent,
        "capacity": cap.map(|c| json!({
            "balance": c.reconciled_balance(Utc::now()),
            "max_balance": c.max_balance,
            "regen_per_hour": c.regen_per_hour,
        })),
    })))
}

async fn archive_agent_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Agent>> {
    let pool = state.db.core();
    let agent = agents::archive_agent(pool, agent_id).await?;

    emit_lifecycle_event(
        pool,
        event_types::AGENT_ARCHIVED,
        &agent,
        json!({ "agent_id": agent_id }),
        correlation(&headers),
    )
    .await;

    Ok(Json(agent))
}

#[derive(Debug, Deserialize)]
struct RedeployRequest {
    deployment_target: String,
}

async fn redeploy_agent_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RedeployRequest>,
) -> ApiResult<Json<Agent>> {
    if body.deployment_target.trim().is_empty() {
        return Err(ApiError::BadRequest("deployment_target is required".to_string()));
    }

    let pool = state.db.core();
    let agent = agents::redeploy_agent(pool, agent_id, body.deployment_target.trim()).await?;

    emit_lifecycle_event(
        pool,
        event_types::AGENT_REDEPLOYED,
        &agent,
        json!({
            "agent_id": agent_id,
            "deployment_target": agent.deployment_target,
            "generation": agent.generation,
        }),
        correlation(&headers),
    )
    .await;

    Ok(Json(agent))
}

#[derive(Debug, Deserialize)]
struct PatchAgentRequest {
    #[serde(default)]
    cognition_provider: Option<String>,
    #[serde(default)]
    throttle_profile: Option<String>,
    #[serde(default)]
    sponsor_id: Option<Option<Uuid>>,
}

/// Provider/profile/sponsor changes are gated to the owning sponsor.
async fn patch_agent_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<PatchAgentRequest>,
) -> ApiResult<Json<Agent>> {
    let pool = state.db.core();
    let current = agents::get_agent(pool, agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("agent not found".to_string()))?;

    if let Some(owner) = current.sponsor_id {
        let caller: Option<Uuid> = headers
            .get("x-sponsor-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok());
        if caller != Some(owner) {
            return Err(ApiError::Forbidden("forbidden".to_string()));
        }
    }

    let profile = body
        .throttle_profile
        .as_deref()
        .map(ThrottleProfile::parse)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut agent = agents::set_provider_profile(
        pool,
        agent_id,
        body.cognition_provider.as_deref(),
        profile,
    )
    .await?;

    if let Some(new_sponsor) = body.sponsor_id {
        agent = agents::set_sponsor(pool, agent_id, new_sponsor).await?;
        emit_lifecycle_event(
            pool,
            event_types::AGENT_SPONSOR_CHANGED,
            &agent,
            json!({
                "agent_id": agent_id,
                "from": current.sponsor_id,
                "to": new_sponsor,
            }),
            correlation(&headers),
        )
        .await;
    }

    if body.cognition_provider.is_some() || body.throttle_profile.is_some() {
        emit_lifecycle_event(
            pool,
            event_types::AGENT_CONFIG_CHANGED,
            &agent,
            json!({
                "agent_id": agent_id,
                "cognition_provider": agent.cognition_provider,
                "throttle_profile": agent.throttle_profile.as_str(),
            }),
            correlation(&headers),
        )
        .await;
    }

    Ok(Json(agent))
}

/// Lifecycle events record mutations that already committed; a failed emit
/// is logged, never surfaced.
async fn emit_lifecycle_event(
    pool: &sqlx::PgPool,
    event_type: &str,
    agent: &Agent,
    payload: Value,
    correlation_id: Option<Uuid>,
) {
    let mut event = Event::new(event_type, payload)
        .with_actor(agent.agent_id.to_string(), Some(agent.generation))
        .with_context(json!({
            "deployment_target": agent.deployment_target,
            "sponsor_id": agent.sponsor_id,
        }));
    if let Some(correlation_id) = correlation_id {
        event = event.with_correlation_id(correlation_id);
    }

    if let Err(e) = persist_event(pool, TOPIC_AGENTS, event).await {
        warn!(event_type, agent_id = %agent.agent_id, error = %e, "Lifecycle event emit failed");
    }
}

// =============================================================================
// Agent config
// =============================================================================

async fn get_config_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let config = agents::get_config(state.db.core(), agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("agent not found".to_string()))?;

    Ok(Json(json!({
        "agent_id": config.agent_id,
        "bias": config.bias,
        "throttle_config": config.throttle_config,
        "cognition_config": config.cognition_config,
        "version": config.version,
        "portable_config": config.portable_config,
    })))
}

#[derive(Debug, Deserialize)]
struct PutConfigRequest {
    #[serde(default)]
    bias: serde_json::Map<String, Value>,
    #[serde(default)]
    throttle_config: Value,
    #[serde(default)]
    cognition_config: Value,
}

async fn put_config_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<PutConfigRequest>,
) -> ApiResult<Json<Value>> {
    let pool = state.db.core();
    let agent = agents::get_agent(pool, agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("agent not found".to_string()))?;

    let version = agents::update_config(
        pool,
        agent_id,
        &body.bias,
        &body.throttle_config,
        &body.cognition_config,
    )
    .await?;

    emit_lifecycle_event(
        pool,
        event_types::AGENT_CONFIG_CHANGED,
        &agent,
        json!({ "agent_id": agent_id, "config_version": version }),
        correlation(&headers),
    )
    .await;

    Ok(Json(json!({ "agent_id": agent_id, "version": version })))
}

// =============================================================================
// Localities
// =============================================================================

#[derive(Debug, Deserialize)]
struct PutLocalityRequest {
    name: String,
    #[serde(default = "default_density")]
    density: f64,
    #[serde(default)]
    interference_density: f64,
    #[serde(default = "default_density")]
    visibility_radius: f64,
    #[serde(default = "default_evidence_half_life")]
    evidence_half_life: i64,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_density() -> f64 {
    1.0
}

fn default_evidence_half_life() -> i64 {
    3_600
}

fn default_true() -> bool {
    true
}

async fn put_locality_handler(
    State(state): State<Arc<ApiState>>,
    Path(target): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PutLocalityRequest>,
) -> ApiResult<Json<Value>> {
    require_ops_role(&headers)?;

    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let locality = ox_domain::Locality {
        locality_id: Uuid::now_v7(),
        deployment_target: target,
        name: body.name.trim().to_string(),
        density: body.density,
        interference_density: body.interference_density,
        visibility_radius: body.visibility_radius,
        evidence_half_life: body.evidence_half_life,
        active: body.active,
    };

    let locality_id = ox_store::localities::upsert_locality(state.db.core(), &locality).await?;

    Ok(Json(json!({
        "locality_id": locality_id,
        "deployment_target": locality.deployment_target,
        "name": locality.name,
    })))
}

#[derive(Debug, Deserialize)]
struct MembershipEntry {
    locality_id: Uuid,
    weight: f64,
}

#[derive(Debug, Deserialize)]
struct SetMembershipsRequest {
    memberships: Vec<MembershipEntry>,
}

async fn set_memberships_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
    Json(body): Json<SetMembershipsRequest>,
) -> ApiResult<Json<Value>> {
    let pool = state.db.core();
    agents::get_agent(pool, agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("agent not found".to_string()))?;

    let pairs: Vec<(Uuid, f64)> = body
        .memberships
        .iter()
        .map(|m| (m.locality_id, m.weight))
        .collect();

    let memberships = ox_store::localities::set_memberships(pool, agent_id, &pairs)
        .await
        .map_err(|e| match e {
            StoreError::Deserialization(m) => ApiError::BadRequest(m),
            other => ApiError::from(other),
        })?;

    Ok(Json(json!({
        "agent_id": agent_id,
        "memberships": memberships
            .iter()
            .map(|m| json!({ "locality_id": m.locality_id, "weight": m.weight }))
            .collect::<Vec<_>>(),
    })))
}

// =============================================================================
// Action attempts
// =============================================================================

#[derive(Debug, Deserialize, serde::Serialize)]
struct AttemptBody {
    action_type: String,
    #[serde(default)]
    requested_cost: i64,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    subject_agent_id: Option<Uuid>,
}

async fn attempt_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<AttemptBody>,
) -> ApiResult<Json<Value>> {
    let request = AttemptRequest {
        action_type: body.action_type.clone(),
        requested_cost: body.requested_cost,
        payload: body.payload.clone(),
        idempotency_key: idempotency_key(&headers, body.idempotency_key.as_deref()),
        subject_agent_id: body.subject_agent_id,
        correlation_id: correlation(&headers),
    };

    let response = state.engine.attempt(state.db.core(), agent_id, request).await?;

    if response.accepted {
        state.metrics.actions_accepted.inc();
    } else if let Some(reason) = response.reason.as_deref() {
        state.metrics.actions_rejected.with_label_values(&[reason]).inc();
    }

    serde_json::to_value(&response)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

// =============================================================================
// Capacity
// =============================================================================

#[derive(Debug, Deserialize)]
struct AllocateCapacityRequest {
    amount: i64,
}

async fn allocate_capacity_handler(
    State(state): State<Arc<ApiState>>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<AllocateCapacityRequest>,
) -> ApiResult<Json<Value>> {
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".to_string()));
    }

    let pool = state.db.core();
    let now = Utc::now();
    let mut tx = pool.begin().await.map_err(StoreError::from)?;

    let cap = capacity::lock_capacity(&mut tx, agent_id).await?;
    let reconciled = cap.reconciled_balance(now);
    let new_balance = (reconciled + body.amount).min(cap.max_balance);
    capacity::store_balance(&mut tx, agent_id, new_balance, now).await?;

    let mut event = Event::new(
        event_types::AGENT_CAPACITY_ALLOCATED,
        json!({
            "agent_id": agent_id,
            "amount": body.amount,
            "balance_before": reconciled,
            "balance_after": new_balance,
        }),
    )
    .with_actor(agent_id.to_string(), None);
    if let Some(correlation_id) = correlation(&headers) {
        event = event.with_correlation_id(correlation_id);
    }
    persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;

    tx.commit().await.map_err(StoreError::from)?;

    Ok(Json(json!({ "balance": new_balance, "max_balance": cap.max_balance })))
}

// =============================================================================
// Sponsor credits
// =============================================================================

#[derive(Debug, Deserialize, serde::Serialize)]
struct AmountRequest {
    amount: Decimal,
}

async fn purchase_credits_handler(
    State(state): State<Arc<ApiState>>,
    Path(sponsor_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Json<Value>> {
    let pool = state.db.core();
    let key = idempotency_key(&headers, None);
    let correlation_id = correlation(&headers);
    let body_value = serde_json::to_value(&body).map_err(|e| ApiError::Internal(e.to_string()))?;

    let response = with_idempotency::<_, _, InfluenceError>(
        pool,
        key.as_deref(),
        &body_value,
        || async {
            let balance =
                ox_influence::purchase(pool, sponsor_id, body.amount, correlation_id, key.as_deref())
                    .await?;
            Ok(json!({ "sponsor_id": sponsor_id, "wallet_balance": balance }))
        },
    )
    .await?;

    Ok(Json(response))
}

async fn allocate_credits_handler(
    State(state): State<Arc<ApiState>>,
    Path((sponsor_id, agent_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Json<Value>> {
    let pool = state.db.core();
    let key = idempotency_key(&headers, None);
    let correlation_id = correlation(&headers);
    let body_value = serde_json::to_value(&body).map_err(|e| ApiError::Internal(e.to_string()))?;

    let response = with_idempotency::<_, _, InfluenceError>(
        pool,
        key.as_deref(),
        &body_value,
        || async {
            let (wallet_balance, agent_balance) = ox_influence::allocate(
                pool,
                sponsor_id,
                agent_id,
                body.amount,
                correlation_id,
                key.as_deref(),
            )
            .await?;
            Ok(json!({
                "sponsor_id": sponsor_id,
                "agent_id": agent_id,
                "wallet_balance": wallet_balance,
                "agent_balance": agent_balance,
            }))
        },
    )
    .await?;

    Ok(Json(response))
}

// =============================================================================
// Pressures
// =============================================================================

#[derive(Debug, Deserialize, serde::Serialize)]
struct IssuePressureRequest {
    target_deployment: String,
    #[serde(default)]
    target_agent_id: Option<Uuid>,
    #[serde(rename = "type")]
    pressure_type: String,
    magnitude: f64,
    half_life_seconds: i64,
}

async fn issue_pressure_handler(
    State(state): State<Arc<ApiState>>,
    Path(sponsor_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<IssuePressureRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let pressure_type = PressureType::parse(&body.pressure_type)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let pool = state.db.core();
    let key = idempotency_key(&headers, None);
    let correlation_id = correlation(&headers);
    let body_value = serde_json::to_value(&body).map_err(|e| ApiError::Internal(e.to_string()))?;

    let response = with_idempotency::<_, _, InfluenceError>(
        pool,
        key.as_deref(),
        &body_value,
        || async {
            let pressure = ox_influence::issue_pressure(
                pool,
                sponsor_id,
                body.target_deployment.trim(),
                body.target_agent_id,
                pressure_type,
                body.magnitude,
                body.half_life_seconds,
                correlation_id,
                key.as_deref(),
            )
            .await?;
            Ok(json!({
                "pressure_id": pressure.pressure_id,
                "sponsor_id": pressure.sponsor_id,
                "target_deployment": pressure.target_deployment,
                "target_agent_id": pressure.target_agent_id,
                "type": pressure.pressure_type.as_str(),
                "magnitude": pressure.magnitude,
                "half_life_seconds": pressure.half_life_seconds,
                "created_at": pressure.created_at,
                "expires_at": pressure.expires_at,
                "credit_cost": pressure.credit_cost,
            }))
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn cancel_pressure_handler(
    State(state): State<Arc<ApiState>>,
    Path((sponsor_id, pressure_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    ox_influence::cancel_pressure(state.db.core(), sponsor_id, pressure_id, correlation(&headers))
        .await?;
    Ok(Json(json!({ "pressure_id": pressure_id, "cancelled": true })))
}

// =============================================================================
// Policies
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreatePolicyRequest {
    policy_type: String,
    rules: Value,
    cadence_seconds: i64,
}

async fn create_policy_handler(
    State(state): State<Arc<ApiState>>,
    Path(sponsor_id): Path<Uuid>,
    Json(body): Json<CreatePolicyRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let policy_id = ox_influence::create_policy(
        state.db.core(),
        sponsor_id,
        &body.policy_type,
        body.rules,
        body.cadence_seconds,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "policy_id": policy_id, "sponsor_id": sponsor_id })),
    ))
}

// =============================================================================
// Environment administration
// =============================================================================

#[derive(Debug, Deserialize)]
struct EnvironmentRequest {
    #[serde(default = "default_availability")]
    cognition_availability: String,
    #[serde(default)]
    max_throughput_per_minute: Option<i32>,
    #[serde(default = "default_throttle_factor")]
    throttle_factor: f64,
    #[serde(default)]
    active_window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    active_window_end: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

fn default_availability() -> String {
    "full".to_string()
}

fn default_throttle_factor() -> f64 {
    1.0
}

fn require_ops_role(headers: &HeaderMap) -> ApiResult<()> {
    // Placeholder gate; production integrates proper RBAC.
    let role = headers
        .get("x-ops-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if role != "ops" {
        return Err(ApiError::Forbidden("forbidden".to_string()));
    }
    Ok(())
}

async fn put_environment_handler(
    State(state): State<Arc<ApiState>>,
    Path(target): Path<String>,
    headers: HeaderMap,
    Json(body): Json<EnvironmentRequest>,
) -> ApiResult<Json<Value>> {
    require_ops_role(&headers)?;

    let availability = CognitionAvailability::parse(&body.cognition_availability)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if !(0.0..=10.0).contains(&body.throttle_factor) {
        return Err(ApiError::BadRequest(
            "throttle_factor must be within [0, 10]".to_string(),
        ));
    }

    let env_state = EnvironmentState {
        deployment_target: target.clone(),
        cognition_availability: availability,
        max_throughput_per_minute: body.max_throughput_per_minute,
        throttle_factor: body.throttle_factor,
        active_window_start: body.active_window_start,
        active_window_end: body.active_window_end,
        reason: body.reason.clone(),
        imposed_at: Utc::now(),
    };

    let pool = state.db.core();
    let mut tx = pool.begin().await.map_err(StoreError::from)?;
    environment::upsert_environment(&mut tx, &env_state).await?;

    let state_json =
        serde_json::to_value(&env_state).map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut event = Event::new(
        event_types::ENVIRONMENT_STATE_CHANGED,
        json!({ "deployment_target": target, "state": state_json }),
    )
    .with_actor("ops", None);
    if let Some(correlation_id) = correlation(&headers) {
        event = event.with_correlation_id(correlation_id);
    }
    persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;
    tx.commit().await.map_err(StoreError::from)?;

    Ok(Json(state_json))
}

async fn delete_environment_handler(
    State(state): State<Arc<ApiState>>,
    Path(target): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_ops_role(&headers)?;

    let pool = state.db.core();
    let mut tx = pool.begin().await.map_err(StoreError::from)?;
    let removed = environment::remove_environment(&mut tx, &target).await?;
    if !removed {
        return Err(ApiError::NotFound("environment state not found".to_string()));
    }

    let mut event = Event::new(
        event_types::ENVIRONMENT_STATE_REMOVED,
        json!({ "deployment_target": target }),
    )
    .with_actor("ops", None);
    if let Some(correlation_id) = correlation(&headers) {
        event = event.with_correlation_id(correlation_id);
    }
    persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;
    tx.commit().await.map_err(StoreError::from)?;

    Ok(Json(json!({ "deployment_target": target, "removed": true })))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        let err = ApiError::from(EngineError::InvalidArgument("invalid_action_type: x".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(EngineError::AgentNotFound(Uuid::now_v7()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_idempotency_conflict_is_409() {
        let err = ApiError::from(StoreError::IdempotencyConflict { key: "k".into() });
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_sponsor_shortfall_is_400_with_specific_error() {
        let err = ApiError::from(StoreError::InsufficientCredits {
            holder: "sponsor:123".into(),
            available: Decimal::ZERO,
            required: Decimal::ONE,
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_ops_gate() {
        let mut headers = HeaderMap::new();
        assert!(require_ops_role(&headers).is_err());

        headers.insert("x-ops-role", HeaderValue::from_static("viewer"));
        assert!(require_ops_role(&headers).is_err());

        headers.insert("x-ops-role", HeaderValue::from_static("ops"));
        assert!(require_ops_role(&headers).is_ok());
    }
}
