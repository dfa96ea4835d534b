//! Event Querying

use crate::types::{Envelope, EventLogError, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Query options for reading events
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Filter by event type
    pub event_type: Option<String>,

    /// Filter by actor
    pub actor_id: Option<String>,

    /// Filter by correlation ID
    pub correlation_id: Option<Uuid>,

    /// Start time (inclusive)
    pub from_time: Option<DateTime<Utc>>,

    /// End time (exclusive)
    pub to_time: Option<DateTime<Utc>>,

    /// Limit results
    pub limit: Option<i64>,

    /// Descending by occurred_at (default ascending)
    pub descending: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from_time = Some(from);
        self.to_time = Some(to);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Fetch a single event by id.
pub async fn fetch_event(pool: &PgPool, event_id: Uuid) -> Result<Envelope> {
    let envelope: Option<Envelope> = sqlx::query_as(
        r#"
        SELECT event_id, event_type, occurred_at, actor_id, actor_generation,
               correlation_id, idempotency_key, payload, context
        FROM events
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await?;

    envelope.ok_or(EventLogError::EventNotFound(event_id))
}

/// Query events from the log with optional filters.
pub async fn query_events(pool: &PgPool, options: QueryOptions) -> Result<Vec<Envelope>> {
    let mut query = String::from(
        "SELECT event_id, event_type, occurred_at, actor_id, actor_generation, \
         correlation_id, idempotency_key, payload, context FROM events WHERE TRUE",
    );
    let mut bind_count = 0;

    if options.event_type.is_some() {
        bind_count += 1;
        query.push_str(&format!(" AND event_type = ${}", bind_count));
    }

    if options.actor_id.is_some() {
        bind_count += 1;
        query.push_str(&format!(" AND actor_id = ${}", bind_count));
    }

    if options.correlation_id.is_some() {
        bind_count += 1;
        query.push_str(&format!(" AND correlation_id = ${}", bind_count));
    }

    if options.from_time.is_some() {
        bind_count += 1;
        query.push_str(&format!(" AND occurred_at >= ${}", bind_count));
    }

    if options.to_time.is_some() {
        bind_count += 1;
        query.push_str(&format!(" AND occurred_at < ${}", bind_count));
    }

    let order = if options.descending { "DESC" } else { "ASC" };
    query.push_str(&format!(" ORDER BY occurred_at {order}, event_id {order}"));

    if options.limit.is_some() {
        bind_count += 1;
        query.push_str(&format!(" LIMIT ${}", bind_count));
    }

    let mut q = sqlx::query_as::<_, Envelope>(&query);

    if let Some(ref event_type) = options.event_type {
        q = q.bind(event_type);
    }
    if let Some(ref actor_id) = options.actor_id {
        q = q.bind(actor_id);
    }
    if let Some(correlation_id) = options.correlation_id {
        q = q.bind(correlation_id);
    }
    if let Some(from_time) = options.from_time {
        q = q.bind(from_time);
    }
    if let Some(to_time) = options.to_time {
        q = q.bind(to_time);
    }
    if let Some(limit) = options.limit {
        q = q.bind(limit);
    }

    Ok(q.fetch_all(pool).await?)
}
