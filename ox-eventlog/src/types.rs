//! Event Log Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Event envelope as persisted and published.
///
/// This is the wire shape for both topics; consumers must tolerate unknown
/// `event_type` values.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Envelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,

    // Actor
    pub actor_id: Option<String>,
    pub actor_generation: Option<i32>,

    // Correlation
    pub correlation_id: Option<Uuid>,
    pub idempotency_key: Option<String>,

    // Data
    pub payload: serde_json::Value,
    pub context: Option<serde_json::Value>,
}

/// Builder for events prior to persistence.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub actor_generation: Option<i32>,
    pub correlation_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub context: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            occurred_at: Utc::now(),
            actor_id: None,
            actor_generation: None,
            correlation_id: None,
            idempotency_key: None,
            context: None,
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>, generation: Option<i32>) -> Self {
        self.actor_id = Some(actor_id.into());
        self.actor_generation = generation;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Event log errors
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Duplicate event: {0}")]
    DuplicateEvent(Uuid),

    #[error("Publish failed: {0}")]
    Publish(#[from] crate::publisher::PublishError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventLogError>;
