//! Event publisher port.
//!
//! The substrate emits to named topics through this trait; the daemon wires
//! in an in-process broadcast broker, production replicas would wire a real
//! one. The outbox keeps delivery at-least-once either way.

use crate::types::Envelope;
use async_trait::async_trait;

/// Port for publishing committed events to a topic.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one envelope. Failures are retried by the outbox dispatcher
    /// with backoff; implementations must not retry internally.
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), PublishError>;
}

/// Publisher errors
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Topic rejected publish: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
