//! In-process event broker.
//!
//! Topic-keyed tokio broadcast channels behind the `EventPublisher` port.
//! Replicas in production swap in a real broker; the outbox keeps delivery
//! at-least-once in both cases. Consumers must subscribe before the outbox
//! dispatcher starts, or early publishes fan out to nobody.

use async_trait::async_trait;
use ox_eventlog::{Envelope, EventPublisher, PublishError};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

/// Broker with one broadcast channel per topic, created on demand.
pub struct EventBroker {
    topics: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
    capacity: usize,
}

impl EventBroker {
    /// Create a broker; `capacity` bounds each topic's buffer before slow
    /// receivers start lagging.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to a topic. Receives events published after this call.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope> {
        self.sender(topic).subscribe()
    }

    /// Receivers currently attached to a topic.
    pub fn receiver_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .expect("broker lock poisoned")
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Envelope> {
        if let Some(sender) = self.topics.read().expect("broker lock poisoned").get(topic) {
            return sender.clone();
        }

        let mut topics = self.topics.write().expect("broker lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for EventBroker {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), PublishError> {
        // send() errs when there are no receivers; for an in-process broker
        // that just means nobody is watching this topic yet.
        let delivered = self.sender(topic).send(envelope.clone()).unwrap_or(0);
        trace!(topic, event_id = %envelope.event_id, delivered, "Broker publish");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope() -> Envelope {
        Envelope {
            event_id: Uuid::now_v7(),
            event_type: "agent.action_accepted".to_string(),
            occurred_at: Utc::now(),
            actor_id: None,
            actor_generation: None,
            correlation_id: None,
            idempotency_key: None,
            payload: json!({}),
            context: None,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let broker = EventBroker::new(16);
        let mut rx = broker.subscribe("events.agents.v1");

        let env = envelope();
        broker.publish("events.agents.v1", &env).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, env.event_id);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let broker = EventBroker::new(16);
        let mut agents = broker.subscribe("events.agents.v1");

        broker.publish("events.ox-physics.v1", &envelope()).await.unwrap();

        assert!(agents.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_receivers_is_ok() {
        let broker = EventBroker::new(16);
        assert!(broker.publish("events.agents.v1", &envelope()).await.is_ok());
    }
}
