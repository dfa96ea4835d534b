//! Event Log Module
//!
//! Provides the append-only event log and its transactional outbox:
//! - Envelope construction with correlation/actor metadata
//! - Payload truncation at a hard 16 KiB cap
//! - `persist_event_tx` writes the event row and the outbox row in the
//!   caller's transaction; the event table is the durable truth, the outbox
//!   keeps at-least-once delivery honest when the broker is down
//! - `dispatch_outbox` drains due rows with exponential, jittered backoff
//!
//! # Usage
//!
//! ```rust,no_run
//! use ox_eventlog::{persist_event_tx, Event};
//! use ox_domain::events::{event_types, TOPIC_AGENTS};
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let mut tx = pool.begin().await?;
//!
//! let event = Event::new(
//!     event_types::ACTION_ACCEPTED,
//!     serde_json::json!({ "action_type": "communicate", "total_cost": 30 }),
//! )
//! .with_actor("agent:01HN...", Some(1));
//!
//! let envelope = persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod outbox;
pub mod persist;
pub mod publisher;
pub mod query;
pub mod truncate;
pub mod types;

pub use outbox::{dispatch_outbox, publish_backoff, OutboxRow};
pub use persist::{persist_event, persist_event_tx};
pub use publisher::{EventPublisher, PublishError};
pub use query::{fetch_event, query_events, QueryOptions};
pub use truncate::{truncate_payload, MAX_PAYLOAD_BYTES, TRUNCATION_MARKER};
pub use types::{Envelope, Event, EventLogError, Result};
