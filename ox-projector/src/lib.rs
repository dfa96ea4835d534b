//! OX Projection Materializer
//!
//! Applies committed events to the read-model tables. This is the read side
//! of the substrate: sessions, patterns, artifacts, capacity timelines,
//! environment history, and narrative frames are all derived here and only
//! here.
//!
//! Every handler is safe for at-least-once delivery: single-event rows key
//! on `source_event_id` with `ON CONFLICT DO NOTHING`, aggregates are
//! recomputed from already-idempotent tables.

pub mod apply;
pub mod error;
pub mod handlers;
pub mod types;

pub use apply::apply_event_to_projections;
pub use error::{ProjectionError, Result};
