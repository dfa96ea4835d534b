//! Event dispatcher for projections.
//!
//! Routes each envelope to the handlers that derive read-model rows from
//! it. Unknown event types are pass-through: materialized as live events,
//! logged at debug, never an error.

use crate::error::Result;
use crate::handlers;
use crate::types::KnownEvent;
use ox_eventlog::Envelope;
use sqlx::PgPool;
use tracing::debug;

/// Apply a single event to all relevant projection tables.
///
/// Idempotent and safe for replay; handlers use `ON CONFLICT
/// (source_event_id) DO NOTHING` or recompute aggregates from tables that
/// already dedupe.
pub async fn apply_event_to_projections(pool: &PgPool, envelope: &Envelope) -> Result<()> {
    // Every envelope lands in live_events first; session derivation reads
    // recent live activity, so ordering matters.
    handlers::live::materialize(pool, envelope).await?;

    match KnownEvent::parse(envelope)? {
        KnownEvent::ActionAccepted(action) => {
            handlers::capacity::record_timeline(pool, envelope, &action).await?;
            handlers::sessions::apply_action(pool, envelope, &action).await?;
            handlers::patterns::update_window(pool, envelope, &action).await?;
            handlers::artifacts::derive(pool, envelope, &action).await?;
        }
        KnownEvent::ActionRejected(action) => {
            handlers::capacity::record_timeline(pool, envelope, &action).await?;
            handlers::sessions::apply_action(pool, envelope, &action).await?;
            handlers::patterns::update_window(pool, envelope, &action).await?;
        }
        KnownEvent::ActionRejectedEnvironment(action) => {
            handlers::capacity::record_timeline(pool, envelope, &action).await?;
            handlers::sessions::apply_action(pool, envelope, &action).await?;
            handlers::patterns::update_window(pool, envelope, &action).await?;
            handlers::environment::record_rejection(pool, envelope, &action).await?;
        }
        KnownEvent::ArtifactIssued => {
            // The artifact row derives from the action event itself; the
            // issued event is observable as a live event only.
        }
        KnownEvent::ArtifactImplicatesAgent(_) => {
            // Same: the implication row is written with the artifact.
        }
        KnownEvent::EnvironmentChanged(change) => {
            handlers::environment::record_change(pool, envelope, &change, "state_changed").await?;
        }
        KnownEvent::EnvironmentRemoved(change) => {
            handlers::environment::record_change(pool, envelope, &change, "state_removed").await?;
        }
        KnownEvent::Unknown => {
            debug!(event_type = %envelope.event_type, "Pass-through event type");
        }
    }

    Ok(())
}
