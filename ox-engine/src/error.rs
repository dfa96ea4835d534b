//! Engine error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the admission engine.
///
/// Capacity, environment, throttle, and cognition-pause refusals are NOT
/// errors; they come back as `accepted: false` responses. These variants
/// cover validation failures and infrastructure trouble only.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request (bad action type, negative cost, missing subject)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Agent does not exist
    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    /// Agent exists but is not active
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(Uuid),

    /// Admission transaction exceeded its wall-clock budget
    #[error("Admission timed out after {0} ms")]
    Timeout(u64),

    /// Store error passthrough
    #[error("Store error: {0}")]
    Store(#[from] ox_store::StoreError),

    /// Event log error passthrough
    #[error("Event log error: {0}")]
    EventLog(#[from] ox_eventlog::EventLogError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
