//! Daemon error types.

use ox_engine::EngineError;
use ox_eventlog::EventLogError;
use ox_influence::InfluenceError;
use ox_projector::ProjectionError;
use ox_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Influence engine error
    #[error("Influence error: {0}")]
    Influence(#[from] InfluenceError),

    /// Event log error
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// Projection error
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
