//! Influence engine errors.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InfluenceError {
    /// Amount must be strictly positive
    #[error("amount must be positive")]
    NonPositiveAmount,

    /// Pressure does not exist or belongs to another sponsor
    #[error("Pressure not found: {0}")]
    PressureNotFound(Uuid),

    /// Policy does not exist
    #[error("Policy not found: {0}")]
    PolicyNotFound(Uuid),

    /// Policy rules failed to parse
    #[error("Invalid policy rules: {0}")]
    InvalidRules(String),

    /// Domain validation passthrough
    #[error("Domain error: {0}")]
    Domain(#[from] ox_domain::DomainError),

    /// Store error passthrough
    #[error("Store error: {0}")]
    Store(#[from] ox_store::StoreError),

    /// Event log error passthrough
    #[error("Event log error: {0}")]
    EventLog(#[from] ox_eventlog::EventLogError),
}

pub type Result<T> = std::result::Result<T, InfluenceError>;
