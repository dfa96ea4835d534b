//! Cognition layer errors.

use thiserror::Error;

/// Errors surfaced by cognition providers.
///
/// `Paused` is a typed signal, not a failure: the engine flips the admission
/// to a rejection without deducting capacity. Every other variant is
/// swallowed by the engine, which proceeds with the base cost only.
#[derive(Debug, Error)]
pub enum CognitionError {
    /// Provider has paused this agent's cognition
    #[error("Provider paused cognition")]
    Paused,

    /// Execution exceeded the per-request deadline
    #[error("Cognition timed out after {0} ms")]
    Timeout(u64),

    /// Provider returned a malformed response
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Transport failure reaching the provider
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    /// Provider name not present in the registry
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}
