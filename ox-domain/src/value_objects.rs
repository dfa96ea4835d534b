//! Value Objects for the OX Substrate Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    /// Action type not in the admission taxonomy
    #[error("invalid_action_type: {0}")]
    InvalidActionType(String),

    /// Magnitude outside [-100, 100]
    #[error("Invalid magnitude: {0}")]
    InvalidMagnitude(String),

    /// Half-life below the 60 second floor
    #[error("Invalid half-life: {0}")]
    InvalidHalfLife(String),

    /// Bias value outside [-1, 1]
    #[error("Invalid bias: {0}")]
    InvalidBias(String),

    /// Caller-supplied argument is malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lifecycle transition not permitted
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// Action taxonomy
// =============================================================================

/// Validated action types accepted by the admission engine.
///
/// The last four are *implicating*: they name a second agent as subject and
/// produce an artifact implication linking issuer to subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Communicate,
    Associate,
    Create,
    Exchange,
    Conflict,
    Withdraw,
    Critique,
    CounterModel,
    Refusal,
    Rederivation,
}

impl ActionType {
    /// Parse a raw action type string.
    ///
    /// Input is trimmed and lowercased before matching; anything outside the
    /// taxonomy is rejected.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.trim().to_lowercase().as_str() {
            "communicate" => Ok(Self::Communicate),
            "associate" => Ok(Self::Associate),
            "create" => Ok(Self::Create),
            "exchange" => Ok(Self::Exchange),
            "conflict" => Ok(Self::Conflict),
            "withdraw" => Ok(Self::Withdraw),
            "critique" => Ok(Self::Critique),
            "counter_model" => Ok(Self::CounterModel),
            "refusal" => Ok(Self::Refusal),
            "rederivation" => Ok(Self::Rederivation),
            other => Err(DomainError::InvalidActionType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Communicate => "communicate",
            Self::Associate => "associate",
            Self::Create => "create",
            Self::Exchange => "exchange",
            Self::Conflict => "conflict",
            Self::Withdraw => "withdraw",
            Self::Critique => "critique",
            Self::CounterModel => "counter_model",
            Self::Refusal => "refusal",
            Self::Rederivation => "rederivation",
        }
    }

    /// Implicating actions require a subject agent.
    pub fn is_implicating(&self) -> bool {
        matches!(
            self,
            Self::Critique | Self::CounterModel | Self::Refusal | Self::Rederivation
        )
    }

    /// Escalations may open a session on their own.
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Conflict | Self::Withdraw)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Agent lifecycle
// =============================================================================

/// Agent lifecycle state. Archival is one-way within a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Archived,
}

impl AgentStatus {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown agent status: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

/// Throttle profile applied to an agent's admission decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleProfile {
    Normal,
    Conservative,
    Aggressive,
    Paused,
}

impl ThrottleProfile {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "normal" => Ok(Self::Normal),
            "conservative" => Ok(Self::Conservative),
            "aggressive" => Ok(Self::Aggressive),
            "paused" => Ok(Self::Paused),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown throttle profile: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Conservative => "conservative",
            Self::Aggressive => "aggressive",
            Self::Paused => "paused",
        }
    }
}

// =============================================================================
// Pressure typing
// =============================================================================

/// The four braid components a pressure can push on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureType {
    Capacity,
    Throttle,
    Cognition,
    RedeployBias,
}

impl PressureType {
    pub const ALL: [PressureType; 4] = [
        Self::Capacity,
        Self::Throttle,
        Self::Cognition,
        Self::RedeployBias,
    ];

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "capacity" => Ok(Self::Capacity),
            "throttle" => Ok(Self::Throttle),
            "cognition" => Ok(Self::Cognition),
            "redeploy_bias" => Ok(Self::RedeployBias),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown pressure type: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Throttle => "throttle",
            Self::Cognition => "cognition",
            Self::RedeployBias => "redeploy_bias",
        }
    }
}

/// Pressure magnitude, validated to [-100, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Magnitude(f64);

impl Magnitude {
    pub fn new(value: f64) -> Result<Self, DomainError> {
        if !value.is_finite() || !(-100.0..=100.0).contains(&value) {
            return Err(DomainError::InvalidMagnitude(format!(
                "magnitude must be within [-100, 100], got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }
}

/// Pressure half-life in seconds, floored at 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalfLife(i64);

impl HalfLife {
    pub fn new(seconds: i64) -> Result<Self, DomainError> {
        if seconds < 60 {
            return Err(DomainError::InvalidHalfLife(format!(
                "half_life_seconds must be >= 60, got {seconds}"
            )));
        }
        Ok(Self(seconds))
    }

    pub fn as_seconds(&self) -> i64 {
        self.0
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Availability of cognition in a deployment target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitionAvailability {
    Full,
    Degraded,
    Unavailable,
}

impl CognitionAvailability {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "full" => Ok(Self::Full),
            "degraded" => Ok(Self::Degraded),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown cognition availability: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }
}

// =============================================================================
// Observer roles
// =============================================================================

/// Observer roles, ordered: viewer < analyst < auditor.
///
/// Endpoint checks are `observer_role >= required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverRole {
    Viewer,
    Analyst,
    Auditor,
}

impl ObserverRole {
    /// Parse a role header value; anything unknown falls back to viewer.
    pub fn parse_or_viewer(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "analyst" => Self::Analyst,
            "auditor" => Self::Auditor,
            _ => Self::Viewer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Analyst => "analyst",
            Self::Auditor => "auditor",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_parse_normalizes() {
        assert_eq!(ActionType::parse("  Communicate "), Ok(ActionType::Communicate));
        assert_eq!(ActionType::parse("COUNTER_MODEL"), Ok(ActionType::CounterModel));
        assert!(ActionType::parse("dance").is_err());
    }

    #[test]
    fn test_implicating_set() {
        for t in ["critique", "counter_model", "refusal", "rederivation"] {
            assert!(ActionType::parse(t).unwrap().is_implicating());
        }
        assert!(!ActionType::Communicate.is_implicating());
        assert!(!ActionType::Conflict.is_implicating());
    }

    #[test]
    fn test_escalation_set() {
        assert!(ActionType::Conflict.is_escalation());
        assert!(ActionType::Withdraw.is_escalation());
        assert!(!ActionType::Create.is_escalation());
    }

    #[test]
    fn test_magnitude_bounds() {
        assert!(Magnitude::new(100.0).is_ok());
        assert!(Magnitude::new(-100.0).is_ok());
        assert!(Magnitude::new(100.01).is_err());
        assert!(Magnitude::new(f64::NAN).is_err());
    }

    #[test]
    fn test_half_life_floor() {
        assert!(HalfLife::new(60).is_ok());
        assert!(HalfLife::new(59).is_err());
    }

    #[test]
    fn test_observer_role_ordering() {
        assert!(ObserverRole::Viewer < ObserverRole::Analyst);
        assert!(ObserverRole::Analyst < ObserverRole::Auditor);
        assert!(ObserverRole::Auditor >= ObserverRole::Viewer);
    }

    #[test]
    fn test_observer_role_parse_defaults_to_viewer() {
        assert_eq!(ObserverRole::parse_or_viewer("auditor"), ObserverRole::Auditor);
        assert_eq!(ObserverRole::parse_or_viewer("root"), ObserverRole::Viewer);
        assert_eq!(ObserverRole::parse_or_viewer(""), ObserverRole::Viewer);
    }
}
