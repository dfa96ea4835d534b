//! Event payload types for projection handlers.
//!
//! Payloads on the wire are open maps; these are the shapes the handlers
//! actually rely on. Anything that fails to parse is an InvalidPayload for
//! known types and pass-through for unknown ones.

use crate::error::{ProjectionError, Result};
use ox_domain::events::event_types;
use ox_eventlog::Envelope;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of the three action event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEventPayload {
    pub action_type: String,
    pub requested_cost: i64,
    #[serde(default)]
    pub estimated_cost: i64,
    #[serde(default)]
    pub total_cost: i64,
    #[serde(default)]
    pub subject_agent_id: Option<Uuid>,
    pub deployment_target: String,
    pub balance_before: i64,
    pub balance_after: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub cognition: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload of `ox.artifact.implicates_agent`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImplicationPayload {
    pub action_event_id: Uuid,
    pub issuing_agent_id: Uuid,
    pub subject_agent_id: Uuid,
    pub implication_type: String,
}

/// Payload of environment administration events.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentChangePayload {
    pub deployment_target: String,
    #[serde(default)]
    pub state: Option<serde_json::Value>,
}

/// Known event shapes the materializer dispatches on; everything else is
/// `Unknown` and passes through as a live event only.
#[derive(Debug)]
pub enum KnownEvent {
    ActionAccepted(ActionEventPayload),
    ActionRejected(ActionEventPayload),
    ActionRejectedEnvironment(ActionEventPayload),
    ArtifactIssued,
    ArtifactImplicatesAgent(ImplicationPayload),
    EnvironmentChanged(EnvironmentChangePayload),
    EnvironmentRemoved(EnvironmentChangePayload),
    Unknown,
}

impl KnownEvent {
    pub fn parse(envelope: &Envelope) -> Result<Self> {
        let parse_action = || -> Result<ActionEventPayload> {
            serde_json::from_value(envelope.payload.clone()).map_err(|e| {
                ProjectionError::InvalidPayload {
                    event_type: envelope.event_type.clone(),
                    reason: e.to_string(),
                }
            })
        };

        Ok(match envelope.event_type.as_str() {
            event_types::ACTION_ACCEPTED => Self::ActionAccepted(parse_action()?),
            event_types::ACTION_REJECTED => Self::ActionRejected(parse_action()?),
            event_types::ACTION_REJECTED_ENVIRONMENT => {
                Self::ActionRejectedEnvironment(parse_action()?)
            }
            event_types::ARTIFACT_ISSUED => Self::ArtifactIssued,
            event_types::ARTIFACT_IMPLICATES_AGENT => Self::ArtifactImplicatesAgent(
                serde_json::from_value(envelope.payload.clone()).map_err(|e| {
                    ProjectionError::InvalidPayload {
                        event_type: envelope.event_type.clone(),
                        reason: e.to_string(),
                    }
                })?,
            ),
            event_types::ENVIRONMENT_STATE_CHANGED => Self::EnvironmentChanged(
                serde_json::from_value(envelope.payload.clone()).map_err(|e| {
                    ProjectionError::InvalidPayload {
                        event_type: envelope.event_type.clone(),
                        reason: e.to_string(),
                    }
                })?,
            ),
            event_types::ENVIRONMENT_STATE_REMOVED => Self::EnvironmentRemoved(
                serde_json::from_value(envelope.payload.clone()).map_err(|e| {
                    ProjectionError::InvalidPayload {
                        event_type: envelope.event_type.clone(),
                        reason: e.to_string(),
                    }
                })?,
            ),
            _ => Self::Unknown,
        })
    }
}

/// The agent that emitted an envelope, when the actor is an agent.
pub fn actor_agent_id(envelope: &Envelope) -> Option<Uuid> {
    envelope.actor_id.as_deref().and_then(|s| s.parse().ok())
}

/// Sponsor attribution carried in the event context, if any.
pub fn context_sponsor_id(envelope: &Envelope) -> Option<Uuid> {
    envelope
        .context
        .as_ref()
        .and_then(|c| c.get("sponsor_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// Truncate a string to at most `max` bytes on a char boundary.
pub fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_respects_char_boundaries() {
        assert_eq!(clip("hello", 10), "hello");
        assert_eq!(clip("hello", 3), "hel");
        // 'é' is two bytes; clipping inside it backs off
        let s = "ééé";
        assert_eq!(clip(s, 3), "é");
    }
}
