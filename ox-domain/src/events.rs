//! Event type names and topics.
//!
//! Consumers key off `event_type` strings; the accepted/rejected outcome is
//! encoded in the type itself, not just the payload. Unknown types must be
//! treated as pass-through.

/// Topic carrying agent action and lifecycle events.
pub const TOPIC_AGENTS: &str = "events.agents.v1";

/// Topic carrying physics tick output (braid vectors, interference).
pub const TOPIC_PHYSICS: &str = "events.ox-physics.v1";

pub mod event_types {
    // Admission outcomes
    pub const ACTION_ACCEPTED: &str = "agent.action_accepted";
    pub const ACTION_REJECTED: &str = "agent.action_rejected";
    pub const ACTION_REJECTED_ENVIRONMENT: &str = "agent.action_rejected.environment";

    // Artifacts emitted alongside accepted actions
    pub const ARTIFACT_ISSUED: &str = "ox.artifact.issued";
    pub const ARTIFACT_IMPLICATES_AGENT: &str = "ox.artifact.implicates_agent";

    // Agent lifecycle
    pub const AGENT_CREATED: &str = "agent.created";
    pub const AGENT_ARCHIVED: &str = "agent.archived";
    pub const AGENT_REDEPLOYED: &str = "agent.redeployed";
    pub const AGENT_SPONSOR_CHANGED: &str = "agent.sponsor_changed";
    pub const AGENT_CONFIG_CHANGED: &str = "agent.config_changed";
    pub const AGENT_CAPACITY_ALLOCATED: &str = "agent.capacity_allocated";

    // Sponsor economy
    pub const CREDITS_PURCHASED: &str = "sponsor.credits_purchased";
    pub const CREDITS_ALLOCATED: &str = "sponsor.credits_allocated";
    pub const PRESSURE_ISSUED: &str = "sponsor.pressure_issued";
    pub const PRESSURE_CANCELLED: &str = "sponsor.pressure_cancelled";

    // Policy sweep outcomes
    pub const POLICY_APPLIED: &str = "agent.sponsor_policy_applied";
    pub const POLICY_SKIPPED: &str = "agent.sponsor_policy_skipped";

    // Environment administration
    pub const ENVIRONMENT_STATE_CHANGED: &str = "environment.state_changed";
    pub const ENVIRONMENT_STATE_REMOVED: &str = "environment.state_removed";

    // Physics
    pub const BRAID_COMPUTED: &str = "physics.braid_computed";
}

/// Machine-readable rejection reasons returned by the admission engine.
pub mod rejection_reasons {
    pub const OUTSIDE_ACTIVE_WINDOW: &str = "environment_outside_active_window";
    pub const COGNITION_UNAVAILABLE: &str = "environment_cognition_unavailable";
    pub const THROUGHPUT_EXCEEDED: &str = "environment_throughput_exceeded";
    pub const THROTTLE_PAUSED: &str = "throttle_paused";
    pub const INSUFFICIENT_CAPACITY: &str = "insufficient_capacity";
    pub const COGNITION_PAUSED: &str = "cognition_paused";
}
