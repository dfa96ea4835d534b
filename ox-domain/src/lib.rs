//! OX Substrate Domain Layer
//!
//! Validated domain primitives and entities for the agent simulation
//! substrate. Everything here is pure: no I/O, no clocks other than the
//! instants callers pass in.
//!
//! # Key Concepts
//!
//! - **Action admission** is decided against capacity, environment, and
//!   throttle state; the taxonomy of actions lives in [`ActionType`].
//! - **Pressures** are credit-backed influences with exponential decay;
//!   the decay curve is pure math in [`pressure`].
//! - **Policies** are ordered predicate/action rules evaluated against a
//!   `{agent, env}` context document; evaluation is pure in [`policy`].

pub mod entities;
pub mod events;
pub mod policy;
pub mod pressure;
pub mod value_objects;

pub use entities::{
    Agent, AgentCapacity, AgentConfig, AgentId, EnvironmentState, Locality, LocalityMembership,
    SponsorId,
};
pub use policy::{evaluate_rules, Predicate, PredicateOp, PolicyAction, PolicyRule, RuleMatch};
pub use pressure::{pressure_credit_cost, Pressure};
pub use value_objects::{
    ActionType, AgentStatus, CognitionAvailability, DomainError, HalfLife, Magnitude,
    ObserverRole, PressureType, ThrottleProfile,
};
