//! Sponsor Influence Engine
//!
//! The credit-backed side of the substrate: sponsors purchase and allocate
//! credits, issue decaying pressures against deployments, and run periodic
//! policies over their agents. The physics tick folds active pressures into
//! per-deployment braid vectors.

pub mod braid;
pub mod credits;
pub mod error;
pub mod policy;
pub mod pressures;

pub use braid::{compose_braid, run_physics_tick, BraidVector, Interference};
pub use credits::{allocate, purchase};
pub use error::{InfluenceError, Result};
pub use policy::{create_policy, run_policy_sweep, SweepSummary};
pub use pressures::{cancel_pressure, issue_pressure, list_braidable};
