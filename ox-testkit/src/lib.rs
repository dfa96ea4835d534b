//! Test helpers for OX substrate integration tests.
//!
//! Seeding functions for agents, wallets, and events, plus envelope
//! builders for feeding the materializer directly.

mod helpers;

pub use helpers::{
    make_action_envelope, make_envelope, seed_agent, seed_wallet, ActionEnvelopeOptions,
};

/// Result type for test helpers.
pub type Result<T> = std::result::Result<T, anyhow::Error>;
