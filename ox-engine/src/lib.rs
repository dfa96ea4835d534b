//! Agent Action Engine
//!
//! Single entry point for action admission. One serializable-equivalent
//! transaction per attempt, with the capacity row lock as the mutual
//! exclusion point:
//!
//! 1. validate type and cost shape
//! 2. load agent
//! 3. idempotency short-circuit from the action log
//! 4. environment gate (window, cognition availability, throughput)
//! 5. lock + reconcile capacity
//! 6. compose cost (requested + provider estimate)
//! 7. throttle check
//! 8. admission decision
//! 9. bounded cognition execution
//! 10. persist event, action log, artifact events
//! 11. throughput counter
//! 12. commit
//!
//! Capacity and environment refusals are signal, not errors: they commit an
//! event and return `accepted: false`. Only validation and infrastructure
//! failures surface as `EngineError`.

pub mod attempt;
pub mod error;

pub use attempt::{ActionEngine, AttemptRequest, AttemptResponse, EngineConfig};
pub use error::{EngineError, Result};
