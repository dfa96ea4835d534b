//! Storage layer for the OX substrate.
//!
//! Repository modules over PostgreSQL. Mutual exclusion comes from row
//! locks (`SELECT ... FOR UPDATE`), never process-local locks; replicas
//! share nothing but the database and the broker.

pub mod agents;
pub mod capacity;
pub mod credits;
pub mod db;
pub mod environment;
pub mod error;
pub mod error_inbox;
pub mod idempotency;
pub mod localities;
pub mod observer_log;
pub mod throughput;

pub use db::Db;
pub use error::{Result, StoreError};
pub use idempotency::with_idempotency;
