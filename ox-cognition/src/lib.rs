//! Cognition provider layer.
//!
//! Ports define the interface to cognition backends; adapters implement
//! them (stub for tests, HTTP for a real inference collaborator). The
//! admission engine only sees the port: estimation is pure and free,
//! execution is bounded and may signal `Paused`.

pub mod error;
pub mod http;
pub mod ports;
pub mod registry;
pub mod stub;

pub use error::CognitionError;
pub use http::HttpCognition;
pub use ports::{CognitionContext, CognitionOutcome, CognitionProvider, NONE_PROVIDER};
pub use registry::ProviderRegistry;
pub use stub::StubCognition;
