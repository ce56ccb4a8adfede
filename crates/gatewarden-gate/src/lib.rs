//! # gatewarden-gate
//!
//! Async runtime around the `gatewarden-core` engine: the per-request
//! [`Session`] state machine, the shared [`GateState`] orchestrator with its
//! sync cadence and pod monitor, the learning-backend client, and the axum
//! reverse proxy that hosts it all.

pub mod error;
pub mod pod;
pub mod proxy;
pub mod session;
pub mod state;
pub mod sync;

pub use error::{GateError, Result};
pub use session::Session;
pub use state::{GateState, GuardianView, SessionOutcome};
pub use sync::{AlertRecord, GuardianBackend, HttpBackend, LocalBackend};
