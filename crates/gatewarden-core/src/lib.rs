//! # gatewarden-core
//!
//! Behavioral-anomaly detection engine for an HTTP-intercepting gate.
//!
//! This crate holds the pure computation: the Profile/Pile/Criteria value
//! triad, the per-kind learning algorithms (bucketed ranges, token sets,
//! string fingerprints, CIDR generalization, map and JSON schema learning),
//! the fixed HTTP-exchange schema tree composing them, the Decision report
//! type, and the persisted Guardian document. Nothing here blocks, performs
//! IO on the request path, or stores raw payloads -- profiles are
//! irreversible statistical summaries.
//!
//! The async gate runtime that drives this engine lives in `gatewarden-gate`.

pub mod decision;
pub mod error;
pub mod guardian;
pub mod profile;
pub mod schema;
pub mod settings;

pub use decision::{Decision, DecisionBuilder};
pub use error::{CoreError, Result};
pub use guardian::{Control, Guardian};
pub use settings::GateSettings;
