//! Error types for the gate runtime.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// The fixed, content-free security error returned to callers on both
    /// request and response paths. Internal Decision text never reaches the
    /// caller; it goes to the operator alert channel only.
    #[error("access blocked by gatewarden")]
    Blocked,
}

pub type Result<T> = std::result::Result<T, GateError>;
