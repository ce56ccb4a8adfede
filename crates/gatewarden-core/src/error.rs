//! Error types for the gatewarden core engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported profile input: {0}")]
    UnsupportedInput(String),

    #[error("malformed criteria document: {0}")]
    MalformedCriteria(String),

    #[error("deserialization error: {0}")]
    DeserializeError(#[from] serde_json::Error),

    #[error("settings parse error: {0}")]
    SettingsError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
