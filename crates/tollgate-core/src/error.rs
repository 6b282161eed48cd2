//! Error types for Tollgate
//!
//! `TollgateError` covers configuration, I/O and serialization failures that
//! happen outside a single invocation. The resilience primitives each return
//! their own typed errors (see `recovery`), aggregated per invocation by
//! [`crate::pipeline::PipelineError`].

use thiserror::Error;

/// Result type alias for Tollgate operations
pub type TollgateResult<T> = Result<T, TollgateError>;

/// Main error type for Tollgate
#[derive(Error, Debug, Clone)]
pub enum TollgateError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON/YAML/TOML serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl TollgateError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a new generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Returned when a cancellation token fires before or during an operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("operation was cancelled")]
pub struct Cancelled;

impl From<std::io::Error> for TollgateError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for TollgateError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(format!("json: {}", error))
    }
}

impl From<serde_yaml::Error> for TollgateError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization(format!("yaml: {}", error))
    }
}

impl From<toml::de::Error> for TollgateError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(format!("toml: {}", error))
    }
}
