//! Error types for the OTP runtime

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the runtime
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Runtime stopped: {0}")]
    RuntimeStopped(String),

    #[error("Operation failed: {0}")]
    Other(String),
}

/// Failures coming back over the secret-holding bridge.
///
/// Every variant except `Decode` is converted into a per-entry `Invalid`
/// state at the coordinator boundary; none of them crosses the event loop
/// as an unhandled error. `Decode` belongs to the add-entry flow and never
/// reaches the scheduler.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Stored secret cannot produce a code: {0}")]
    InvalidSecret(String),

    #[error("No valid QR payload found: {0}")]
    Decode(String),

    #[error("Entry not found: {0}")]
    NotFound(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
