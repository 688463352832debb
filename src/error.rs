//! Error types for the Mealmatch gateway.

use thiserror::Error;

/// Main error type for Mealmatch operations.
///
/// Exceeding a rate limit is not represented here: it is a normal
/// [`Decision`](crate::ratelimit::Decision) with `allowed == false`.
#[derive(Error, Debug)]
pub enum MealmatchError {
    /// Configuration loading or parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller passed an unusable limit, period or key
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfiguration(String),

    /// The shared counter store could not be reached or the batch failed
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for MealmatchError {
    fn from(err: redis::RedisError) -> Self {
        MealmatchError::StoreUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for MealmatchError {
    fn from(err: config::ConfigError) -> Self {
        MealmatchError::Config(err.to_string())
    }
}

/// Result type alias for Mealmatch operations.
pub type Result<T> = std::result::Result<T, MealmatchError>;
