//! Error types for the Turnstile service.
//!
//! Throttling is not an error: a rejected request is an ordinary
//! [`Decision`](crate::ratelimit::Decision). These errors cover setup and
//! serving failures only.

use thiserror::Error;

use crate::mesh::ClusterError;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid or unparseable policy tables
    #[error("Policy error: {0}")]
    Policy(String),

    /// Cluster membership errors
    #[error("Mesh error: {0}")]
    Mesh(#[from] ClusterError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for TurnstileError {
    fn from(err: ::config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
