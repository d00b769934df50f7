//! Error types for taskwarden.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Completion worker errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("completion queue is full (waited {waited:?})")]
    QueueFull { waited: Duration },

    #[error("worker is not running")]
    Stopped,

    #[error("worker already started")]
    AlreadyStarted,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
