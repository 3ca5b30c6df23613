//! Common error types for the analytics services

use thiserror::Error;

/// Common result type for analytics operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the analytics crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error (properties columns, model bundles)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not enough rows to fit or evaluate a model
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
