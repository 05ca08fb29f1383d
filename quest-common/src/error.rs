//! Common error types for the questionnaire serving core

use thiserror::Error;

/// Common result type for quest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the serving core.
///
/// `Config` and `Integrity` are fatal to the operation that raised them and
/// must never be swallowed; `NotFound` is an ordinary negative result that
/// request handlers translate into a miss. An exhausted sampler is not an
/// error at all and is signalled as `Ok(None)` by the sampling operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Durable records or the query index are corrupt or inconsistent
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
