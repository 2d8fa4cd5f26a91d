//! Unified error types for Fable

use thiserror::Error;

/// Unified error type for all Fable operations
#[derive(Error, Debug)]
pub enum FableError {
    // Completion gateway errors
    #[error("Completion gateway error: {0}")]
    Gateway(String),

    #[error("Completion service rate limit: {0}")]
    RateLimit(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Operation cancelled")]
    Cancelled,

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    // Ledger errors
    #[error("Ledger error: {0}")]
    Ledger(String),

    // Pipeline errors
    #[error("Revision error: {0}")]
    Revision(String),

    #[error("Review error: {0}")]
    Review(String),

    // Job errors
    #[error("Job error: {0}")]
    Job(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} is not resumable in status {1}")]
    JobNotResumable(String, String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using FableError
pub type Result<T> = std::result::Result<T, FableError>;
