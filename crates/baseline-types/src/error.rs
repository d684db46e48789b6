//! Domain error types

use thiserror::Error;

/// Errors raised by domain-level validation and state transitions
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for domain operations
pub type Result<T> = std::result::Result<T, DomainError>;
