//! Client error types

use thiserror::Error;

/// Errors raised by collaborator RPCs
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc failed with status {status}: {body}")]
    Rpc { status: u16, body: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
