//! Error types for the proxy daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use baseline_types::DomainError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server error: {0}")]
    Server(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("external rpc failed: {0}")]
    ExternalRpc(#[from] baseline_clients::ClientError),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("proof rejected by prover: {0}")]
    ProofRejected(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors surfaced at the HTTP edge
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("not implemented")]
    Unimplemented,

    /// Validation failures rendered as a 422 with an error list
    #[error("validation failed")]
    Validation(Vec<String>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(vec![message.into()])
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Domain(DomainError::NotFound(msg)) => ApiError::NotFound(msg),
            ProxyError::Domain(DomainError::Validation(msg)) => ApiError::validation(msg),
            ProxyError::Domain(DomainError::StateConflict(msg)) => ApiError::Conflict(msg),
            ProxyError::Domain(err) => ApiError::validation(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::from(ProxyError::Domain(err))
    }
}

/// Error response body rendered by the HTTP edge
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, errors) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, vec!["unauthorized".into()]),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, vec!["forbidden".into()]),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, vec![msg]),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, vec![msg]),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, vec![msg]),
            ApiError::Unimplemented => (StatusCode::NOT_IMPLEMENTED, vec!["not implemented".into()]),
            ApiError::Validation(errors) => (StatusCode::UNPROCESSABLE_ENTITY, errors),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, vec![msg]),
        };

        (status, Json(ErrorResponse { errors })).into_response()
    }
}

/// Result type for HTTP handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;
