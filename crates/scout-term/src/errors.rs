//! Error types for the terminal gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The caller could not be authenticated. Rejected before any upgrade.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing session cookie")]
    MissingCookie,
    #[error("invalid session token: {0}")]
    InvalidToken(String),
}

/// The pseudo-terminal or its child process could not be created.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to open PTY: {0}")]
    OpenPty(String),
    #[error("failed to spawn command `{command}`: {reason}")]
    Command { command: String, reason: String },
    #[error("failed to set up PTY I/O: {0}")]
    Io(String),
}

/// Errors from operations on a live pseudo-terminal handle.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("process not running")]
    NotRunning,
    #[error("PTY resize failed: {0}")]
    ResizeFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no terminal session for {0}")]
    NoSession(String),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// A client frame that could not be understood. Dropped, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Errors surfaced by the HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
