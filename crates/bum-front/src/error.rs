//! Error types for the HTTP front.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bum_protocol::{RpcError, Status};
use thiserror::Error;
use tracing::warn;

/// Result type for front operations.
pub type FrontResult<T> = Result<T, FrontError>;

/// Errors raised while answering HTTP requests or running the front.
#[derive(Debug, Error)]
pub enum FrontError {
    /// The coordinator answered with a non-OK status.
    #[error("coordinator replied {0}")]
    Coordinator(Status),

    /// The exchange with the coordinator failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The coordinator's reply could not be decoded.
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The HTTP listener failed.
    #[error("http server error: {0}")]
    Io(#[from] io::Error),
}

impl FrontError {
    /// HTTP status used when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Coordinator(status) => {
                StatusCode::from_u16(status.http_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Rpc(_) => StatusCode::BAD_GATEWAY,
            Self::Malformed(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FrontError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        code.into_response()
    }
}

/// Turns a non-OK coordinator status into an error.
pub(crate) fn check(status: Status) -> FrontResult<()> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(FrontError::Coordinator(status))
    }
}
