//! Coordinator error types.

use std::io;

use bum_protocol::Status;
use thiserror::Error;

/// Result type for coordinator operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Faults raised while handling a request or starting the coordinator.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (filesystem, subprocess pipes).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Channel fault.
    #[error("Protocol error: {0}")]
    Protocol(#[from] bum_protocol::ProtocolError),

    /// No song, album or file with that name.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// The path escapes the served directory or cannot be opened.
    #[error("Access denied: {path}")]
    Denied { path: String },

    /// A request body that could not be decoded.
    #[error("Malformed request: {message}")]
    BadRequest { message: String },

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    /// A reply body that would not fit in one frame.
    #[error("Reply too large: {size} bytes (max: {max})")]
    ReplyTooLarge { size: u64, max: u64 },

    /// The hashing worker thread is gone.
    #[error("Hashing worker stopped")]
    HashingStopped,

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A request handler panicked.
    #[error("Handler panicked: {message}")]
    Panicked { message: String },
}

impl ServerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn denied(path: impl Into<String>) -> Self {
        Self::Denied { path: path.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn reply_too_large(size: u64, max: usize) -> Self {
        Self::ReplyTooLarge { size, max: max as u64 }
    }

    /// Maps the fault to the status written back to the front.
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound { .. } => Status::NoMatch,
            Self::Denied { .. } => Status::Denied,
            Self::Transcode(_) => Status::TranscodeError,
            Self::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => Status::NoMatch,
                io::ErrorKind::PermissionDenied => Status::Denied,
                _ => Status::Internal,
            },
            _ => Status::Internal,
        }
    }
}

/// Outcome of a transcoder subprocess that did not finish cleanly.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The transcoder could not be started.
    #[error("failed to spawn transcoder: {0}")]
    Spawn(#[source] io::Error),

    /// Reading its output or waiting on it failed.
    #[error("transcoder IO failed: {0}")]
    Io(#[from] io::Error),

    /// It ran and exited unsuccessfully.
    #[error("transcoder exited with {status}")]
    Exit { status: std::process::ExitStatus },
}
