//! CLI error types.

use std::io;

use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that stop the `bum` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Launching or talking to the front process failed.
    #[error("launcher error: {0}")]
    Launch(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Server(#[from] bum_server::ServerError),

    #[error(transparent)]
    Front(#[from] bum_front::FrontError),

    #[error(transparent)]
    Tracing(#[from] bum_core::tracing::TracingError),
}
