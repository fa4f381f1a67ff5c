//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while reading or writing the channel.
///
/// Every variant here is a transport fault: the channel cannot be trusted
/// afterwards and the connection should be torn down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame body exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel closed in the middle of a frame or record.
    #[error("incomplete frame: expected {expected} bytes, got {received}")]
    IncompleteFrame { expected: usize, received: usize },

    /// A packed sequence or cover record ended before its declared length.
    #[error("truncated {what}: expected {expected} bytes, got {received}")]
    Truncated {
        what: &'static str,
        expected: usize,
        received: usize,
    },
}

impl ProtocolError {
    /// Creates a truncation error.
    pub fn truncated(what: &'static str, expected: usize, received: usize) -> Self {
        Self::Truncated {
            what,
            expected,
            received,
        }
    }
}

/// Errors observed by a consumer of the RPC multiplexer.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request frame could not be written.
    #[error("failed to send request: {0}")]
    Send(#[from] ProtocolError),

    /// The channel reached end-of-stream (or failed) before a reply arrived.
    #[error("channel to peer closed")]
    Disconnected,
}

/// Result type for multiplexer operations.
pub type RpcResult<T> = Result<T, RpcError>;
