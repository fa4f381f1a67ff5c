//! Frame transport for the coordinator/front channel.
//!
//! Every exchange on the channel is made of frames. A frame is a fixed
//! 12-byte header followed by the body:
//!
//! ```text
//! +----------------+---------------------+-----------------+-----------+
//! | message_id u32 | status_or_method u32 | body_length u32 |   body    |
//! +----------------+---------------------+-----------------+-----------+
//! ```
//!
//! All three header fields use native byte order; the channel only ever
//! connects two processes on the same host.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::MAX_BODY_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 12;

/// A single unit on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlates the frame with a logical exchange.
    pub message_id: u32,
    /// Method code on requests, status code on responses.
    pub code: u32,
    /// Frame payload. An empty body terminates a stream.
    pub body: Vec<u8>,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(message_id: u32, code: u32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id,
            code,
            body: body.into(),
        }
    }

    /// Creates an empty-body frame, the terminator of a stream.
    pub fn terminator(message_id: u32, code: u32) -> Self {
        Self::new(message_id, code, Vec::new())
    }

    /// Returns true if this frame ends a stream.
    pub fn is_terminator(&self) -> bool {
        self.body.is_empty()
    }
}

fn encode_header(message_id: u32, code: u32, body_len: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&message_id.to_ne_bytes());
    header[4..8].copy_from_slice(&code.to_ne_bytes());
    header[8..12].copy_from_slice(&body_len.to_ne_bytes());
    header
}

/// Reads until `buf` is full or the stream ends, returning the number of
/// bytes read.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads one frame from the channel.
///
/// Returns `Ok(None)` if the channel ended cleanly on a frame boundary. A
/// channel that ends partway through a header or body is reported as
/// [`ProtocolError::IncompleteFrame`].
pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<Frame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    let received = read_full(reader, &mut header).await?;
    if received == 0 {
        return Ok(None);
    }
    if received < HEADER_SIZE {
        return Err(ProtocolError::IncompleteFrame {
            expected: HEADER_SIZE,
            received,
        });
    }

    let message_id = u32::from_ne_bytes([header[0], header[1], header[2], header[3]]);
    let code = u32::from_ne_bytes([header[4], header[5], header[6], header[7]]);
    let body_len = u32::from_ne_bytes([header[8], header[9], header[10], header[11]]);

    if body_len > MAX_BODY_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body_len,
            max: MAX_BODY_SIZE,
        });
    }

    let mut body = vec![0u8; body_len as usize];
    let received = read_full(reader, &mut body).await?;
    if received < body.len() {
        return Err(ProtocolError::IncompleteFrame {
            expected: body.len(),
            received,
        });
    }

    Ok(Some(Frame {
        message_id,
        code,
        body,
    }))
}

/// Writes one frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, message_id: u32, code: u32, body: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_BODY_SIZE)
        .ok_or(ProtocolError::FrameTooLarge {
            size: u32::try_from(body.len()).unwrap_or(u32::MAX),
            max: MAX_BODY_SIZE,
        })?;

    writer.write_all(&encode_header(message_id, code, len)).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Shared write half of the channel.
///
/// Cloning yields another handle onto the same writer. Each frame is written
/// header-then-body under one lock, so frames from concurrent tasks never
/// interleave.
pub struct FrameWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for FrameWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Writes one frame.
    pub async fn send(&self, message_id: u32, code: u32, body: &[u8]) -> ProtocolResult<()> {
        let mut writer = self.inner.lock().await;
        write_frame(&mut *writer, message_id, code, body).await
    }

    /// Writes a stream terminator.
    pub async fn send_terminator(&self, message_id: u32, code: u32) -> ProtocolResult<()> {
        self.send(message_id, code, &[]).await
    }
}
