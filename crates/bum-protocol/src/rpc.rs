//! RPC multiplexer: many logical exchanges over one channel.
//!
//! The front owns one [`RpcClient`] per channel. Requests are tagged with a
//! fresh message id; a single reader loop ([`RpcClient::run`]) routes every
//! inbound frame to the queue registered for its id. An exchange is either a
//! *call* (exactly one reply frame) or a *stream* (any number of frames,
//! terminated by an empty-body frame).
//!
//! Cancellation is local only: [`RpcClient::cancel`] wakes the consumer and
//! forgets the id, but the peer keeps producing until told otherwise with a
//! separate request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{ProtocolResult, RpcError, RpcResult};
use crate::framing::{FrameWriter, read_frame};
use crate::types::{Method, Status};

/// One result routed to a pending exchange.
#[derive(Debug)]
enum Delivery {
    /// A frame carrying data (or the single reply of a call).
    Frame { status: u32, body: Vec<u8> },
    /// End of a stream, from the peer's terminator or a local cancel.
    End { status: u32 },
    /// The channel went away.
    Disconnected,
}

#[derive(Debug)]
struct PendingEntry {
    tx: mpsc::UnboundedSender<Delivery>,
    streaming: bool,
}

type PendingMap = HashMap<u32, PendingEntry>;

struct Shared {
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        // The map holds no invariants that a panicking holder could break.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, message_id: u32, streaming: bool) -> RpcResult<mpsc::UnboundedReceiver<Delivery>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pending = self.pending();
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Disconnected);
        }
        if pending.insert(message_id, PendingEntry { tx, streaming }).is_some() {
            warn!(message_id, "Replaced an in-flight exchange with the same id");
        }
        Ok(rx)
    }

    fn forget(&self, message_id: u32) {
        self.pending().remove(&message_id);
    }
}

/// Front-side end of the multiplexed channel.
pub struct RpcClient<W> {
    writer: FrameWriter<W>,
    shared: Arc<Shared>,
    counter: AtomicU32,
}

impl<W: AsyncWrite + Unpin> RpcClient<W> {
    /// Creates a client that sends requests through `writer`.
    ///
    /// Nothing is received until [`RpcClient::run`] is driven with the read
    /// half of the same channel.
    pub fn new(writer: W) -> Self {
        Self {
            writer: FrameWriter::new(writer),
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
            counter: AtomicU32::new(0),
        }
    }

    /// Allocates a fresh message id.
    pub fn get_message_id(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the number of exchanges still awaiting frames.
    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    async fn send(&self, message_id: u32, method: Method, body: &[u8]) -> RpcResult<()> {
        if let Err(e) = self.writer.send(message_id, method.code(), body).await {
            self.shared.forget(message_id);
            return Err(e.into());
        }
        Ok(())
    }

    /// Sends a request and waits for its single reply frame.
    pub async fn call(&self, method: Method, body: &[u8]) -> RpcResult<(Status, Vec<u8>)> {
        let message_id = self.get_message_id();
        let mut rx = self.shared.register(message_id, false)?;
        self.send(message_id, method, body).await?;
        trace!(message_id, %method, "Call sent");

        let result = match rx.recv().await {
            Some(Delivery::Frame { status, body }) => Ok((Status::from_code(status), body)),
            Some(Delivery::End { status }) => Ok((Status::from_code(status), Vec::new())),
            Some(Delivery::Disconnected) | None => Err(RpcError::Disconnected),
        };
        self.shared.forget(message_id);
        result
    }

    /// Sends a streaming request under `message_id` and returns the stream
    /// of replies.
    ///
    /// The id should come from [`RpcClient::get_message_id`]; keeping it lets
    /// the caller cancel the exchange later.
    pub async fn subscribe(&self, method: Method, body: &[u8], message_id: u32) -> RpcResult<Subscription> {
        let rx = self.shared.register(message_id, true)?;
        self.send(message_id, method, body).await?;
        trace!(message_id, %method, "Subscription sent");

        Ok(Subscription {
            message_id,
            rx,
            shared: Arc::clone(&self.shared),
            terminal: None,
        })
    }

    /// Ends the exchange locally, delivering `status` as its terminal result.
    ///
    /// Does nothing if the exchange already finished.
    pub fn cancel(&self, status: Status, message_id: u32) {
        if let Some(entry) = self.shared.pending().remove(&message_id) {
            debug!(message_id, %status, "Canceling exchange");
            let _ = entry.tx.send(Delivery::End {
                status: status.code(),
            });
        }
    }

    /// Reader loop: routes every inbound frame to its pending exchange.
    ///
    /// Runs until the channel ends. On return every pending exchange is
    /// failed with [`RpcError::Disconnected`] and new requests are refused.
    pub async fn run<R>(&self, mut reader: R) -> ProtocolResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let result = loop {
            let frame = match read_frame(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Channel closed by peer");
                    break Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Channel read failed");
                    break Err(e);
                }
            };

            let mut pending = self.shared.pending();
            let Some(entry) = pending.get(&frame.message_id) else {
                trace!(message_id = frame.message_id, "Dropping frame for unknown id");
                continue;
            };

            let delivery = if entry.streaming && frame.is_terminator() {
                Delivery::End { status: frame.code }
            } else {
                Delivery::Frame {
                    status: frame.code,
                    body: frame.body,
                }
            };
            let finished = !entry.streaming || matches!(delivery, Delivery::End { .. });

            if entry.tx.send(delivery).is_err() || finished {
                pending.remove(&frame.message_id);
            }
        };

        let mut pending = self.shared.pending();
        self.shared.closed.store(true, Ordering::Release);
        for (_, entry) in pending.drain() {
            let _ = entry.tx.send(Delivery::Disconnected);
        }

        result
    }
}

/// The consumer side of a streaming exchange.
///
/// Dropping the subscription forgets the exchange; frames the peer still
/// sends for it are dropped by the reader loop.
pub struct Subscription {
    message_id: u32,
    rx: mpsc::UnboundedReceiver<Delivery>,
    shared: Arc<Shared>,
    terminal: Option<Status>,
}

impl Subscription {
    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    /// Returns the status of the terminating frame, once the stream ended.
    pub fn terminal_status(&self) -> Option<Status> {
        self.terminal
    }

    /// Waits for the next chunk.
    ///
    /// Returns `Ok(None)` once the stream ended, after which
    /// [`Subscription::terminal_status`] holds the terminator's status.
    pub async fn next(&mut self) -> RpcResult<Option<(Status, Vec<u8>)>> {
        if self.terminal.is_some() {
            return Ok(None);
        }

        match self.rx.recv().await {
            Some(Delivery::Frame { status, body }) => Ok(Some((Status::from_code(status), body))),
            Some(Delivery::End { status }) => {
                self.terminal = Some(Status::from_code(status));
                Ok(None)
            }
            Some(Delivery::Disconnected) | None => {
                self.terminal = Some(Status::Internal);
                Err(RpcError::Disconnected)
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.terminal.is_none() {
            self.shared.forget(self.message_id);
        }
    }
}
