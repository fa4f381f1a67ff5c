//! Relaying a transcode stream into a chunked HTTP body.
//!
//! The body owns the subscription. If the client goes away first, dropping
//! the body ends the exchange locally and asks the coordinator to kill the
//! transcoder.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bum_protocol::{Method, Status, Subscription};
use bytes::Bytes;
use futures_util::stream;
use tracing::{debug, warn};

use crate::Rpc;
use crate::error::{FrontError, FrontResult};

/// Sends the cancel pair for an exchange dropped before it ended.
struct CancelGuard {
    rpc: Arc<Rpc>,
    message_id: u32,
    armed: bool,
}

impl CancelGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.rpc.cancel(Status::Canceled, self.message_id);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let rpc = Arc::clone(&self.rpc);
        let message_id = self.message_id;
        runtime.spawn(async move {
            debug!(message_id, "Client went away; canceling transcode");
            match rpc.call(Method::CancelTranscode, message_id.to_string().as_bytes()).await {
                Ok((status, _)) if !status.is_ok() => debug!(message_id, %status, "Cancel not applied"),
                Ok(_) => {}
                Err(e) => debug!(message_id, error = %e, "Cancel not delivered"),
            }
        });
    }
}

struct Relay {
    subscription: Subscription,
    guard: CancelGuard,
    first: Option<Vec<u8>>,
}

impl Relay {
    /// Produces the next body item. A `None` relay ends the body after the
    /// item is sent.
    async fn next(mut self) -> Option<(io::Result<Bytes>, Option<Self>)> {
        if let Some(chunk) = self.first.take() {
            return Some((Ok(Bytes::from(chunk)), Some(self)));
        }

        match self.subscription.next().await {
            Ok(Some((status, chunk))) if status.is_ok() => Some((Ok(Bytes::from(chunk)), Some(self))),
            Ok(Some((status, _))) => {
                // Guard stays armed so the transcoder is stopped on drop.
                warn!(message_id = self.guard.message_id, %status, "Unexpected chunk status");
                Some((Err(io::Error::other(format!("transcode chunk status {status}"))), None))
            }
            Ok(None) => {
                self.guard.disarm();
                match self.subscription.terminal_status() {
                    Some(Status::Ok | Status::Canceled) | None => None,
                    Some(status) => {
                        warn!(message_id = self.guard.message_id, %status, "Transcode failed mid-stream");
                        Some((Err(io::Error::other(format!("transcode ended with {status}"))), None))
                    }
                }
            }
            Err(e) => {
                self.guard.disarm();
                Some((Err(io::Error::other(e)), None))
            }
        }
    }
}

/// Starts transcoding `song_id` and answers with its chunked body.
///
/// The first result is awaited before answering, so an unknown song or a
/// transcoder that fails at once gets a proper error status.
pub(crate) async fn transcode_response(
    rpc: &Arc<Rpc>,
    song_id: &str,
    content_type: &'static str,
) -> FrontResult<Response> {
    let message_id = rpc.get_message_id();
    let mut subscription = rpc.subscribe(Method::Transcode, song_id.as_bytes(), message_id).await?;
    let mut guard = CancelGuard {
        rpc: Arc::clone(rpc),
        message_id,
        armed: true,
    };

    let first = match subscription.next().await {
        Ok(Some((status, chunk))) if status.is_ok() => chunk,
        Ok(Some((status, _))) => return Err(FrontError::Coordinator(status)),
        Ok(None) => {
            guard.disarm();
            return match subscription.terminal_status() {
                Some(Status::Ok) | None => Ok(([(header::CONTENT_TYPE, content_type)], Body::empty()).into_response()),
                Some(status) => Err(FrontError::Coordinator(status)),
            };
        }
        Err(e) => {
            guard.disarm();
            return Err(e.into());
        }
    };
    debug!(message_id, song_id, "Streaming transcode");

    let relay = Relay {
        subscription,
        guard,
        first: Some(first),
    };
    let body = stream::unfold(Some(relay), |relay| async move { relay?.next().await });
    Ok(([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response())
}
