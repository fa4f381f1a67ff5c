//! Content hashing on a dedicated thread.
//!
//! Ids are 128-bit blake2b digests rendered as lowercase hex. The digest runs
//! on one OS thread fed through a channel so the async scheduler never
//! computes it inline; each request gets its answer on a oneshot.

use std::sync::mpsc as std_mpsc;
use std::thread;

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{ServerError, ServerResult};

type Blake2b128 = Blake2b<U16>;

struct Job {
    parts: Vec<Vec<u8>>,
    reply: oneshot::Sender<String>,
}

/// Hashes the concatenation of `parts`.
pub fn content_id<T: AsRef<[u8]>>(parts: &[T]) -> String {
    let mut hasher = Blake2b128::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// Handle to the hashing thread.
///
/// The thread exits once every handle is dropped.
#[derive(Clone)]
pub struct HashingWorker {
    jobs: std_mpsc::Sender<Job>,
}

impl HashingWorker {
    /// Starts the worker thread.
    pub fn spawn() -> ServerResult<Self> {
        let (jobs, rx) = std_mpsc::channel::<Job>();
        thread::Builder::new()
            .name("bum-hashing".to_string())
            .spawn(move || {
                debug!("Hashing worker started");
                for job in rx {
                    let _ = job.reply.send(content_id(&job.parts));
                }
                debug!("Hashing worker stopped");
            })?;
        Ok(Self { jobs })
    }

    /// Hashes the concatenation of `parts` on the worker thread.
    pub async fn hash<I, T>(&self, parts: I) -> ServerResult<String>
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        let (reply, rx) = oneshot::channel();
        let job = Job {
            parts: parts.into_iter().map(Into::into).collect(),
            reply,
        };
        self.jobs.send(job).map_err(|_| ServerError::HashingStopped)?;
        let digest = rx.await.map_err(|_| ServerError::HashingStopped)?;
        trace!(%digest, "Hashed");
        Ok(digest)
    }
}

// Lowercase hex without pulling in another crate.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;

        let bytes = bytes.as_ref();
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}
