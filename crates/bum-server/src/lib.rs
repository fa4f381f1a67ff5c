//! The bum coordinator.
//!
//! The coordinator is the privileged half of the media server. It owns:
//! - the media index, built by scanning the library once at startup
//! - the cover/thumbnail cache
//! - the transcoder subprocesses
//!
//! and serves them to the front over one framed channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bum_server::{Coordinator, CoordinatorConfig, SymphoniaTagReader};
//!
//! # async fn run(channel: tokio::net::UnixStream) -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoordinatorConfig::new("/srv/music");
//! let coordinator = Coordinator::start(config, Arc::new(SymphoniaTagReader)).await?;
//!
//! let (reader, writer) = channel.into_split();
//! Arc::new(coordinator).serve(reader, writer).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatch;
mod error;
mod hashing;
mod images;
mod index;
mod signals;
mod tags;
mod transcode;

pub use config::{CoordinatorConfig, DEFAULT_CHUNK_SIZE, DEFAULT_COVER_NAMES, DEFAULT_EXTENSIONS, TranscodeFormat};
pub use dispatch::Coordinator;
pub use error::{ServerError, ServerResult, TranscodeError};
pub use hashing::{HashingWorker, content_id};
pub use images::ImageCache;
pub use index::{MediaIndex, collect_audio_files};
pub use signals::{Signal, SignalHandler};
pub use tags::{SymphoniaTagReader, TagError, TagReader, Tags};
pub use transcode::{CoverStream, Rendition, TranscodeStream, Transcoder};
