//! Core types shared by the bum processes: media records, tracing setup and
//! best-effort sandboxing.

pub mod media;
pub mod sandbox;
pub mod tracing;

pub use media::{Album, AlbumView, DEFAULT_DISC, Song, SongView, UNKNOWN_TRACK, UNKNOWN_YEAR};
pub use sandbox::{SandboxLevel, restrict};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
