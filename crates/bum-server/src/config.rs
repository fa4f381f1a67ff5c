//! Coordinator configuration.

use std::path::{Path, PathBuf};

use bum_protocol::MAX_BODY_SIZE;

/// Audio file extensions picked up by a scan.
pub const DEFAULT_EXTENSIONS: &[&str] = &["opus", "ogg", "oga", "flac", "mp3", "mp4", "m4a", "wma", "wav"];

/// File names tried, in order, as an album's cover image.
pub const DEFAULT_COVER_NAMES: &[&str] = &["cover.jpg", "cover.jpeg", "cover.png", "cover.webp"];

/// Bytes read from the transcoder per stream chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Container the transcoder produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TranscodeFormat {
    #[default]
    Webm,
    Ogg,
}

impl TranscodeFormat {
    /// Argument passed to `transcode-audio`.
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Ogg => "ogg",
        }
    }

    /// MIME type of the produced stream.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Webm => "audio/webm",
            Self::Ogg => "audio/ogg",
        }
    }
}

impl std::str::FromStr for TranscodeFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webm" => Ok(Self::Webm),
            "ogg" => Ok(Self::Ogg),
            other => Err(format!("unsupported transcode format '{other}' (expected webm or ogg)")),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Root of the music library.
    pub media_root: PathBuf,

    /// Directory served by `GET_FILE`.
    pub static_root: PathBuf,

    /// External transcoder executable.
    pub transcoder: PathBuf,

    pub transcode_format: TranscodeFormat,

    /// Read size for transcode output.
    pub chunk_size: usize,

    /// Results buffered between the cover subprocess reader and its consumer.
    pub cover_channel_depth: usize,

    /// Lowercase extensions recognized as audio, without the dot.
    pub extensions: Vec<String>,

    /// Cover image names looked up next to an album's first track.
    pub cover_names: Vec<String>,

    /// Fill the thumbnail cache for every album right after the scan.
    pub warm_thumbnails: bool,

    /// Largest reply body sent in one frame; bigger replies become
    /// `INTERNAL`.
    pub max_reply_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("."),
            static_root: PathBuf::from("static"),
            transcoder: PathBuf::from("transcoder"),
            transcode_format: TranscodeFormat::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cover_channel_depth: 16,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            cover_names: DEFAULT_COVER_NAMES.iter().map(|n| n.to_string()).collect(),
            warm_thumbnails: true,
            max_reply_size: MAX_BODY_SIZE as usize,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a configuration serving the library at `media_root`.
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            ..Default::default()
        }
    }

    pub fn with_static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = root.into();
        self
    }

    pub fn with_transcoder(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcoder = path.into();
        self
    }

    pub fn with_transcode_format(mut self, format: TranscodeFormat) -> Self {
        self.transcode_format = format;
        self
    }

    /// Builder: set the chunk size (at least one byte).
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn with_warm_thumbnails(mut self, warm: bool) -> Self {
        self.warm_thumbnails = warm;
        self
    }

    /// Builder: cap reply bodies below the frame limit.
    pub fn with_max_reply_size(mut self, size: usize) -> Self {
        self.max_reply_size = size.min(MAX_BODY_SIZE as usize);
        self
    }

    /// Returns true if `path` has one of the recognized audio extensions.
    pub fn is_audio(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
    }
}
