//! Tag reading and embedded cover art.
//!
//! [`TagReader`] is the seam between the index and whatever understands
//! audio containers. The default [`SymphoniaTagReader`] reads files with
//! symphonia and reads both container-level metadata (Vorbis comments, MP4
//! atoms) and side-loaded metadata found while opening (ID3).

use std::fs::File;
use std::path::Path;

use bum_core::{DEFAULT_DISC, UNKNOWN_TRACK, UNKNOWN_YEAR};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, StandardVisualKey};
use symphonia::core::probe::{Hint, ProbeResult};
use thiserror::Error;
use tracing::trace;

/// Failure to read a file's tags.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable container: {0}")]
    Format(#[from] symphonia::core::errors::Error),
}

/// Raw tag values of one file. Absent tags are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track: Option<String>,
    pub disc: Option<String>,
    pub date: Option<String>,
}

impl Tags {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    pub fn artist(&self) -> &str {
        self.artist.as_deref().unwrap_or_default()
    }

    pub fn album(&self) -> &str {
        self.album.as_deref().unwrap_or_default()
    }

    /// The artist credited for the album: the album-artist tag, falling back
    /// to the track artist.
    pub fn album_artist(&self) -> &str {
        self.album_artist
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.artist())
    }

    pub fn track_number(&self) -> i32 {
        self.track.as_deref().and_then(leading_number).unwrap_or(UNKNOWN_TRACK)
    }

    pub fn disc_number(&self) -> i32 {
        self.disc.as_deref().and_then(leading_number).unwrap_or(DEFAULT_DISC)
    }

    /// Release year from `YYYY`, `YYYY/...` or `YYYY-MM-DD` dates.
    pub fn year(&self) -> i32 {
        self.date
            .as_deref()
            .and_then(|d| d.trim().split(['/', '-']).next())
            .and_then(|y| y.trim().parse().ok())
            .unwrap_or(UNKNOWN_YEAR)
    }

    fn fill_from(&mut self, revision: &MetadataRevision) {
        for tag in revision.tags() {
            let slot = match tag.std_key {
                Some(StandardTagKey::TrackTitle) => &mut self.title,
                Some(StandardTagKey::Artist) => &mut self.artist,
                Some(StandardTagKey::Album) => &mut self.album,
                Some(StandardTagKey::AlbumArtist) => &mut self.album_artist,
                Some(StandardTagKey::TrackNumber) => &mut self.track,
                Some(StandardTagKey::DiscNumber) => &mut self.disc,
                Some(StandardTagKey::Date) | Some(StandardTagKey::OriginalDate) => &mut self.date,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(tag.value.to_string());
            }
        }
    }
}

/// Parses the `N` of `"N"` or `"N/M"`.
fn leading_number(raw: &str) -> Option<i32> {
    raw.split('/').next()?.trim().parse().ok()
}

/// Reads tags and embedded art from audio files.
///
/// Implementations are blocking; async callers run them on the blocking pool.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<Tags, TagError>;

    /// Returns the embedded cover image, or `None` if the file has none.
    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>, TagError>;
}

/// [`TagReader`] backed by symphonia's format readers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaTagReader;

impl SymphoniaTagReader {
    fn open_format(path: &Path) -> Result<ProbeResult, TagError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let opened = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        Ok(opened)
    }

    /// Calls `f` on the container's revision, then on the side metadata.
    fn each_revision(opened: &mut ProbeResult, mut f: impl FnMut(&MetadataRevision)) {
        if let Some(revision) = opened.format.metadata().current() {
            f(revision);
        }
        if let Some(metadata) = opened.metadata.get() {
            if let Some(revision) = metadata.current() {
                f(revision);
            }
        }
    }
}

impl TagReader for SymphoniaTagReader {
    fn read_tags(&self, path: &Path) -> Result<Tags, TagError> {
        let mut opened = Self::open_format(path)?;
        let mut tags = Tags::default();
        Self::each_revision(&mut opened, |revision| tags.fill_from(revision));
        trace!(path = %path.display(), ?tags, "Read tags");
        Ok(tags)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>, TagError> {
        let mut opened = Self::open_format(path)?;
        let mut front = None;
        let mut any = None;
        Self::each_revision(&mut opened, |revision| {
            for visual in revision.visuals() {
                if front.is_none() && visual.usage == Some(StandardVisualKey::FrontCover) {
                    front = Some(visual.data.to_vec());
                }
                if any.is_none() {
                    any = Some(visual.data.to_vec());
                }
            }
        });
        Ok(front.or(any))
    }
}
