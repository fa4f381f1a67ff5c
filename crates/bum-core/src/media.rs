//! Media record types.
//!
//! [`Song`] and [`Album`] are the coordinator's in-memory records. Their
//! JSON views ([`SongView`], [`AlbumView`]) are what crosses the channel:
//! paths stay inside the coordinator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Track number used when the tag is missing or unparsable.
pub const UNKNOWN_TRACK: i32 = -1;
/// Disc number used when the tag is missing or unparsable.
pub const DEFAULT_DISC: i32 = 1;
/// Year used when the tag is missing or unparsable.
pub const UNKNOWN_YEAR: i32 = 0;

/// One audio file in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    /// Content-derived id: `{hash(artist, title)}-{year}-{track}-{disc}`.
    pub id: String,
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub track: i32,
    pub disc: i32,
    pub year: i32,
    pub album_id: String,
}

impl Song {
    /// Returns the serialized view of this song.
    pub fn view(&self) -> SongView {
        SongView {
            id: self.id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            album_id: self.album_id.clone(),
            track: self.track,
            disc: self.disc,
        }
    }
}

/// A group of songs sharing an album id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    /// Content-derived id: `hash(title, album_artist)`.
    pub id: String,
    pub title: String,
    pub album_artist: String,
    pub year: i32,
    /// Song ids ordered by disc, then track number.
    pub tracks: Vec<String>,
    /// Where the cover art comes from: an image file, or a track with
    /// embedded art.
    pub cover_path: PathBuf,
}

impl Album {
    /// Returns the serialized view of this album.
    pub fn view(&self) -> AlbumView {
        AlbumView {
            id: self.id.clone(),
            title: self.title.clone(),
            album_artist: self.album_artist.clone(),
            year: self.year,
            tracks: self.tracks.clone(),
        }
    }
}

/// JSON form of a [`Song`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongView {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album_id: String,
    pub track: i32,
    pub disc: i32,
}

/// JSON form of an [`Album`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumView {
    pub id: String,
    pub title: String,
    pub album_artist: String,
    pub year: i32,
    pub tracks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song() -> Song {
        Song {
            id: "abc-1999-3-1".to_string(),
            path: PathBuf::from("/music/a/t.flac"),
            title: "T".to_string(),
            artist: "A".to_string(),
            track: 3,
            disc: 1,
            year: 1999,
            album_id: "def".to_string(),
        }
    }

    #[test]
    fn song_view_hides_path() {
        let json = serde_json::to_value(song().view()).unwrap();
        assert_eq!(json["id"], "abc-1999-3-1");
        assert_eq!(json["track"], 3);
        assert_eq!(json["album_id"], "def");
        assert!(json.get("path").is_none());
    }

    #[test]
    fn album_view_roundtrips() {
        let album = Album {
            id: "def".to_string(),
            title: "Alb".to_string(),
            album_artist: "A".to_string(),
            year: 1999,
            tracks: vec!["abc-1999-3-1".to_string()],
            cover_path: PathBuf::from("/music/a/cover.jpg"),
        };
        let text = serde_json::to_string(&album.view()).unwrap();
        let parsed: AlbumView = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, album.view());
        assert!(!text.contains("cover"));
    }
}
