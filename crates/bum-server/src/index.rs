//! Media index: songs and albums found under the library root.
//!
//! A scan walks the library depth-first with directory entries sorted by
//! name, reads the tags of every recognized audio file and folds them into
//! [`Song`] and [`Album`] records.
//!
//! Ids are derived from tags, never from paths, so re-scanning unchanged
//! content yields the same ids even after files move:
//!
//! - album: `hash(album, album_artist)`
//! - song: `{hash(artist, title)}-{year}-{track}-{disc}`
//!
//! Tracks join their album by id lookup, so albums whose files are
//! interleaved in scan order still end up as one record.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bum_core::{Album, AlbumView, Song, SongView};
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{ServerError, ServerResult};
use crate::hashing::HashingWorker;
use crate::tags::{TagReader, Tags};

/// Lists the audio files under `root`, depth-first, each directory's
/// entries sorted by file name.
///
/// Unreadable subdirectories are logged and skipped; only an unreadable
/// root is an error.
pub fn collect_audio_files(root: &Path, config: &CoordinatorConfig) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(root, config, &mut files)?;
    Ok(files)
}

fn walk(dir: &Path, config: &CoordinatorConfig, files: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .collect::<Vec<_>>();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if let Err(e) = walk(&path, config, files) {
                warn!(path = %path.display(), error = %e, "Skipping unreadable directory");
            }
        } else if config.is_audio(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Songs and albums of one scan.
#[derive(Debug, Default)]
pub struct MediaIndex {
    songs: HashMap<String, Song>,
    albums: HashMap<String, Album>,
}

impl MediaIndex {
    /// Scans the library at `config.media_root`.
    ///
    /// Files whose tags cannot be read are logged and skipped.
    pub async fn scan(
        config: &CoordinatorConfig,
        tag_reader: Arc<dyn TagReader>,
        hasher: &HashingWorker,
    ) -> ServerResult<Self> {
        let root = config.media_root.clone();
        let walk_config = config.clone();
        let paths = tokio::task::spawn_blocking(move || collect_audio_files(&root, &walk_config))
            .await
            .map_err(|e| ServerError::Io(io::Error::other(e)))??;
        debug!(files = paths.len(), "Loading files");

        let mut builder = IndexBuilder::new(config);
        for path in paths {
            let reader = Arc::clone(&tag_reader);
            let tag_path = path.clone();
            let result = tokio::task::spawn_blocking(move || reader.read_tags(&tag_path))
                .await
                .map_err(|e| ServerError::Io(io::Error::other(e)))?;

            match result {
                Ok(tags) => builder.add(path, &tags, hasher).await?,
                Err(e) => warn!(path = %path.display(), error = %e, "Error loading file"),
            }
        }

        let index = builder.finish();
        info!(
            songs = index.songs.len(),
            albums = index.albums.len(),
            "Scan complete"
        );
        Ok(index)
    }

    pub fn song(&self, id: &str) -> Option<&Song> {
        self.songs.get(id)
    }

    pub fn album(&self, id: &str) -> Option<&Album> {
        self.albums.get(id)
    }

    pub fn song_count(&self) -> usize {
        self.songs.len()
    }

    pub fn album_count(&self) -> usize {
        self.albums.len()
    }

    /// Cover sources of every album, in album id order.
    pub fn cover_paths(&self) -> Vec<PathBuf> {
        let mut albums: Vec<_> = self.albums.values().collect();
        albums.sort_by(|a, b| a.id.cmp(&b.id));
        albums.into_iter().map(|a| a.cover_path.clone()).collect()
    }

    /// Cover source of each album id; unknown ids map to an empty path.
    pub fn cover_paths_for(&self, album_ids: &[String]) -> Vec<PathBuf> {
        album_ids
            .iter()
            .map(|id| self.albums.get(id).map(|a| a.cover_path.clone()).unwrap_or_default())
            .collect()
    }

    /// All songs as a JSON object keyed by song id.
    pub fn songs_json(&self) -> ServerResult<Vec<u8>> {
        let views: BTreeMap<&str, SongView> = self.songs.iter().map(|(id, s)| (id.as_str(), s.view())).collect();
        Ok(serde_json::to_vec(&views)?)
    }

    /// All albums as a JSON object keyed by album id.
    pub fn albums_json(&self) -> ServerResult<Vec<u8>> {
        let views: BTreeMap<&str, AlbumView> = self.albums.iter().map(|(id, a)| (id.as_str(), a.view())).collect();
        Ok(serde_json::to_vec(&views)?)
    }

    /// One album as JSON.
    pub fn album_json(&self, id: &str) -> ServerResult<Vec<u8>> {
        let album = self
            .albums
            .get(id)
            .ok_or_else(|| ServerError::not_found(format!("album {id}")))?;
        Ok(serde_json::to_vec(&album.view())?)
    }
}

/// Folds tagged files into songs and albums.
struct IndexBuilder<'a> {
    config: &'a CoordinatorConfig,
    songs: HashMap<String, Song>,
    albums: HashMap<String, Album>,
}

impl<'a> IndexBuilder<'a> {
    fn new(config: &'a CoordinatorConfig) -> Self {
        Self {
            config,
            songs: HashMap::new(),
            albums: HashMap::new(),
        }
    }

    async fn add(&mut self, path: PathBuf, tags: &Tags, hasher: &HashingWorker) -> ServerResult<()> {
        let year = tags.year();
        let track = tags.track_number();
        let disc = tags.disc_number();

        let album_id = hasher.hash([tags.album(), tags.album_artist()]).await?;
        let artist_title = hasher.hash([tags.artist(), tags.title()]).await?;
        let song_id = format!("{artist_title}-{year}-{track}-{disc}");

        if !self.albums.contains_key(&album_id) {
            let cover_path = self.cover_for(&path);
            debug!(album = tags.album(), id = %album_id, "New album");
            self.albums.insert(
                album_id.clone(),
                Album {
                    id: album_id.clone(),
                    title: tags.album().to_string(),
                    album_artist: tags.album_artist().to_string(),
                    year,
                    tracks: Vec::new(),
                    cover_path,
                },
            );
        }

        let song = Song {
            id: song_id.clone(),
            path,
            title: tags.title().to_string(),
            artist: tags.artist().to_string(),
            track,
            disc,
            year,
            album_id: album_id.clone(),
        };

        if let Some(previous) = self.songs.insert(song_id.clone(), song) {
            debug!(id = %song_id, old = %previous.path.display(), "Duplicate song, keeping the later file");
            if previous.album_id != album_id {
                if let Some(old_album) = self.albums.get_mut(&previous.album_id) {
                    old_album.tracks.retain(|t| t != &song_id);
                }
            }
        }

        if let Some(album) = self.albums.get_mut(&album_id) {
            if !album.tracks.contains(&song_id) {
                album.tracks.push(song_id);
            }
        }
        Ok(())
    }

    /// First cover image next to `track`, else the track itself.
    fn cover_for(&self, track: &Path) -> PathBuf {
        let dir = track.parent().unwrap_or_else(|| Path::new(""));
        self.config
            .cover_names
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| track.to_path_buf())
    }

    fn finish(self) -> MediaIndex {
        let Self { songs, mut albums, .. } = self;

        albums.retain(|_, album| !album.tracks.is_empty());
        for album in albums.values_mut() {
            // Stable sort keeps scan order for equal positions.
            album.tracks.sort_by_key(|id| {
                songs
                    .get(id)
                    .map(|s| (s.disc, s.track))
                    .unwrap_or((i32::MAX, i32::MAX))
            });
        }

        MediaIndex { songs, albums }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::fs;

    use crate::tags::TagError;

    /// Tag reader answering from a table keyed by file name.
    #[derive(Default)]
    pub(crate) struct FakeTags {
        pub(crate) tags: Map<String, Tags>,
        pub(crate) covers: Map<String, Vec<u8>>,
    }

    impl FakeTags {
        pub(crate) fn with(mut self, file: &str, tags: Tags) -> Self {
            self.tags.insert(file.to_string(), tags);
            self
        }

        pub(crate) fn with_cover(mut self, file: &str, data: &[u8]) -> Self {
            self.covers.insert(file.to_string(), data.to_vec());
            self
        }
    }

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    impl TagReader for FakeTags {
        fn read_tags(&self, path: &Path) -> Result<Tags, TagError> {
            self.tags
                .get(&file_name(path))
                .cloned()
                .ok_or_else(|| TagError::Io(io::Error::other("corrupt")))
        }

        fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>, TagError> {
            Ok(self.covers.get(&file_name(path)).cloned())
        }
    }

    pub(crate) fn tags(artist: &str, title: &str, album: &str, track: &str, date: &str) -> Tags {
        Tags {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            track: Some(track.to_string()),
            date: Some(date.to_string()),
            ..Tags::default()
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    async fn scan(root: &Path, reader: FakeTags) -> MediaIndex {
        let config = CoordinatorConfig::new(root);
        let hasher = HashingWorker::spawn().unwrap();
        MediaIndex::scan(&config, Arc::new(reader), &hasher).await.unwrap()
    }

    #[test]
    fn walk_is_sorted_depth_first_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["b/2.flac", "b/1.mp3", "a/z.ogg", "a/cover.jpg", "c.wav", "notes.txt"] {
            touch(&dir.path().join(f));
        }

        let files = collect_audio_files(dir.path(), &CoordinatorConfig::default()).unwrap();
        let rel: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(rel, vec!["a/z.ogg", "b/1.mp3", "b/2.flac", "c.wav"]);
    }

    #[tokio::test]
    async fn single_file_scan() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Alb/t.flac"));

        let index = scan(dir.path(), FakeTags::default().with("t.flac", tags("A", "T", "Alb", "3/12", "1999"))).await;

        assert_eq!(index.song_count(), 1);
        assert_eq!(index.album_count(), 1);

        let album_id = crate::hashing::content_id(&["Alb", "A"]);
        let album = index.album(&album_id).unwrap();
        assert_eq!(album.year, 1999);
        assert_eq!(album.album_artist, "A");
        assert_eq!(album.cover_path, dir.path().join("Alb/t.flac"));

        let song_id = format!("{}-1999-3-1", crate::hashing::content_id(&["A", "T"]));
        assert_eq!(album.tracks, vec![song_id.clone()]);
        let song = index.song(&song_id).unwrap();
        assert_eq!(song.track, 3);
        assert_eq!(song.album_id, album_id);
    }

    #[tokio::test]
    async fn unparsable_track_uses_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("t.mp3"));

        let index = scan(dir.path(), FakeTags::default().with("t.mp3", tags("A", "T", "Alb", "x", ""))).await;
        let song_id = format!("{}-0--1-1", crate::hashing::content_id(&["A", "T"]));
        assert_eq!(index.song(&song_id).unwrap().track, -1);
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("good.flac"));
        touch(&dir.path().join("bad.flac"));

        let index = scan(dir.path(), FakeTags::default().with("good.flac", tags("A", "T", "Alb", "1", ""))).await;
        assert_eq!(index.song_count(), 1);
    }

    #[tokio::test]
    async fn interleaved_album_files_form_one_album() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["1.flac", "2.flac", "3.flac", "4.flac"] {
            touch(&dir.path().join(f));
        }
        let reader = FakeTags::default()
            .with("1.flac", tags("A", "Second", "X", "2", "2001"))
            .with("2.flac", tags("B", "Other", "Y", "1", "2001"))
            .with("3.flac", tags("A", "First", "X", "1", "2001"))
            .with("4.flac", tags("B", "More", "Y", "2", "2001"));

        let index = scan(dir.path(), reader).await;
        assert_eq!(index.album_count(), 2);

        let x = index.album(&crate::hashing::content_id(&["X", "A"])).unwrap();
        let titles: Vec<_> = x.tracks.iter().map(|id| index.song(id).unwrap().title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[tokio::test]
    async fn tracks_sort_by_disc_then_track() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["a.flac", "b.flac", "c.flac"] {
            touch(&dir.path().join(f));
        }
        let mut d2t1 = tags("A", "D2T1", "X", "1", "");
        d2t1.disc = Some("2/2".to_string());
        let reader = FakeTags::default()
            .with("a.flac", d2t1)
            .with("b.flac", tags("A", "D1T2", "X", "2", ""))
            .with("c.flac", tags("A", "D1T1", "X", "1", ""));

        let index = scan(dir.path(), reader).await;
        let album = index.album(&crate::hashing::content_id(&["X", "A"])).unwrap();
        let titles: Vec<_> = album.tracks.iter().map(|id| index.song(id).unwrap().title.as_str()).collect();
        assert_eq!(titles, vec!["D1T1", "D1T2", "D2T1"]);
    }

    #[tokio::test]
    async fn duplicate_song_keeps_last_path_once() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.flac"));
        touch(&dir.path().join("b.flac"));
        let reader = FakeTags::default()
            .with("a.flac", tags("A", "T", "X", "1", ""))
            .with("b.flac", tags("A", "T", "X", "1", ""));

        let index = scan(dir.path(), reader).await;
        assert_eq!(index.song_count(), 1);
        let album = index.album(&crate::hashing::content_id(&["X", "A"])).unwrap();
        assert_eq!(album.tracks.len(), 1);
        assert_eq!(index.song(&album.tracks[0]).unwrap().path, dir.path().join("b.flac"));
    }

    #[tokio::test]
    async fn album_artist_tag_drives_album_id() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.flac"));
        touch(&dir.path().join("b.flac"));
        let mut a = tags("A", "T1", "Comp", "1", "");
        a.album_artist = Some("Various".to_string());
        let mut b = tags("B", "T2", "Comp", "2", "");
        b.album_artist = Some("Various".to_string());

        let index = scan(dir.path(), FakeTags::default().with("a.flac", a).with("b.flac", b)).await;
        assert_eq!(index.album_count(), 1);
        let album = index.album(&crate::hashing::content_id(&["Comp", "Various"])).unwrap();
        assert_eq!(album.tracks.len(), 2);
    }

    #[tokio::test]
    async fn cover_file_preferred_over_embedded_art() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Alb/t.flac"));
        touch(&dir.path().join("Alb/cover.png"));

        let index = scan(dir.path(), FakeTags::default().with("t.flac", tags("A", "T", "Alb", "1", ""))).await;
        assert_eq!(index.cover_paths(), vec![dir.path().join("Alb/cover.png")]);
    }

    #[tokio::test]
    async fn rescan_yields_identical_ids() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("x/1.flac"));
        touch(&dir.path().join("y/2.flac"));
        let reader = || {
            FakeTags::default()
                .with("1.flac", tags("A", "T1", "X", "1", "1990"))
                .with("2.flac", tags("B", "T2", "Y", "4/9", "2000"))
        };

        let first = scan(dir.path(), reader()).await;
        fs::rename(dir.path().join("y/2.flac"), dir.path().join("x/2.flac")).unwrap();
        let second = scan(dir.path(), reader()).await;

        assert_eq!(first.songs_json().unwrap(), second.songs_json().unwrap());
        assert_eq!(first.albums_json().unwrap(), second.albums_json().unwrap());
    }

    #[tokio::test]
    async fn json_views() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("t.flac"));
        let index = scan(dir.path(), FakeTags::default().with("t.flac", tags("A", "T", "Alb", "3", "1999"))).await;

        let songs: serde_json::Value = serde_json::from_slice(&index.songs_json().unwrap()).unwrap();
        let (id, song) = songs.as_object().unwrap().iter().next().unwrap();
        assert_eq!(song["id"], id.as_str());
        assert_eq!(song["title"], "T");
        assert!(song.get("path").is_none());

        let album_id = crate::hashing::content_id(&["Alb", "A"]);
        let album: serde_json::Value = serde_json::from_slice(&index.album_json(&album_id).unwrap()).unwrap();
        assert_eq!(album["year"], 1999);
        assert_eq!(album["tracks"][0], id.as_str());

        assert!(matches!(index.album_json("nope"), Err(ServerError::NotFound { .. })));
        assert_eq!(index.cover_paths_for(&["nope".to_string()]), vec![PathBuf::new()]);
    }
}
