//! Cover and thumbnail cache.
//!
//! Entries are keyed by rendition and source path and live for the whole
//! process. An empty entry records that the source has no art, so it is not
//! asked for again.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bum_protocol::pack_sequence;
use tracing::{debug, warn};

use crate::error::ServerResult;
use crate::tags::TagReader;
use crate::transcode::{Rendition, Transcoder};

type CacheKey = (Rendition, PathBuf);

/// Rendered cover art, by rendition and source path.
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: Mutex<HashMap<CacheKey, Arc<[u8]>>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<[u8]>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of cached entries, including "no art" ones.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, rendition: Rendition, path: &Path) -> Option<Arc<[u8]>> {
        self.entries().get(&(rendition, path.to_path_buf())).cloned()
    }

    /// Returns one image per path, packed in input order.
    ///
    /// Cached entries are served directly; the rest go through one cover
    /// batch and are cached on the way back. An empty path, or a source
    /// with no art, yields an empty entry.
    pub async fn get_covers(
        &self,
        paths: &[PathBuf],
        rendition: Rendition,
        transcoder: &Transcoder,
        tag_reader: Arc<dyn TagReader>,
    ) -> ServerResult<Vec<u8>> {
        let mut images: Vec<Option<Arc<[u8]>>> = Vec::with_capacity(paths.len());
        let mut missing = Vec::new();
        let mut queued = HashSet::new();

        for path in paths {
            if path.as_os_str().is_empty() {
                images.push(Some(Arc::from(Vec::new())));
                continue;
            }
            let hit = self.cached(rendition, path);
            if hit.is_none() && queued.insert(path.clone()) {
                missing.push(path.clone());
            }
            images.push(hit);
        }

        if !missing.is_empty() {
            debug!(count = missing.len(), ?rendition, "Fetching uncached covers");
            let fetched = self.fetch(missing, rendition, transcoder, tag_reader).await?;
            for (image, path) in images.iter_mut().zip(paths) {
                if image.is_none() {
                    *image = fetched.get(path).cloned();
                }
            }
        }

        let empty: Arc<[u8]> = Arc::from(Vec::new());
        Ok(pack_sequence(images.iter().map(|image| image.as_ref().unwrap_or(&empty))))
    }

    /// Runs one cover batch and caches whatever it answers.
    async fn fetch(
        &self,
        paths: Vec<PathBuf>,
        rendition: Rendition,
        transcoder: &Transcoder,
        tag_reader: Arc<dyn TagReader>,
    ) -> ServerResult<HashMap<PathBuf, Arc<[u8]>>> {
        let expected = paths.len();
        let mut stream = transcoder.get_cover_stream(paths, rendition, tag_reader)?;

        let mut fetched = HashMap::with_capacity(expected);
        while let Some((path, data)) = stream.next().await {
            let image: Arc<[u8]> = Arc::from(data.unwrap_or_default());
            self.entries().insert((rendition, path.clone()), Arc::clone(&image));
            fetched.insert(path, image);
        }

        if fetched.len() < expected {
            warn!(
                answered = fetched.len(),
                expected,
                "Cover batch ended early; unanswered paths stay uncached"
            );
        }
        Ok(fetched)
    }
}
