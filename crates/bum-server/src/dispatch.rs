//! Coordinator dispatch loop.
//!
//! Reads request frames off the channel and answers each one. Single-reply
//! methods are handled to completion before the next frame is read;
//! `TRANSCODE` is handed to its own task so the loop keeps reading while
//! the stream runs. Every request gets exactly one reply frame, or for a
//! stream exactly one empty-body terminator, whatever happens in its
//! handler.

use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bum_protocol::{FrameWriter, Method, Status, read_frame};
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{ServerError, ServerResult};
use crate::hashing::HashingWorker;
use crate::images::ImageCache;
use crate::index::MediaIndex;
use crate::tags::TagReader;
use crate::transcode::{Rendition, Transcoder};

/// File served for an empty `GET_FILE` path.
const INDEX_FILE: &str = "index.html";

/// State owned by the coordinator process.
pub struct Coordinator {
    config: CoordinatorConfig,
    index: MediaIndex,
    images: ImageCache,
    transcoder: Transcoder,
    tag_reader: Arc<dyn TagReader>,
}

impl Coordinator {
    /// Wraps an existing index.
    pub fn new(config: CoordinatorConfig, index: MediaIndex, tag_reader: Arc<dyn TagReader>) -> Self {
        let transcoder = Transcoder::new(&config);
        Self {
            config,
            index,
            images: ImageCache::new(),
            transcoder,
            tag_reader,
        }
    }

    /// Scans the library and, if configured, warms the thumbnail cache.
    pub async fn start(config: CoordinatorConfig, tag_reader: Arc<dyn TagReader>) -> ServerResult<Self> {
        info!(root = %config.media_root.display(), "Scanning library");
        let hasher = HashingWorker::spawn()?;
        let index = MediaIndex::scan(&config, Arc::clone(&tag_reader), &hasher).await?;

        let coordinator = Self::new(config, index, tag_reader);
        if coordinator.config.warm_thumbnails {
            coordinator.warm_thumbnails().await;
        }
        Ok(coordinator)
    }

    pub fn index(&self) -> &MediaIndex {
        &self.index
    }

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Renders a thumbnail for every album so first requests hit the cache.
    pub async fn warm_thumbnails(&self) {
        let paths = self.index.cover_paths();
        debug!(count = paths.len(), "Caching thumbnails");
        match self
            .images
            .get_covers(&paths, Rendition::Thumbnail, &self.transcoder, Arc::clone(&self.tag_reader))
            .await
        {
            Ok(_) => info!(cached = self.images.len(), "Thumbnails cached"),
            Err(e) => warn!(error = %e, "Could not warm thumbnail cache"),
        }
    }

    /// Serves requests until the channel closes.
    ///
    /// Returns `Ok(())` when the peer closes the channel cleanly; a torn
    /// frame or a failed write is an error.
    pub async fn serve<R, W>(self: Arc<Self>, mut reader: R, writer: W) -> ServerResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = FrameWriter::new(writer);
        info!("Serving requests");

        loop {
            let Some(frame) = read_frame(&mut reader).await? else {
                info!("Channel closed by front");
                return Ok(());
            };
            let message_id = frame.message_id;

            let method = match Method::try_from(frame.code) {
                Ok(method) => method,
                Err(code) => {
                    warn!(message_id, code, "Unknown method");
                    writer.send(message_id, Status::BadMethod.code(), &[]).await?;
                    continue;
                }
            };

            if method == Method::Transcode {
                match self.song_path(&frame.body) {
                    Some(path) => {
                        self.transcoder.reserve(message_id);
                        let this = Arc::clone(&self);
                        tokio::spawn(this.stream_transcode(message_id, path, writer.clone()));
                    }
                    None => {
                        debug!(message_id, "Transcode of unknown song");
                        writer.send_terminator(message_id, Status::NoMatch.code()).await?;
                    }
                }
                continue;
            }

            let (status, body) = self.respond(method, message_id, &frame.body).await;
            writer.send(message_id, status.code(), &body).await?;
        }
    }

    /// Runs one single-reply handler, turning faults and panics into a
    /// status.
    #[tracing::instrument(level = "debug", skip(self, method, body), fields(method = %method))]
    async fn respond(&self, method: Method, message_id: u32, body: &[u8]) -> (Status, Vec<u8>) {
        let result = match AssertUnwindSafe(self.handle(method, body)).catch_unwind().await {
            Ok(result) => result.and_then(|reply| self.fits(reply)),
            Err(panic) => {
                error!(panic = %panic_message(&*panic), "Handler panicked");
                return (Status::Internal, Vec::new());
            }
        };

        match result {
            Ok(reply) => (Status::Ok, reply),
            Err(e) => {
                let status = e.status();
                if status == Status::Internal {
                    warn!(%status, error = %e, "Request failed");
                } else {
                    debug!(%status, error = %e, "Request failed");
                }
                (status, Vec::new())
            }
        }
    }

    /// Rejects a reply that would not fit in one frame.
    fn fits(&self, reply: Vec<u8>) -> ServerResult<Vec<u8>> {
        if reply.len() > self.config.max_reply_size {
            return Err(ServerError::reply_too_large(reply.len() as u64, self.config.max_reply_size));
        }
        Ok(reply)
    }

    async fn handle(&self, method: Method, body: &[u8]) -> ServerResult<Vec<u8>> {
        match method {
            Method::ListSongs => self.index.songs_json(),
            Method::ListAlbums => self.index.albums_json(),
            Method::AlbumDetails => self.index.album_json(utf8(body)?),
            Method::Thumbnail => self.covers(body, Rendition::Thumbnail).await,
            Method::Cover => self.covers(body, Rendition::Full).await,
            Method::GetFile => self.get_file(utf8(body)?).await,
            Method::CancelTranscode => {
                let handle = utf8(body)?
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| ServerError::bad_request(format!("transcode handle: {e}")))?;
                self.transcoder.cancel_transcode(handle);
                Ok(Vec::new())
            }
            Method::Transcode => Err(ServerError::bad_request("TRANSCODE is a streaming method")),
        }
    }

    fn song_path(&self, body: &[u8]) -> Option<PathBuf> {
        let id = std::str::from_utf8(body).ok()?;
        self.index.song(id).map(|song| song.path.clone())
    }

    async fn covers(&self, body: &[u8], rendition: Rendition) -> ServerResult<Vec<u8>> {
        let ids: Vec<String> = serde_json::from_slice(body)?;
        let paths = self.index.cover_paths_for(&ids);
        self.images
            .get_covers(&paths, rendition, &self.transcoder, Arc::clone(&self.tag_reader))
            .await
    }

    /// Reads a file below the static root.
    async fn get_file(&self, requested: &str) -> ServerResult<Vec<u8>> {
        let requested = requested.trim_start_matches('/');
        let relative = Path::new(if requested.is_empty() { INDEX_FILE } else { requested });

        if !relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(ServerError::denied(relative.display().to_string()));
        }

        let root = tokio::fs::canonicalize(&self.config.static_root).await?;
        let resolved = tokio::fs::canonicalize(root.join(relative)).await?;
        if !resolved.starts_with(&root) {
            return Err(ServerError::denied(relative.display().to_string()));
        }
        let metadata = tokio::fs::metadata(&resolved).await?;
        if metadata.is_dir() {
            return Err(ServerError::not_found(relative.display().to_string()));
        }
        // Checked before reading so an oversized file is never loaded.
        if metadata.len() > self.config.max_reply_size as u64 {
            return Err(ServerError::reply_too_large(metadata.len(), self.config.max_reply_size));
        }

        Ok(tokio::fs::read(&resolved).await?)
    }

    /// Streams one transcode, then its terminator.
    async fn stream_transcode<W>(self: Arc<Self>, message_id: u32, path: PathBuf, writer: FrameWriter<W>)
    where
        W: AsyncWrite + Unpin,
    {
        let outcome = AssertUnwindSafe(self.pump_transcode(message_id, &path, &writer))
            .catch_unwind()
            .await;

        let status = match outcome {
            Ok(Some(status)) => status,
            // Channel is gone; nobody is left to terminate.
            Ok(None) => return,
            Err(panic) => {
                error!(message_id, panic = %panic_message(&*panic), "Transcode task panicked");
                Status::Internal
            }
        };

        debug!(message_id, %status, "Transcode finished");
        if let Err(e) = writer.send_terminator(message_id, status.code()).await {
            warn!(message_id, error = %e, "Could not terminate transcode stream");
        }
    }

    /// Forwards chunks until the transcode ends, returning the terminator
    /// status, or `None` if the channel failed.
    async fn pump_transcode<W>(&self, message_id: u32, path: &Path, writer: &FrameWriter<W>) -> Option<Status>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = match self.transcoder.start(message_id, path).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(message_id, error = %e, "Transcode failed to start");
                return Some(Status::TranscodeError);
            }
        };

        loop {
            match stream.next_chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = writer.send(message_id, Status::Ok.code(), &chunk).await {
                        warn!(message_id, error = %e, "Channel write failed mid-stream");
                        return None;
                    }
                }
                Ok(None) if stream.was_canceled() => return Some(Status::Canceled),
                Ok(None) => return Some(Status::Ok),
                Err(e) => {
                    warn!(message_id, path = %path.display(), error = %e, "Transcode failed");
                    return Some(Status::TranscodeError);
                }
            }
        }
    }
}

fn utf8(body: &[u8]) -> ServerResult<&str> {
    std::str::from_utf8(body).map_err(|e| ServerError::bad_request(format!("body is not UTF-8: {e}")))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bum_protocol::{MAX_BODY_SIZE, RpcClient, unpack_sequence, write_frame};
    use tokio::io::{DuplexStream, WriteHalf};
    use tokio::task::JoinHandle;

    use crate::hashing::content_id;
    use crate::index::tests::{FakeTags, tags};
    use crate::transcode::tests::fake_transcoder;

    struct Harness {
        client: Arc<RpcClient<WriteHalf<DuplexStream>>>,
        coordinator: Arc<Coordinator>,
        serve: JoinHandle<ServerResult<()>>,
        song_id: String,
        album_id: String,
        _dir: tempfile::TempDir,
    }

    async fn harness(transcoder_script: &str) -> Harness {
        harness_with(transcoder_script, MAX_BODY_SIZE as usize).await
    }

    async fn harness_with(transcoder_script: &str, max_reply_size: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        let web = dir.path().join("static");
        std::fs::create_dir_all(media.join("Alb")).unwrap();
        std::fs::create_dir_all(web.join("js")).unwrap();
        std::fs::write(media.join("Alb/t.flac"), b"chunk-data").unwrap();
        std::fs::write(media.join("Alb/cover.jpg"), b"jpeg").unwrap();
        std::fs::write(web.join("index.html"), b"<html>").unwrap();
        std::fs::write(web.join("js/app.js"), b"app()").unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

        let config = CoordinatorConfig::new(&media)
            .with_static_root(&web)
            .with_transcoder(fake_transcoder(dir.path(), transcoder_script))
            .with_chunk_size(4)
            .with_warm_thumbnails(false)
            .with_max_reply_size(max_reply_size);
        let reader = FakeTags::default().with("t.flac", tags("A", "T", "Alb", "1", "2000"));
        let coordinator = Arc::new(Coordinator::start(config, Arc::new(reader)).await.unwrap());

        let (front, back) = tokio::io::duplex(64 * 1024);
        let (back_read, back_write) = tokio::io::split(back);
        let serve = tokio::spawn(Arc::clone(&coordinator).serve(back_read, back_write));

        let (front_read, front_write) = tokio::io::split(front);
        let client = Arc::new(RpcClient::new(front_write));
        let runner = Arc::clone(&client);
        tokio::spawn(async move {
            let _ = runner.run(front_read).await;
        });

        Harness {
            client,
            coordinator,
            serve,
            song_id: format!("{}-2000-1-1", content_id(&["A", "T"])),
            album_id: content_id(&["Alb", "A"]),
            _dir: dir,
        }
    }

    async fn collect(h: &Harness, song_id: &str) -> (Vec<u8>, Option<Status>) {
        let id = h.client.get_message_id();
        let mut sub = h.client.subscribe(Method::Transcode, song_id.as_bytes(), id).await.unwrap();
        let mut out = Vec::new();
        while let Some((status, chunk)) = sub.next().await.unwrap() {
            assert_eq!(status, Status::Ok);
            out.extend_from_slice(&chunk);
        }
        (out, sub.terminal_status())
    }

    #[tokio::test]
    async fn lists_and_details() {
        let h = harness("exit 0").await;

        let (status, body) = h.client.call(Method::ListSongs, b"").await.unwrap();
        assert_eq!(status, Status::Ok);
        let songs: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(songs[&h.song_id]["title"], "T");

        let (status, body) = h.client.call(Method::ListAlbums, b"").await.unwrap();
        assert_eq!(status, Status::Ok);
        let albums: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(albums[&h.album_id]["year"], 2000);

        let (status, body) = h.client.call(Method::AlbumDetails, h.album_id.as_bytes()).await.unwrap();
        assert_eq!(status, Status::Ok);
        let album: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(album["tracks"][0], h.song_id.as_str());

        let (status, body) = h.client.call(Method::AlbumDetails, b"nope").await.unwrap();
        assert_eq!((status, body), (Status::NoMatch, Vec::new()));
    }

    #[tokio::test]
    async fn static_files() {
        let h = harness("exit 0").await;

        let (status, body) = h.client.call(Method::GetFile, b"").await.unwrap();
        assert_eq!((status, body), (Status::Ok, b"<html>".to_vec()));

        let (status, body) = h.client.call(Method::GetFile, b"js/app.js").await.unwrap();
        assert_eq!((status, body), (Status::Ok, b"app()".to_vec()));

        let (status, _) = h.client.call(Method::GetFile, b"missing.txt").await.unwrap();
        assert_eq!(status, Status::NoMatch);

        let (status, _) = h.client.call(Method::GetFile, b"../../etc/passwd").await.unwrap();
        assert_eq!(status, Status::Denied);

        let (status, _) = h.client.call(Method::GetFile, b"js").await.unwrap();
        assert_eq!(status, Status::NoMatch);
    }

    #[tokio::test]
    async fn oversized_replies_fail_alone() {
        let h = harness_with("exit 0", 16).await;
        let web = h.coordinator.config.static_root.clone();
        std::fs::write(web.join("big.bin"), vec![7u8; 64]).unwrap();

        let (status, body) = h.client.call(Method::GetFile, b"big.bin").await.unwrap();
        assert_eq!((status, body), (Status::Internal, Vec::new()));

        // Built in memory, then rejected after the handler returns.
        let (status, body) = h.client.call(Method::ListSongs, b"").await.unwrap();
        assert_eq!((status, body), (Status::Internal, Vec::new()));

        let (status, body) = h.client.call(Method::GetFile, b"index.html").await.unwrap();
        assert_eq!((status, body), (Status::Ok, b"<html>".to_vec()));
        assert!(!h.serve.is_finished());
    }

    #[tokio::test]
    async fn symlink_out_of_static_root_is_denied() {
        let h = harness("exit 0").await;
        let web = h.coordinator.config.static_root.clone();
        std::os::unix::fs::symlink(web.parent().unwrap().join("secret.txt"), web.join("leak.txt")).unwrap();

        let (status, body) = h.client.call(Method::GetFile, b"leak.txt").await.unwrap();
        assert_eq!((status, body), (Status::Denied, Vec::new()));
    }

    #[tokio::test]
    async fn unknown_method_is_bad_method() {
        let (mut front, back) = tokio::io::duplex(4096);
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(Coordinator::new(
            CoordinatorConfig::new(dir.path()),
            MediaIndex::default(),
            Arc::new(FakeTags::default()),
        ));
        let (back_read, back_write) = tokio::io::split(back);
        let serve = tokio::spawn(coordinator.serve(back_read, back_write));

        write_frame(&mut front, 9, 99, b"").await.unwrap();
        let reply = read_frame(&mut front).await.unwrap().unwrap();
        assert_eq!((reply.message_id, reply.code), (9, Status::BadMethod.code()));

        drop(front);
        assert!(serve.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn transcode_streams_chunks_then_ok() {
        let h = harness(r#"exec cat "$3""#).await;
        let (out, terminal) = collect(&h, &h.song_id).await;
        assert_eq!(out, b"chunk-data");
        assert_eq!(terminal, Some(Status::Ok));
    }

    #[tokio::test]
    async fn transcode_failure_after_output() {
        let h = harness(r#"cat "$3"; exit 1"#).await;
        let (out, terminal) = collect(&h, &h.song_id).await;
        assert_eq!(out, b"chunk-data");
        assert_eq!(terminal, Some(Status::TranscodeError));
    }

    #[tokio::test]
    async fn transcode_of_unknown_song() {
        let h = harness("exit 0").await;
        let (out, terminal) = collect(&h, "no-such-song").await;
        assert!(out.is_empty());
        assert_eq!(terminal, Some(Status::NoMatch));
    }

    #[tokio::test]
    async fn cancel_transcode_ends_stream_as_canceled() {
        let h = harness("exec yes").await;

        let id = h.client.get_message_id();
        let mut sub = h
            .client
            .subscribe(Method::Transcode, h.song_id.as_bytes(), id)
            .await
            .unwrap();
        assert!(sub.next().await.unwrap().is_some());

        let (status, _) = h
            .client
            .call(Method::CancelTranscode, id.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(status, Status::Ok);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while sub.next().await.unwrap().is_some() {}
        })
        .await;
        assert!(drained.is_ok());
        assert_eq!(sub.terminal_status(), Some(Status::Canceled));
        assert_eq!(h.coordinator.transcoder().active(), 0);
    }

    #[tokio::test]
    async fn malformed_cancel_is_internal() {
        let h = harness("exit 0").await;
        let (status, _) = h.client.call(Method::CancelTranscode, b"soon").await.unwrap();
        assert_eq!(status, Status::Internal);
    }

    #[tokio::test]
    async fn thumbnails_by_album_id() {
        let h = harness("exec cat").await;
        let body = serde_json::to_vec(&[h.album_id.as_str(), "unknown"]).unwrap();

        let (status, packed) = h.client.call(Method::Thumbnail, &body).await.unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(unpack_sequence(&packed).unwrap(), vec![b"jpeg".to_vec(), Vec::new()]);
        assert_eq!(h.coordinator.images().len(), 1);
    }
}
