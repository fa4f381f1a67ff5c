//! Transcoder subprocess supervision.
//!
//! Every piece of decode/encode work is delegated to one external
//! executable, invoked as `<binary> <subcommand> [args...]`:
//!
//! - `transcode-audio <format> <path>` writes the encoded stream to stdout.
//! - `get-thumbnails` / `get-cover` read cover records from stdin and answer
//!   with cover records on stdout, in any order.
//!
//! Transcodes are tracked per handle (the message id of the request) so a
//! cancel can find them:
//!
//! ```text
//! absent -> PendingSpawn -> Running -> (completed | failed | canceled) -> absent
//! ```
//!
//! A cancel that lands while the handle is still `PendingSpawn` removes the
//! entry; the spawning side notices, kills its fresh child and returns an
//! empty stream.

use std::collections::HashMap;
use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use bum_protocol::{CoverRecord, read_cover_record, write_cover_record};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use crate::config::{CoordinatorConfig, TranscodeFormat};
use crate::error::TranscodeError;
use crate::tags::TagReader;

/// Image extensions passed to the cover subprocess as-is.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Which size of cover art to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rendition {
    Thumbnail,
    Full,
}

impl Rendition {
    fn subcommand(self) -> &'static str {
        match self {
            Self::Thumbnail => "get-thumbnails",
            Self::Full => "get-cover",
        }
    }
}

#[derive(Debug)]
enum HandleState {
    PendingSpawn,
    Running(Arc<Notify>),
}

type HandleMap = Arc<Mutex<HashMap<u32, HandleState>>>;

fn lock(handles: &HandleMap) -> MutexGuard<'_, HashMap<u32, HandleState>> {
    handles.lock().unwrap_or_else(|e| e.into_inner())
}

/// Spawns and tracks transcoder subprocesses.
#[derive(Debug)]
pub struct Transcoder {
    binary: PathBuf,
    format: TranscodeFormat,
    chunk_size: usize,
    channel_depth: usize,
    handles: HandleMap,
}

impl Transcoder {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            binary: config.transcoder.clone(),
            format: config.transcode_format,
            chunk_size: config.chunk_size,
            channel_depth: config.cover_channel_depth.max(1),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of transcodes that are pending or running.
    pub fn active(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Records `handle` as about to spawn.
    ///
    /// Call this before handing the request off to another task, so that a
    /// cancel arriving in between finds the handle.
    pub fn reserve(&self, handle: u32) {
        lock(&self.handles).insert(handle, HandleState::PendingSpawn);
    }

    /// Reserves `handle` and starts transcoding `path`.
    pub async fn transcode(&self, handle: u32, path: &Path) -> Result<TranscodeStream, TranscodeError> {
        self.reserve(handle);
        self.start(handle, path).await
    }

    /// Spawns the transcoder for a handle previously passed to
    /// [`Transcoder::reserve`].
    ///
    /// If the handle was canceled in the meantime the child is killed at
    /// once and the returned stream is empty.
    pub async fn start(&self, handle: u32, path: &Path) -> Result<TranscodeStream, TranscodeError> {
        let spawned = Command::new(&self.binary)
            .arg("transcode-audio")
            .arg(self.format.as_arg())
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                lock(&self.handles).remove(&handle);
                return Err(TranscodeError::Spawn(e));
            }
        };

        let kill = Arc::new(Notify::new());
        let still_wanted = {
            let mut handles = lock(&self.handles);
            match handles.get(&handle) {
                Some(HandleState::PendingSpawn) => {
                    handles.insert(handle, HandleState::Running(Arc::clone(&kill)));
                    true
                }
                _ => false,
            }
        };

        if !still_wanted {
            debug!(handle, "Canceled before spawn completed, killing transcoder");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Ok(TranscodeStream::canceled(handle, Arc::clone(&self.handles)));
        }

        let Some(stdout) = child.stdout.take() else {
            lock(&self.handles).remove(&handle);
            return Err(TranscodeError::Io(std::io::Error::other("transcoder stdout not captured")));
        };

        info!(handle, path = %path.display(), "Transcoding");
        Ok(TranscodeStream {
            handle,
            child: Some(child),
            stdout: Some(stdout),
            kill,
            handles: Arc::clone(&self.handles),
            chunk_size: self.chunk_size,
            canceled: false,
            finished: false,
        })
    }

    /// Stops the transcode recorded under `handle`.
    ///
    /// A running child is killed; a pending spawn is abandoned; an unknown
    /// or finished handle is ignored.
    pub fn cancel_transcode(&self, handle: u32) {
        let mut handles = lock(&self.handles);
        match handles.get(&handle) {
            Some(HandleState::Running(kill)) => {
                debug!(handle, "Killing running transcoder");
                kill.notify_one();
            }
            Some(HandleState::PendingSpawn) => {
                debug!(handle, "Abandoning pending transcode");
                handles.remove(&handle);
            }
            None => debug!(handle, "Nothing to cancel"),
        }
    }

    /// Produces cover art for `paths` through one long-lived subprocess.
    ///
    /// A feeder task reads each source and writes it to the subprocess while
    /// a reader task publishes the subprocess's answers as they come.
    /// Sources with no art are published as `None` without a round trip.
    pub fn get_cover_stream(
        &self,
        paths: Vec<PathBuf>,
        rendition: Rendition,
        tag_reader: Arc<dyn TagReader>,
    ) -> Result<CoverStream, TranscodeError> {
        let mut child = Command::new(&self.binary)
            .arg(rendition.subcommand())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::Spawn)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TranscodeError::Io(std::io::Error::other("cover pipes not captured")));
        };

        let (tx, rx) = mpsc::channel(self.channel_depth);
        debug!(count = paths.len(), ?rendition, "Starting cover batch");

        tokio::spawn(feed_covers(paths, stdin, tag_reader, tx.clone()));
        tokio::spawn(read_covers(child, stdout, tx));

        Ok(CoverStream { rx })
    }
}

async fn load_cover_source(path: &Path, tag_reader: Arc<dyn TagReader>) -> Option<Vec<u8>> {
    let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)));

    let data = if is_image {
        tokio::fs::read(path).await.map_err(|e| e.to_string())
    } else {
        let path = path.to_path_buf();
        match tokio::task::spawn_blocking(move || tag_reader.extract_cover(&path)).await {
            Ok(Ok(Some(data))) => Ok(data),
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    };

    match data {
        Ok(data) if !data.is_empty() => Some(data),
        Ok(_) => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read cover source");
            None
        }
    }
}

async fn feed_covers(
    paths: Vec<PathBuf>,
    mut stdin: tokio::process::ChildStdin,
    tag_reader: Arc<dyn TagReader>,
    tx: mpsc::Sender<(PathBuf, Option<Vec<u8>>)>,
) {
    let mut broken = false;
    for path in paths {
        let data = if broken {
            None
        } else {
            load_cover_source(&path, Arc::clone(&tag_reader)).await
        };

        let Some(data) = data else {
            if tx.send((path, None)).await.is_err() {
                return;
            }
            continue;
        };

        let record = CoverRecord::new(path.as_os_str().as_bytes(), data);
        if let Err(e) = write_cover_record(&mut stdin, &record).await {
            warn!(path = %path.display(), error = %e, "Cover subprocess stopped accepting input");
            broken = true;
            if tx.send((path, None)).await.is_err() {
                return;
            }
        }
    }
    // Dropping stdin closes it; the subprocess finishes its queue and exits.
}

async fn read_covers(mut child: Child, mut stdout: ChildStdout, tx: mpsc::Sender<(PathBuf, Option<Vec<u8>>)>) {
    loop {
        match read_cover_record(&mut stdout).await {
            Ok(Some(record)) => {
                let path = PathBuf::from(OsString::from_vec(record.path.clone()));
                if tx.send((path, record.into_data())).await.is_err() {
                    debug!("Cover consumer went away");
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Malformed cover output, ending batch");
                break;
            }
        }
    }

    match child.wait().await {
        Ok(status) if !status.success() => warn!(%status, "Cover subprocess failed"),
        Err(e) => warn!(error = %e, "Cannot reap cover subprocess"),
        Ok(_) => {}
    }
}

/// Cover results of one batch, as `(source path, art)`.
///
/// Ends once every source has been answered or the subprocess is gone.
pub struct CoverStream {
    rx: mpsc::Receiver<(PathBuf, Option<Vec<u8>>)>,
}

impl CoverStream {
    pub async fn next(&mut self) -> Option<(PathBuf, Option<Vec<u8>>)> {
        self.rx.recv().await
    }
}

/// Output of one running transcode.
///
/// Dropping the stream kills the subprocess and forgets the handle.
#[derive(Debug)]
pub struct TranscodeStream {
    handle: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    kill: Arc<Notify>,
    handles: HandleMap,
    chunk_size: usize,
    canceled: bool,
    finished: bool,
}

impl TranscodeStream {
    fn canceled(handle: u32, handles: HandleMap) -> Self {
        Self {
            handle,
            child: None,
            stdout: None,
            kill: Arc::new(Notify::new()),
            handles,
            chunk_size: 0,
            canceled: true,
            finished: true,
        }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// True if the stream ended because of a cancel rather than running to
    /// completion.
    pub fn was_canceled(&self) -> bool {
        self.canceled
    }

    /// Reads the next chunk of output.
    ///
    /// Returns `Ok(None)` at the end of output. A transcoder that exited
    /// unsuccessfully is reported as an error only after all its output was
    /// returned; a canceled one simply ends.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TranscodeError> {
        if self.finished {
            return Ok(None);
        }
        let Some(stdout) = self.stdout.as_mut() else {
            return self.finish().await;
        };

        let mut buf = vec![0u8; self.chunk_size];
        let read = tokio::select! {
            read = stdout.read(&mut buf) => Some(read),
            () = self.kill.notified() => None,
        };

        match read {
            Some(Ok(0)) => self.finish().await,
            Some(Ok(n)) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Some(Err(e)) => {
                if let Some(child) = self.child.as_mut() {
                    let _ = child.start_kill();
                }
                let _ = self.finish().await;
                Err(TranscodeError::Io(e))
            }
            None => {
                debug!(handle = self.handle, "Transcode canceled");
                self.canceled = true;
                if let Some(child) = self.child.as_mut() {
                    let _ = child.start_kill();
                }
                self.finish().await
            }
        }
    }

    async fn finish(&mut self) -> Result<Option<Vec<u8>>, TranscodeError> {
        self.finished = true;
        self.stdout = None;
        self.forget();

        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        let status = child.wait().await?;
        if self.canceled || status.success() {
            debug!(handle = self.handle, canceled = self.canceled, "Transcode ended");
            Ok(None)
        } else {
            warn!(handle = self.handle, %status, "Transcoder failed");
            Err(TranscodeError::Exit { status })
        }
    }

    fn forget(&self) {
        let mut handles = lock(&self.handles);
        if let Some(HandleState::Running(kill)) = handles.get(&self.handle) {
            if Arc::ptr_eq(kill, &self.kill) {
                handles.remove(&self.handle);
            }
        }
    }
}

impl Drop for TranscodeStream {
    fn drop(&mut self) {
        if !self.finished {
            self.forget();
        }
    }
}
