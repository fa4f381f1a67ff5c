//! Starting the front process and handing it the channel.
//!
//! The coordinator creates a connected Unix stream pair and re-executes its
//! own binary as `bum front`, with one end of the pair as the child's
//! standard input. The child adopts standard input as its channel.

use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use bum_server::TranscodeFormat;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{CliError, CliResult};

/// Exit code of a front that lost its coordinator.
pub const FRONT_COORDINATOR_GONE: u8 = 2;

/// How to start the front.
#[derive(Debug, Clone)]
pub struct FrontLaunch {
    /// Executable to run; the current binary by default.
    pub program: Option<PathBuf>,
    pub listen: String,
    pub format: TranscodeFormat,
    pub verbose: bool,
    pub log_format: Option<String>,
}

impl FrontLaunch {
    pub fn new(listen: impl Into<String>, format: TranscodeFormat) -> Self {
        Self {
            program: None,
            listen: listen.into(),
            format,
            verbose: false,
            log_format: None,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if let Some(ref format) = self.log_format {
            args.extend(["--log-format".to_string(), format.clone()]);
        }
        args.extend([
            "front".to_string(),
            "--listen".to_string(),
            self.listen.clone(),
            "--format".to_string(),
            self.format.as_arg().to_string(),
        ]);
        args
    }

    /// Spawns the front and returns it with the coordinator's end of the
    /// channel.
    pub fn spawn(&self) -> CliResult<(FrontProcess, UnixStream)> {
        let (ours, theirs) = std::os::unix::net::UnixStream::pair()?;
        let program = match self.program {
            Some(ref program) => program.clone(),
            None => std::env::current_exe()?,
        };

        // The Command owns the child's end; it is closed in this process
        // once the statement ends.
        let child = Command::new(&program)
            .args(self.args())
            .stdin(Stdio::from(OwnedFd::from(theirs)))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CliError::Launch(format!("failed to start {}: {e}", program.display())))?;
        info!(pid = child.id(), listen = %self.listen, "Front started");

        ours.set_nonblocking(true)?;
        Ok((FrontProcess { child }, UnixStream::from_std(ours)?))
    }
}

/// The running front.
#[derive(Debug)]
pub struct FrontProcess {
    child: Child,
}

impl FrontProcess {
    /// Waits for the front to exit.
    pub async fn wait(&mut self) -> CliResult<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Kills the front and reaps it.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill the front");
        }
    }
}

/// Exit code to report for a front that exited with `status`: its own code,
/// or 1 if it was killed by a signal.
pub fn exit_code(status: ExitStatus) -> u8 {
    match status.code() {
        Some(code) => u8::try_from(code).unwrap_or(1),
        None => {
            debug!(%status, "Front died from a signal");
            1
        }
    }
}

/// Adopts standard input as the channel to the coordinator.
pub fn adopt_stdin() -> CliResult<UnixStream> {
    let fd = std::io::stdin().as_fd().try_clone_to_owned()?;
    let stream = std::os::unix::net::UnixStream::from(fd);
    stream.set_nonblocking(true)?;
    Ok(UnixStream::from_std(stream)?)
}
