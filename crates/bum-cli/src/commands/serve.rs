//! Serve command: the coordinator.
//!
//! Starts the front, scans the library and answers the front's requests
//! until either side goes away:
//! - the front exits: its exit code becomes ours (1 if it died from a signal)
//! - SIGINT or SIGTERM: the front is killed and we exit cleanly

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use bum_core::{SandboxLevel, restrict};
use bum_server::{Coordinator, SignalHandler, SymphoniaTagReader};
use tracing::{error, info};

use crate::config::ServeSettings;
use crate::error::CliResult;
use crate::launcher::{FrontLaunch, exit_code};

/// Runs the coordinator with the front described by `launch`.
pub async fn run(settings: ServeSettings, launch: FrontLaunch) -> CliResult<ExitCode> {
    let signals = SignalHandler::new();
    signals.spawn_listener()?;

    let (mut front, channel) = launch.spawn()?;
    restrict(SandboxLevel::Coordinator);

    let (reader, writer) = channel.into_split();
    let coordinator = async {
        let started = Instant::now();
        let coordinator = Coordinator::start(settings.coordinator, Arc::new(SymphoniaTagReader)).await?;
        info!(
            songs = coordinator.index().song_count(),
            albums = coordinator.index().album_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Library ready"
        );
        Arc::new(coordinator).serve(reader, writer).await
    };

    tokio::select! {
        result = coordinator => {
            if let Err(e) = result {
                error!(error = %e, "Coordinator failed");
                front.kill().await;
                return Err(e.into());
            }
            let status = front.wait().await?;
            info!(%status, "Front exited");
            Ok(ExitCode::from(exit_code(status)))
        }
        signal = signals.wait() => {
            info!(%signal, "Stopping");
            front.kill().await;
            Ok(ExitCode::SUCCESS)
        }
    }
}
