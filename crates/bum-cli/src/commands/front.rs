//! Front command: the sandboxed HTTP process started by `bum serve`.

use std::process::ExitCode;

use bum_core::{SandboxLevel, restrict};
use bum_front::FrontExit;
use bum_server::TranscodeFormat;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::CliResult;
use crate::launcher::{FRONT_COORDINATOR_GONE, adopt_stdin};

/// Serves HTTP on `listen` until the coordinator goes away.
pub async fn run(listen: &str, format: TranscodeFormat) -> CliResult<ExitCode> {
    let channel = adopt_stdin()?;
    restrict(SandboxLevel::Front);

    let listener = TcpListener::bind(listen).await?;
    let (reader, writer) = channel.into_split();

    match bum_front::run(reader, Box::new(writer), listener, format.content_type()).await? {
        FrontExit::CoordinatorGone => {
            info!("Exiting");
            Ok(ExitCode::from(FRONT_COORDINATOR_GONE))
        }
    }
}
