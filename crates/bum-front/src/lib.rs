//! The bum HTTP front.
//!
//! The front is the unprivileged half of the media server. It holds no
//! library state of its own: every HTTP request becomes one exchange with
//! the coordinator over the shared channel, and the reply is relayed back.
//!
//! # Example
//!
//! ```rust,no_run
//! use bum_front::{FrontExit, run};
//!
//! # async fn serve(channel: tokio::net::UnixStream) -> Result<(), Box<dyn std::error::Error>> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! let (reader, writer) = channel.into_split();
//! match run(reader, Box::new(writer), listener, "audio/webm").await? {
//!     FrontExit::CoordinatorGone => eprintln!("coordinator went away"),
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod routes;
mod stream;

use std::future::IntoFuture;
use std::sync::Arc;

use bum_protocol::RpcClient;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use error::{FrontError, FrontResult};
pub use routes::{AppState, router};

/// Write half of the channel to the coordinator.
pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The front's RPC client.
pub type Rpc = RpcClient<ChannelWriter>;

/// Why the front stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontExit {
    /// The channel to the coordinator ended.
    CoordinatorGone,
}

/// Serves HTTP on `listener` until the coordinator channel ends.
///
/// `stream_type` is the content type sent with transcoded streams.
pub async fn run<R>(
    reader: R,
    writer: ChannelWriter,
    listener: TcpListener,
    stream_type: &'static str,
) -> FrontResult<FrontExit>
where
    R: AsyncRead + Unpin,
{
    let rpc = Arc::new(Rpc::new(writer));
    let app = router(AppState::new(Arc::clone(&rpc), stream_type));

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Front listening");
    }

    tokio::select! {
        result = rpc.run(reader) => {
            if let Err(e) = result {
                warn!(error = %e, "Coordinator channel failed");
            }
            info!("Coordinator gone; stopping front");
            Ok(FrontExit::CoordinatorGone)
        }
        result = axum::serve(listener, app).into_future() => {
            result?;
            // axum::serve only returns on listener failure.
            Err(FrontError::Io(std::io::Error::other("http listener stopped")))
        }
    }
}
