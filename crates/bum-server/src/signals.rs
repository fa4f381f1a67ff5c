//! Shutdown signals for the coordinator.
//!
//! SIGINT and SIGTERM both stop the coordinator; the launcher reacts by
//! killing the front and exiting cleanly.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// A signal that asks the coordinator to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

/// Tracks whether a shutdown signal has arrived.
#[derive(Clone)]
pub struct SignalHandler {
    tx: Arc<watch::Sender<Option<Signal>>>,
    rx: watch::Receiver<Option<Signal>>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx: Arc::new(tx), rx }
    }

    /// Installs the SIGINT/SIGTERM handlers and spawns the listener task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_listener(&self) -> io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let tx = Arc::clone(&self.tx);

        tokio::spawn(async move {
            let received = tokio::select! {
                _ = sigterm.recv() => Signal::Terminate,
                _ = sigint.recv() => Signal::Interrupt,
            };
            info!(signal = %received, "Shutdown requested");
            let _ = tx.send(Some(received));
            debug!("Signal listener stopped");
        });
        Ok(())
    }

    /// Records `signal` as received, as if it had been delivered.
    #[cfg(test)]
    pub(crate) fn trigger(&self, signal: Signal) {
        let _ = self.tx.send(Some(signal));
    }

    /// The signal received so far, if any.
    #[cfg(test)]
    pub(crate) fn received(&self) -> Option<Signal> {
        *self.rx.borrow()
    }

    /// Waits until a shutdown signal arrives.
    pub async fn wait(&self) -> Signal {
        let mut rx = self.rx.clone();
        loop {
            if let Some(signal) = *rx.borrow_and_update() {
                return signal;
            }
            if rx.changed().await.is_err() {
                // Sender is held by `self`, so this only happens at teardown.
                std::future::pending::<()>().await;
            }
        }
    }
}
