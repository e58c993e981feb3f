//! Termination signal listener.
//!
//! SIGINT and SIGTERM (Ctrl-C elsewhere) are forwarded into a small buffered
//! channel. Only the first value is ever read: the listener is consumed by
//! [`SignalListener::recv`], so a second signal can never start a second
//! shutdown.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the signal channel. Extra signals beyond this are dropped.
const SIGNAL_BUFFER: usize = 2;

/// The external request that starts shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT or Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("interrupt"),
            Self::Terminate => f.write_str("terminate"),
        }
    }
}

/// Receives termination signals for the lifetime of the process.
pub struct SignalListener {
    rx: mpsc::Receiver<Termination>,
}

impl SignalListener {
    /// Register the OS signal handlers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        forward_signals(tx)?;
        debug!("Signal handlers installed");
        Ok(Self { rx })
    }

    /// A listener fed by an existing channel instead of the OS.
    pub fn from_channel(rx: mpsc::Receiver<Termination>) -> Self {
        Self { rx }
    }

    /// Wait for the first termination request.
    ///
    /// If every sender is gone the future stays pending; the process then
    /// only stops on a server failure.
    pub async fn recv(mut self) -> Termination {
        match self.rx.recv().await {
            Some(signal) => signal,
            None => {
                warn!("Signal channel closed, waiting indefinitely");
                std::future::pending().await
            }
        }
    }
}

#[cfg(unix)]
fn forward_signals(tx: mpsc::Sender<Termination>) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => Termination::Interrupt,
                Some(()) = terminate.recv() => Termination::Terminate,
                else => break,
            };
            if tx.try_send(received).is_err() {
                debug!(signal = %received, "Signal dropped, shutdown already requested");
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn forward_signals(tx: mpsc::Sender<Termination>) -> std::io::Result<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.try_send(Termination::Interrupt).is_err() {
                debug!("Ctrl-C dropped, shutdown already requested");
            }
        }
    });
    Ok(())
}
