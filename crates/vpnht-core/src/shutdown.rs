//! Shutdown coordinator: the ordered, bounded teardown after a termination
//! request.
//!
//! ```text
//! Running ─signal─▶ SignalReceived ─▶ ShuttingDown ─server closed─▶
//!   EndpointClosed ─sessions stopped─▶ SessionsStopped ─grace─▶ Terminated
//! ```
//!
//! Every step is best-effort. A failing or panicking step is logged and
//! recorded in the [`ShutdownReport`], and the sequence moves on. The
//! coordinator is consumed by [`ShutdownCoordinator::run`], so it can only
//! ever run once.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vpnht_config::ShutdownConfig;

use crate::collab::SessionRegistry;
use crate::ipc::server::RunningServer;
use crate::ipc::transport::Endpoint;
use crate::outcome::{BestEffort, panic_message};
use crate::pidfile::PidFile;
use crate::signals::Termination;
use crate::ticker::TickerHandle;

/// Externally observable lifecycle phases, in the order they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Starting,
    Running,
    SignalReceived,
    ShuttingDown,
    EndpointClosed,
    SessionsStopped,
    Terminated,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::SignalReceived => "signal_received",
            Self::ShuttingDown => "shutting_down",
            Self::EndpointClosed => "endpoint_closed",
            Self::SessionsStopped => "sessions_stopped",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Teardown steps recorded in a [`ShutdownReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    StopServer,
    StopTicker,
    RemoveEndpoint,
    StopSessions,
    ReleasePidFile,
}

/// What happened during shutdown. Never an error: teardown always completes.
#[derive(Debug)]
pub struct ShutdownReport {
    pub signal: Termination,
    pub steps: Vec<(TeardownStep, BestEffort)>,
    pub sessions_total: usize,
    pub sessions_failed: usize,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn outcome(&self, step: TeardownStep) -> Option<&BestEffort> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    /// True when every step completed without recovery.
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|(_, o)| o.is_done())
    }
}

/// Owns every resource teardown has to release.
pub struct ShutdownCoordinator {
    pub(crate) server: RunningServer,
    pub(crate) endpoint: Endpoint,
    pub(crate) ticker: TickerHandle,
    pub(crate) watcher: CancellationToken,
    pub(crate) sessions: Arc<dyn SessionRegistry>,
    pub(crate) pid_file: Option<PidFile>,
    pub(crate) config: ShutdownConfig,
    pub(crate) phase: watch::Sender<LifecyclePhase>,
}

impl ShutdownCoordinator {
    /// Drive teardown to completion.
    pub async fn run(self, signal: Termination) -> ShutdownReport {
        let Self {
            server,
            endpoint,
            ticker,
            watcher,
            sessions,
            pid_file,
            config,
            phase,
        } = self;
        let started = Instant::now();
        let mut steps = Vec::with_capacity(5);

        publish(&phase, LifecyclePhase::SignalReceived);
        info!(signal = %signal, "Termination requested, shutting down");
        publish(&phase, LifecyclePhase::ShuttingDown);
        watcher.cancel();

        let (server, ticker) = tokio::join!(
            server.shutdown(config.server_window()),
            ticker.stop(config.ticker_policy, config.ticker_join()),
        );
        steps.push((TeardownStep::StopServer, server));
        steps.push((TeardownStep::StopTicker, ticker));

        steps.push((TeardownStep::RemoveEndpoint, endpoint.remove_artifact()));
        publish(&phase, LifecyclePhase::EndpointClosed);
        tokio::time::sleep(config.endpoint_grace()).await;

        let sessions = sessions.active_sessions();
        let sessions_total = sessions.len();
        let mut sessions_failed = 0;
        info!(count = sessions_total, "Stopping active sessions");

        for session in sessions {
            let id = session.id().to_string();
            let stopping = tokio::spawn(async move { session.stop().await });
            match stopping.await {
                Ok(Ok(())) => debug!(session = %id, "Session stopped"),
                Ok(Err(e)) => {
                    sessions_failed += 1;
                    warn!(session = %id, error = %e, "Session failed to stop");
                }
                Err(e) => {
                    sessions_failed += 1;
                    let reason = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        "stop task cancelled".to_string()
                    };
                    error!(session = %id, panic = %reason, "Session stop panicked");
                }
            }
        }
        let sessions_outcome = if sessions_failed == 0 {
            BestEffort::Done
        } else {
            BestEffort::recovered(format!(
                "{sessions_failed} of {sessions_total} sessions failed to stop"
            ))
        };
        steps.push((TeardownStep::StopSessions, sessions_outcome));
        publish(&phase, LifecyclePhase::SessionsStopped);
        tokio::time::sleep(config.session_grace()).await;

        if let Some(pid_file) = pid_file {
            steps.push((TeardownStep::ReleasePidFile, pid_file.release()));
        }

        let elapsed = started.elapsed();
        publish(&phase, LifecyclePhase::Terminated);
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            sessions = sessions_total,
            failed = sessions_failed,
            "Shutdown complete"
        );

        ShutdownReport {
            signal,
            steps,
            sessions_total,
            sessions_failed,
            elapsed,
        }
    }
}

fn publish(tx: &watch::Sender<LifecyclePhase>, phase: LifecyclePhase) {
    debug!(phase = %phase, "Lifecycle phase");
    tx.send_replace(phase);
}
