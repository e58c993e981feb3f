//! Service lifecycle orchestrator: startup, serve, shutdown.
//!
//! Startup is strictly sequential and every step is fatal on failure:
//! PID file, authentication, stale-state cleanup, route registration,
//! host watcher, transport preparation, request server, background ticker.
//! Once running, the orchestrator waits for either a termination request or a server
//! failure and hands over to the [`ShutdownCoordinator`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vpnht_config::{ServiceConfig, TickerPolicy};

use crate::build_info;
use crate::collab::{CollaboratorError, Collaborators};
use crate::ipc::server::{RequestServer, ServeError, ServerLimits};
use crate::ipc::transport::{self, BoundAddress, TransportError, TransportKind};
use crate::pidfile::{PidFile, PidFileError};
use crate::shutdown::{LifecyclePhase, ShutdownCoordinator, ShutdownReport};
use crate::signals::{SignalListener, Termination};
use crate::ticker;

/// Fatal lifecycle errors. Any of these makes the process exit non-zero.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error(transparent)]
    PidFile(#[from] PidFileError),

    #[error("authentication init failed: {0}")]
    Auth(#[source] CollaboratorError),

    #[error("stale state cleanup failed: {0}")]
    Cleanup(#[source] CollaboratorError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("request server failed: {0}")]
    Serve(#[from] ServeError),
}

/// The service, configured but not yet started.
pub struct Daemon {
    config: Arc<ServiceConfig>,
    collaborators: Collaborators,
    phase: watch::Sender<LifecyclePhase>,
}

impl Daemon {
    pub fn new(config: Arc<ServiceConfig>, collaborators: Collaborators) -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Starting);
        Self {
            config,
            collaborators,
            phase,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Observe lifecycle phase transitions.
    pub fn phases(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// Run the whole lifecycle, driven by OS termination signals.
    pub async fn run(self) -> Result<ShutdownReport, ServiceError> {
        let signals = SignalListener::install().map_err(ServiceError::Signals)?;
        let running = self.start().await?;
        running.serve_until(signals.recv()).await
    }

    /// Bring the service up to the serving state.
    ///
    /// On error everything acquired so far is released again.
    pub async fn start(self) -> Result<RunningDaemon, ServiceError> {
        let Self {
            config,
            collaborators,
            phase,
        } = self;

        info!(
            version = build_info::VERSION,
            git_hash = build_info::GIT_HASH,
            development = config.service.development,
            "vpnht service starting"
        );
        if build_info::is_dirty() {
            warn!(build = %build_info::version_string(), "Running a build from a modified tree");
        }

        let pid_file = PidFile::acquire(&config.service.pid_file)?;

        let Bootstrapped {
            listener,
            endpoint,
            router,
            watcher,
        } = match bootstrap(&config, &collaborators).await {
            Ok(parts) => parts,
            Err(e) => {
                let _ = pid_file.release();
                return Err(e);
            }
        };

        let server = RequestServer::new(router, ServerLimits::from(&config.server)).start(listener);
        let ticker = ticker::spawn(Arc::clone(&collaborators.pinger));

        let address = endpoint.address().clone();
        info!(endpoint = %address, "vpnht service running");
        phase.send_replace(LifecyclePhase::Running);

        Ok(RunningDaemon {
            address,
            coordinator: ShutdownCoordinator {
                server,
                endpoint,
                ticker,
                watcher,
                sessions: Arc::clone(&collaborators.sessions),
                pid_file: Some(pid_file),
                config: config.shutdown.clone(),
                phase,
            },
        })
    }
}

struct Bootstrapped {
    listener: transport::Listener,
    endpoint: transport::Endpoint,
    router: axum::Router,
    /// Stops the host watcher.
    watcher: CancellationToken,
}

/// Bootstrap steps between the PID file and the server start.
async fn bootstrap(
    config: &ServiceConfig,
    collaborators: &Collaborators,
) -> Result<Bootstrapped, ServiceError> {
    collaborators.auth.init().await.map_err(ServiceError::Auth)?;
    collaborators
        .cleaner
        .check_and_clean()
        .await
        .map_err(ServiceError::Cleanup)?;

    let router = collaborators.routes.register(axum::Router::new());

    let watcher = CancellationToken::new();
    collaborators.watcher.start(watcher.clone());
    debug!("Host watcher started");

    match bind(config).await {
        Ok((listener, endpoint)) => Ok(Bootstrapped {
            listener,
            endpoint,
            router,
            watcher,
        }),
        Err(e) => {
            watcher.cancel();
            Err(e.into())
        }
    }
}

async fn bind(
    config: &ServiceConfig,
) -> Result<(transport::Listener, transport::Endpoint), TransportError> {
    let kind = TransportKind::select(&config.transport)?;
    transport::prepare(&kind).await
}

/// A started service, serving until told to stop.
pub struct RunningDaemon {
    address: BoundAddress,
    coordinator: ShutdownCoordinator,
}

impl RunningDaemon {
    /// Where the control API is reachable.
    pub fn endpoint(&self) -> &BoundAddress {
        &self.address
    }

    pub fn phases(&self) -> watch::Receiver<LifecyclePhase> {
        self.coordinator.phase.subscribe()
    }

    /// Serve until `termination` resolves, then shut down.
    ///
    /// If the request server fails first, the endpoint and PID file are
    /// cleaned up and the failure is returned. Sessions are left to the
    /// process exit in that case.
    pub async fn serve_until<F>(mut self, termination: F) -> Result<ShutdownReport, ServiceError>
    where
        F: Future<Output = Termination>,
    {
        let failure = tokio::select! {
            signal = termination => return Ok(self.coordinator.run(signal).await),
            err = self.coordinator.server.failed() => err,
        };

        error!(error = %failure, endpoint = %self.address, "Request server failed, exiting");
        self.abandon().await;
        Err(ServiceError::Serve(failure))
    }

    async fn abandon(self) {
        let ShutdownCoordinator {
            endpoint,
            ticker,
            watcher,
            pid_file,
            config,
            phase,
            ..
        } = self.coordinator;

        watcher.cancel();
        let _ = ticker.stop(TickerPolicy::Cancel, config.ticker_join()).await;
        let _ = endpoint.remove_artifact();
        if let Some(pid_file) = pid_file {
            let _ = pid_file.release();
        }
        phase.send_replace(LifecyclePhase::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::BoxFuture;
    use crate::builtin::NoopWatcher;
    use crate::collab::{
        Authenticator, BackgroundTask, Session, SessionRegistry, StaleStateCleaner,
    };

    struct Auth(bool);

    impl Authenticator for Auth {
        fn init(&self) -> BoxFuture<'_, Result<(), CollaboratorError>> {
            let ok = self.0;
            Box::pin(async move {
                if ok {
                    Ok(())
                } else {
                    Err(CollaboratorError::Failed("no credentials".to_string()))
                }
            })
        }
    }

    struct Cleaner;

    impl StaleStateCleaner for Cleaner {
        fn check_and_clean(&self) -> BoxFuture<'_, Result<(), CollaboratorError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct Ticker {
        started: AtomicBool,
    }

    impl BackgroundTask for Ticker {
        fn name(&self) -> &str {
            "test-ticker"
        }

        fn run(&self, cancel: CancellationToken) -> BoxFuture<'_, ()> {
            self.started.store(true, Ordering::SeqCst);
            Box::pin(async move { cancel.cancelled().await })
        }
    }

    struct NoSessions;

    impl SessionRegistry for NoSessions {
        fn active_sessions(&self) -> Vec<Arc<dyn Session>> {
            Vec::new()
        }
    }

    fn collaborators(auth_ok: bool, ticker: Arc<Ticker>) -> Collaborators {
        Collaborators {
            auth: Arc::new(Auth(auth_ok)),
            cleaner: Arc::new(Cleaner),
            routes: Arc::new(|router: axum::Router| router),
            watcher: Arc::new(NoopWatcher),
            pinger: ticker,
            sessions: Arc::new(NoSessions),
        }
    }

    fn config(tmp: &TempDir) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.service.pid_file = tmp.path().join("vpnht.pid").display().to_string();
        config.transport.mode = vpnht_config::TransportMode::Tcp;
        config.transport.tcp_port = 0;
        config.shutdown.endpoint_grace_ms = 10;
        config.shutdown.session_grace_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_auth_failure_releases_pid_file() {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(config(&tmp));
        let ticker = Arc::new(Ticker::default());

        let daemon = Daemon::new(config.clone(), collaborators(false, ticker.clone()));
        let err = daemon.start().await.err().unwrap();

        assert!(matches!(err, ServiceError::Auth(_)));
        assert!(!std::path::Path::new(&config.service.pid_file).exists());
        assert!(!ticker.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(config(&tmp));
        let ticker = Arc::new(Ticker::default());

        let daemon = Daemon::new(config.clone(), collaborators(true, ticker));
        let phases = daemon.phases();
        let running = daemon.start().await.unwrap();
        assert_eq!(*phases.borrow(), LifecyclePhase::Running);
        assert!(matches!(running.endpoint(), BoundAddress::LoopbackTcp(_)));

        let report = running
            .serve_until(async { Termination::Interrupt })
            .await
            .unwrap();
        assert_eq!(report.signal, Termination::Interrupt);
        assert!(report.is_clean());
        assert_eq!(*phases.borrow(), LifecyclePhase::Terminated);
        assert!(!std::path::Path::new(&config.service.pid_file).exists());
    }
}
