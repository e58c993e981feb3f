//! Contracts the lifecycle requires from its external collaborators.
//!
//! The orchestrator never looks inside authentication, cleanup, routing,
//! watching, pinging, or VPN sessions. It only calls the capabilities declared here,
//! in a fixed order, and decides what a failure means for the process.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::BoxFuture;

/// Errors reported by bootstrap collaborators. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Errors a session may report from `stop`. Logged, never aggregated.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to stop session {id}: {reason}")]
    Stop { id: String, reason: String },
}

/// Authentication subsystem bootstrap.
pub trait Authenticator: Send + Sync {
    /// Prepare credentials for the control API.
    fn init(&self) -> BoxFuture<'_, Result<(), CollaboratorError>>;
}

/// Removes leftovers from a previous run (crashed tunnels, stale routes).
pub trait StaleStateCleaner: Send + Sync {
    fn check_and_clean(&self) -> BoxFuture<'_, Result<(), CollaboratorError>>;
}

/// Installs the control API's routes on the router the server will serve.
pub trait RouteRegistrar: Send + Sync {
    fn register(&self, router: axum::Router) -> axum::Router;
}

impl<F> RouteRegistrar for F
where
    F: Fn(axum::Router) -> axum::Router + Send + Sync,
{
    fn register(&self, router: axum::Router) -> axum::Router {
        self(router)
    }
}

/// Watches host state (network changes, tunnel processes) while the
/// service runs.
pub trait Watcher: Send + Sync {
    /// Start watching. Must not block; anything spawned here stops once
    /// `cancel` fires.
    fn start(&self, cancel: CancellationToken);
}

/// A long-running periodic task, such as the server health pinger.
///
/// Implementations must return promptly once `cancel` fires.
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, cancel: CancellationToken) -> BoxFuture<'_, ()>;
}

/// An active VPN connection, opaque beyond its stop capability.
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    fn stop(&self) -> BoxFuture<'_, Result<(), SessionError>>;
}

/// Source of the sessions that must be stopped at shutdown.
///
/// The lifecycle only reads this registry; membership is owned elsewhere.
pub trait SessionRegistry: Send + Sync {
    fn active_sessions(&self) -> Vec<Arc<dyn Session>>;
}

/// Everything the orchestrator needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn Authenticator>,
    pub cleaner: Arc<dyn StaleStateCleaner>,
    pub routes: Arc<dyn RouteRegistrar>,
    pub watcher: Arc<dyn Watcher>,
    pub pinger: Arc<dyn BackgroundTask>,
    pub sessions: Arc<dyn SessionRegistry>,
}
