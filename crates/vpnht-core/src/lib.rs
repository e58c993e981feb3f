#![deny(unsafe_code)]

//! VPNHT service lifecycle runtime.
//!
//! Brings the helper service from cold start to serving its control API,
//! and tears it down in a fixed, time-bounded order when a termination
//! signal arrives. Authentication, stale-state cleanup, routes, the health
//! pinger, and VPN sessions are collaborators behind the traits in
//! [`collab`].

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future: the return type for async
/// trait methods that need dynamic dispatch (`dyn Trait`).
///
/// Native `async fn` in traits produces opaque return types that are not
/// object-safe. Traits consumed as `Arc<dyn Trait>` return a concrete
/// `Pin<Box<dyn Future>>` instead; this alias keeps those signatures readable.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Built-in collaborators for a standalone install.
pub mod builtin;
/// Collaborator contracts required by the lifecycle.
pub mod collab;
/// Startup sequence and the serve/shutdown hand-off.
pub mod daemon;
/// Control API transport, server, routes, and client.
pub mod ipc;
/// Global `tracing` subscriber setup.
pub mod logging;
/// Best-effort outcomes for teardown steps.
pub mod outcome;
/// Single-instance PID file.
pub mod pidfile;
/// Ordered teardown after a termination request.
pub mod shutdown;
/// SIGINT/SIGTERM listener.
pub mod signals;
/// Background ticker supervision.
pub mod ticker;

pub use collab::Collaborators;
pub use daemon::{Daemon, RunningDaemon, ServiceError};
pub use ipc::{BoundAddress, ControlClient};
pub use outcome::BestEffort;
pub use shutdown::{LifecyclePhase, ShutdownReport, TeardownStep};
pub use signals::{SignalListener, Termination};
