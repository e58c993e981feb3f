//! Collaborators shipped with the `vpnht-service` binary.
//!
//! Embedders with real tunnel management supply their own [`Collaborators`];
//! these cover a standalone install.

mod auth;
mod cleaner;
mod pinger;
mod sessions;
mod watcher;

use std::sync::Arc;

use vpnht_config::ServiceConfig;

pub use auth::LocalTokenAuth;
pub use cleaner::NoopCleaner;
pub use pinger::{HttpPinger, PingOutcome};
pub use sessions::InMemorySessions;
pub use watcher::NoopWatcher;

use crate::collab::Collaborators;
use crate::ipc::DefaultRoutes;

/// The built-in collaborator set, plus the session registry so callers can
/// register sessions with it.
pub fn collaborators(
    config: &ServiceConfig,
) -> Result<(Collaborators, Arc<InMemorySessions>), reqwest::Error> {
    let sessions = Arc::new(InMemorySessions::new());
    let collaborators = Collaborators {
        auth: Arc::new(LocalTokenAuth::new(&config.auth.token_path)),
        cleaner: Arc::new(NoopCleaner),
        routes: Arc::new(DefaultRoutes::new(
            sessions.clone(),
            config.service.development,
        )),
        watcher: Arc::new(NoopWatcher),
        pinger: Arc::new(HttpPinger::new(&config.ping)?),
        sessions: sessions.clone(),
    };
    Ok((collaborators, sessions))
}
