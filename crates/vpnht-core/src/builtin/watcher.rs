use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collab::Watcher;

/// Watcher for hosts where nothing outside the service needs watching.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWatcher;

impl Watcher for NoopWatcher {
    fn start(&self, _cancel: CancellationToken) {
        debug!("No host state to watch");
    }
}
