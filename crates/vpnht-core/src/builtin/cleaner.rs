use tracing::debug;

use crate::BoxFuture;
use crate::collab::{CollaboratorError, StaleStateCleaner};

/// Stale-state cleaner for hosts with no tunnel state to recover.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCleaner;

impl StaleStateCleaner for NoopCleaner {
    fn check_and_clean(&self) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        Box::pin(async {
            debug!("No stale state to clean");
            Ok(())
        })
    }
}
