//! Local token authentication bootstrap.
//!
//! Ensures a control API token exists on disk before the server starts. The
//! token is a random UUID, readable only by the service owner.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::BoxFuture;
use crate::collab::{Authenticator, CollaboratorError};

/// Creates the token file on first start and reuses it afterwards.
#[derive(Debug, Clone)]
pub struct LocalTokenAuth {
    token_path: PathBuf,
}

impl LocalTokenAuth {
    pub fn new(token_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
        }
    }

    pub fn token_path(&self) -> &std::path::Path {
        &self.token_path
    }

    async fn ensure_token(&self) -> Result<(), CollaboratorError> {
        match tokio::fs::read_to_string(&self.token_path).await {
            Ok(existing) if !existing.trim().is_empty() => {
                debug!(path = %self.token_path.display(), "Reusing auth token");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = self.token_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let token = uuid::Uuid::new_v4().to_string();
        tokio::fs::write(&self.token_path, &token).await?;
        restrict_to_owner(&self.token_path).await?;
        info!(path = %self.token_path.display(), "Generated auth token");
        Ok(())
    }
}

impl Authenticator for LocalTokenAuth {
    fn init(&self) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        Box::pin(self.ensure_token())
    }
}

#[cfg(unix)]
async fn restrict_to_owner(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_to_owner(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}
