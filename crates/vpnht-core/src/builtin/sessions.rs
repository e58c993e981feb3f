//! In-memory session registry.

use std::sync::{Arc, RwLock};

use crate::collab::{Session, SessionRegistry};

/// Sessions kept in insertion order. Shutdown stops them in that order.
#[derive(Default)]
pub struct InMemorySessions {
    sessions: RwLock<Vec<Arc<dyn Session>>>,
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session. A session with the same id replaces the old entry.
    pub fn insert(&self, session: Arc<dyn Session>) {
        let mut sessions = self.write();
        sessions.retain(|s| s.id() != session.id());
        sessions.push(session);
    }

    /// Stop tracking a session, returning it if it was present.
    pub fn remove(&self, id: &str) -> Option<Arc<dyn Session>> {
        let mut sessions = self.write();
        let idx = sessions.iter().position(|s| s.id() == id)?;
        Some(sessions.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A poisoned lock only means a writer panicked mid-push; the Vec is still valid.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn Session>>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn Session>>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionRegistry for InMemorySessions {
    fn active_sessions(&self) -> Vec<Arc<dyn Session>> {
        self.read().clone()
    }
}
