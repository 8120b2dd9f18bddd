//! Tracks the session the user is currently recording.
//!
//! The UI sets the id when a session starts and clears it when it ends;
//! external tools read it back through [`ActiveSession::load`].

use std::sync::{Arc, RwLock};
use taskerino_core::Result;
use taskerino_core::session::{Session, SessionRepository};

pub struct ActiveSession {
    repository: Arc<dyn SessionRepository>,
    session_id: RwLock<Option<String>>,
}

impl ActiveSession {
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        Self {
            repository,
            session_id: RwLock::new(None),
        }
    }

    /// Sets (or clears, with `None`) the active session id.
    pub fn set(&self, session_id: Option<String>) {
        match &session_id {
            Some(id) => tracing::info!("[ActiveSession] Active session: {}", id),
            None => tracing::info!("[ActiveSession] Active session cleared"),
        }
        *self.session_id.write().unwrap_or_else(|e| e.into_inner()) = session_id;
    }

    pub fn id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Loads the active session.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: a session is active and stored
    /// - `Ok(None)`: nothing active, or the active id no longer exists
    /// - `Err(_)`: the stored session could not be read
    pub async fn load(&self) -> Result<Option<Session>> {
        let Some(id) = self.id() else {
            return Ok(None);
        };
        let session = self.repository.find_by_id(&id).await?;
        if session.is_none() {
            tracing::warn!("[ActiveSession] Active session '{}' is not stored", id);
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskerino_infrastructure::{ChunkedEntityStore, ChunkedSessionRepository, EntityCache};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_load_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkedEntityStore::new(temp_dir.path(), Arc::new(EntityCache::new(1 << 20)))
            .with_min_free_space(0);
        let repository = Arc::new(ChunkedSessionRepository::new(Arc::new(store)));
        repository
            .save(&Session::new("s-1", "Recording", Utc::now()))
            .await
            .unwrap();

        let active = ActiveSession::new(repository);
        assert!(active.load().await.unwrap().is_none());

        active.set(Some("s-1".to_string()));
        assert_eq!(active.id().as_deref(), Some("s-1"));
        assert_eq!(active.load().await.unwrap().unwrap().name, "Recording");

        active.set(Some("deleted".to_string()));
        assert!(active.load().await.unwrap().is_none());

        active.set(None);
        assert!(active.id().is_none());
    }
}
