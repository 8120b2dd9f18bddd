//! `SessionRepository` backed by the chunked entity store.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use taskerino_core::Result;
use taskerino_core::session::{
    Session, SessionQuery, SessionQueryResult, SessionRepository, SessionSummary,
};
use taskerino_core::storage::{EntityStore, EntityStoreExt, StoredEntity};

pub struct ChunkedSessionRepository {
    store: Arc<dyn EntityStore>,
}

impl ChunkedSessionRepository {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Loads every session listed in the index, skipping unreadable ones.
    ///
    /// A single corrupted file must not hide the rest of the history, so
    /// listing logs and skips; `find_by_id` still surfaces the error.
    async fn load_readable(&self) -> Result<Vec<Session>> {
        let entries = self.store.index_entries(Session::COLLECTION).await?;
        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.store.load::<Session>(&entry.id).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) if e.is_corrupted() => {
                    tracing::warn!("[SessionRepository] Skipping session '{}': {}", entry.id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }

    fn newest_first(mut summaries: Vec<SessionSummary>) -> Vec<SessionSummary> {
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        summaries
    }
}

#[async_trait]
impl SessionRepository for ChunkedSessionRepository {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        self.store.load::<Session>(session_id).await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.store.save(session).await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.store
            .delete_entity(Session::COLLECTION, session_id)
            .await
    }

    async fn list_all(&self) -> Result<Vec<Session>> {
        self.load_readable().await
    }

    async fn list_summaries(&self) -> Result<Vec<SessionSummary>> {
        let summaries = self
            .load_readable()
            .await?
            .iter()
            .map(Session::to_summary)
            .collect();
        Ok(Self::newest_first(summaries))
    }

    async fn search(&self, query: &str) -> Result<Vec<SessionSummary>> {
        let summaries = self
            .load_readable()
            .await?
            .iter()
            .filter(|s| s.matches_query(query))
            .map(Session::to_summary)
            .collect();
        Ok(Self::newest_first(summaries))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.store.index_entries(Session::COLLECTION).await?.len())
    }

    async fn query(&self, query: &SessionQuery) -> Result<SessionQueryResult> {
        let started = Instant::now();
        let mut result = query.apply(self.load_readable().await?);
        result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            "[SessionRepository] Query matched {} sessions in {}ms",
            result.total,
            result.elapsed_ms
        );
        Ok(result)
    }
}
