//! Session repository trait.
//!
//! Defines the interface for session persistence operations.

use super::model::{Session, SessionSummary};
use super::query::{SessionQuery, SessionQueryResult};
use crate::error::Result;
use async_trait::async_trait;

/// An abstract repository for managing session persistence.
///
/// The enrichment orchestrator persists its working copy through this trait
/// after every stage transition, so implementations must make `save` atomic
/// per session.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Finds a session by its ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: Session found
    /// - `Ok(None)`: Session not found
    /// - `Err(_)`: Error occurred during retrieval (including corrupted files)
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// Saves a session to storage.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Deletes a session from storage.
    ///
    /// Deleting a session that does not exist is not an error.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Lists all stored sessions.
    async fn list_all(&self) -> Result<Vec<Session>>;

    /// Lists lightweight summaries of all sessions, newest first.
    async fn list_summaries(&self) -> Result<Vec<SessionSummary>>;

    /// Case-insensitive search over name, category, notes and tags.
    async fn search(&self, query: &str) -> Result<Vec<SessionSummary>>;

    /// Number of stored sessions.
    async fn count(&self) -> Result<usize>;

    /// Sessions matching `query`, newest first.
    async fn query(&self, query: &SessionQuery) -> Result<SessionQueryResult> {
        Ok(query.apply(self.list_all().await?))
    }
}
