use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Registry of sessions with a live enrichment run.
///
/// At most one run per session id. A slot is held by a [`RunPermit`] and
/// released when the permit is dropped, including when the run task panics.
#[derive(Clone, Default)]
pub struct ActiveRuns {
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot for `session_id`.
    ///
    /// # Returns
    ///
    /// `Some(permit)` if no run was active for the session, `None` otherwise.
    pub fn try_acquire(&self, session_id: &str) -> Option<RunPermit> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if !sessions.insert(session_id.to_string()) {
            return None;
        }
        Some(RunPermit {
            session_id: session_id.to_string(),
            sessions: Arc::clone(&self.sessions),
        })
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof that the holder owns the enrichment slot of one session.
pub struct RunPermit {
    session_id: String,
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl RunPermit {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
    }
}
