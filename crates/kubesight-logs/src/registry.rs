use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kubesight_types::{SessionKey, SessionState};

use crate::session::{Session, SessionCommand, SessionId, SessionMap, SessionSpec};

/// Process-wide table of live sessions, at most one per key
///
/// Cloning shares the table.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session, stopping any existing session with the same key first
    pub async fn start(&self, spec: SessionSpec) -> SessionId {
        let key = spec.params.key.clone();
        let mut sessions = self.sessions.lock().await;

        if let Some(previous) = sessions.remove(&key) {
            tracing::info!(
                session_id = previous.id(),
                key = %key,
                "Replacing existing session"
            );
            previous.shutdown().await;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session::spawn(id, spec, Arc::downgrade(&self.sessions));
        sessions.insert(key, session);
        tracing::debug!(session_id = id, active = sessions.len(), "Session registered");
        id
    }

    /// Stop the session for `key`. No-op if there is none.
    pub async fn stop(&self, key: &SessionKey) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.remove(key) {
            Some(session) => {
                session.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop the session for `key` only if it is still session `id`
    ///
    /// A connection uses this on disconnect so it never tears down a newer
    /// session that replaced its own.
    pub async fn stop_session(&self, key: &SessionKey, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        if !sessions.get(key).is_some_and(|s| s.id() == id) {
            return false;
        }
        match sessions.remove(key) {
            Some(session) => {
                session.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop every session; returns how many were running
    pub async fn stop_all(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let drained: Vec<Session> = sessions.drain().map(|(_, session)| session).collect();
        let count = drained.len();
        for session in drained {
            session.shutdown().await;
        }
        if count > 0 {
            tracing::info!(count, "Stopped all sessions");
        }
        count
    }

    /// Forward a viewer command to session `id`
    pub async fn send(&self, key: &SessionKey, id: SessionId, command: SessionCommand) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(key) {
            Some(session) if session.id() == id => session.command(command),
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.lock().await.contains_key(key)
    }

    pub async fn session_id(&self, key: &SessionKey) -> Option<SessionId> {
        self.sessions.lock().await.get(key).map(Session::id)
    }

    pub async fn state(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.lock().await.get(key).map(Session::state)
    }
}
