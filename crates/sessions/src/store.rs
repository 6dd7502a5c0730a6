use std::sync::Arc;

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
    tracing::debug,
};

use lembar_common::ConversationId;

use crate::session::Session;

/// Shared, individually locked session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// In-memory sessions keyed by conversation.
///
/// Each session sits behind its own async mutex; the map itself is sharded,
/// so work on one conversation never waits on another.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<ConversationId, SessionHandle>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `id`, creating an idle session on first access.
    pub fn get_or_create(&self, id: &ConversationId) -> SessionHandle {
        if let Some(handle) = self.sessions.get(id) {
            return Arc::clone(handle.value());
        }
        let entry = self.sessions.entry(id.clone()).or_insert_with(|| {
            debug!(conversation = %id, "new session");
            Arc::new(Mutex::new(Session::Idle))
        });
        Arc::clone(entry.value())
    }

    /// Exclusive access to the session of `id` until the guard is dropped.
    pub async fn lock(&self, id: &ConversationId) -> OwnedMutexGuard<Session> {
        self.get_or_create(id).lock_owned().await
    }

    /// Replace the session of `id` with a fresh idle one.
    pub async fn reset(&self, id: &ConversationId) {
        *self.lock(id).await = Session::Idle;
    }

    /// Replace the session of `id`, returning the previous one.
    pub async fn replace(&self, id: &ConversationId, session: Session) -> Session {
        std::mem::replace(&mut *self.lock(id).await, session)
    }

    /// Copy of the current session, if `id` has ever been seen.
    pub async fn snapshot(&self, id: &ConversationId) -> Option<Session> {
        let handle = self.sessions.get(id).map(|h| Arc::clone(h.value()))?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
