//! Session registry.
//!
//! Sessions are handed out as `Arc<Mutex<Session>>` so that transitions on
//! the same session are serialized while different sessions proceed in
//! parallel.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::session::Session;

/// Shared, individually lockable session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Storage for live sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a new session under its own id. Fails if the id is taken.
    async fn create(&self, session: Session) -> Result<SessionHandle, EngineError>;

    /// Look up a session by id.
    async fn get(&self, session_id: &str) -> Result<SessionHandle, EngineError>;

    /// Register a session, replacing any existing entry with the same id.
    async fn put(&self, session: Session) -> SessionHandle;

    /// Number of registered sessions.
    async fn len(&self) -> usize;
}

/// Process-lifetime in-memory store. No eviction.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: Session) -> Result<SessionHandle, EngineError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(EngineError::InvalidInput(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        let id = session.session_id.clone();
        let handle = Arc::new(Mutex::new(session));
        sessions.insert(id.clone(), Arc::clone(&handle));
        debug!(session_id = %id, "session registered");
        Ok(handle)
    }

    async fn get(&self, session_id: &str) -> Result<SessionHandle, EngineError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("session {} not found", session_id)))
    }

    async fn put(&self, session: Session) -> SessionHandle {
        let id = session.session_id.clone();
        let handle = Arc::new(Mutex::new(session));
        let replaced = self
            .sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&handle))
            .is_some();
        info!(session_id = %id, replaced, "session stored");
        handle
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
