//! Process-wide session registry.
//!
//! One bridge per session id, owned by the registry for the lifetime of
//! the proxy process. Sessions are registered from the server transport's
//! session-initialized callback and removed either by an explicit DELETE
//! or by the bridge's close hook.

use std::sync::Arc;

use dashmap::DashMap;

use p402_bridge::{Bridge, ServerHttpTransport};

/// A live session: the bridge plus the buyer-facing transport the HTTP
/// handlers feed.
#[derive(Debug, Clone)]
pub struct Session {
    /// The session's bridge.
    pub bridge: Bridge,
    /// The buyer-facing transport.
    pub transport: Arc<ServerHttpTransport>,
}

/// Concurrent session-id → session map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a session by id.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    /// Registers a session. A duplicate id replaces the old entry (ids are
    /// UUIDs, so this does not happen in practice).
    pub fn insert(&self, session_id: String, session: Session) {
        self.sessions.insert(session_id, session);
    }

    /// Removes and returns a session.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
