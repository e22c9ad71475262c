//! Connection sessions tracked by the realtime engine.
//!
//! A session lives from socket open to socket close, or until its heartbeat
//! goes quiet for longer than the configured timeout. Each session carries
//! the set of paths it asked to have removed when it ends.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use chitchat_shared::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub user: UserId,
    pub opened_at: Instant,
    pub last_seen: Instant,
    cleanups: HashSet<String>,
}

impl SessionInfo {
    pub fn cleanup_count(&self) -> usize {
        self.cleanups.len()
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionInfo>,
}

impl SessionRegistry {
    pub fn open(&mut self, user: UserId) -> SessionId {
        let id = SessionId::new();
        let now = Instant::now();
        self.sessions.insert(
            id,
            SessionInfo {
                user,
                opened_at: now,
                last_seen: now,
                cleanups: HashSet::new(),
            },
        );
        id
    }

    /// Record a heartbeat.  Returns `false` if the session is gone.
    pub fn touch(&mut self, id: &SessionId) -> bool {
        match self.sessions.get_mut(id) {
            Some(info) => {
                info.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn has_cleanup(&self, id: &SessionId, path: &str) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|info| info.cleanups.contains(path))
    }

    /// Returns `true` if the path was not registered yet.
    pub fn add_cleanup(&mut self, id: &SessionId, path: &str) -> bool {
        self.sessions
            .get_mut(id)
            .is_some_and(|info| info.cleanups.insert(path.to_string()))
    }

    pub fn close(&mut self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.remove(id)
    }

    /// Sessions whose last heartbeat is older than `timeout` at `now`.
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|(_, info)| now.saturating_duration_since(info.last_seen) > timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionInfo> {
        self.sessions.get(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
