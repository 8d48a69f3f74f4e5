//! In-flight exchanges, keyed by their correlation id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::handler::{DrmHandler, SessionKey};

/// A handler waiting for its license.
#[derive(Debug)]
pub struct PendingSession {
    pub handler: Box<dyn DrmHandler>,
    pub key_system: String,
    pub origin: Option<String>,
    pub tab_id: Option<u64>,
    pub created: Instant,
}

impl PendingSession {
    pub fn new(handler: Box<dyn DrmHandler>, key_system: &str, origin: Option<&str>, tab_id: Option<u64>) -> Self {
        Self {
            handler,
            key_system: key_system.to_string(),
            origin: origin.map(str::to_string),
            tab_id,
            created: Instant::now(),
        }
    }
}

/// Owned store of pending sessions.
///
/// A Widevine license carries the `request_id` of its challenge but not the
/// page's session id, so sessions are keyed by [`SessionKey`]. The page-side
/// session id is kept as an alias for lookups that only know it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionKey, PendingSession>,
    aliases: HashMap<String, SessionKey>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a session. The last insert for a key wins; the session it
    /// displaces is handed back so the caller can close it.
    pub fn insert(&mut self, key: SessionKey, session: PendingSession) -> Option<PendingSession> {
        let displaced = self.sessions.insert(key.clone(), session);
        if displaced.is_some() {
            warn!("Session {} replaced before its license arrived", key);
        }
        displaced
    }

    /// Remember that the page knows `key` as `native_id`.
    pub fn alias(&mut self, native_id: &str, key: SessionKey) {
        if !native_id.is_empty() {
            self.aliases.insert(native_id.to_string(), key);
        }
    }

    /// Check-and-delete.
    pub fn take(&mut self, key: &SessionKey) -> Option<PendingSession> {
        let session = self.sessions.remove(key)?;
        self.aliases.retain(|_, k| k != key);
        Some(session)
    }

    /// [`SessionRegistry::take`] through a page-side session id.
    pub fn take_by_alias(&mut self, native_id: &str) -> Option<PendingSession> {
        let key = self.aliases.remove(native_id)?;
        self.take(&key)
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions older than `max_age`, returning them for cleanup.
    pub fn evict_older_than(&mut self, max_age: Duration) -> Vec<PendingSession> {
        self.evict_older_than_at(Instant::now(), max_age)
    }

    fn evict_older_than_at(&mut self, now: Instant, max_age: Duration) -> Vec<PendingSession> {
        let stale: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.created) > max_age)
            .map(|(k, _)| k.clone())
            .collect();
        if !stale.is_empty() {
            debug!("Evicting {} stale sessions", stale.len());
        }
        stale.iter().filter_map(|k| self.take(k)).collect()
    }
}
