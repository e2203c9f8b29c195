//! Session table for the tool-invocation protocol.
//!
//! A session is minted by `initialize` and must accompany every later call
//! (except `ping` and `notifications/initialized`). Sessions end on explicit
//! termination or after `ttl` of inactivity.

use std::time::{Duration, Instant, SystemTime};

use {dashmap::DashMap, tracing::debug};

use crate::types::negotiate_version;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: SystemTime,
    pub protocol_version: String,
    last_seen: Instant,
}

impl Session {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= ttl
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("missing session id")]
    Missing,
    #[error("unknown session id")]
    Unknown,
    #[error("session expired")]
    Expired,
}

/// Concurrent session table, injected into the adapter at construction.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Mint a session, negotiating the protocol version.
    pub fn create(&self, requested_version: Option<&str>) -> Session {
        let session = Session {
            id: uuid::Uuid::new_v4().simple().to_string(),
            created_at: SystemTime::now(),
            protocol_version: negotiate_version(requested_version).to_string(),
            last_seen: Instant::now(),
        };
        debug!(session = %session.id, version = %session.protocol_version, "session created");
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Check a presented token and refresh its idle timer.
    pub fn validate(&self, token: Option<&str>) -> Result<Session, SessionError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::Missing)?;

        let now = Instant::now();
        {
            let mut entry = self.sessions.get_mut(token).ok_or(SessionError::Unknown)?;
            if !entry.is_expired(self.ttl, now) {
                entry.last_seen = now;
                return Ok(entry.clone());
            }
        }

        self.sessions.remove(token);
        debug!(session = %token, "session expired");
        Err(SessionError::Expired)
    }

    /// Terminate a session. Returns whether it existed.
    pub fn terminate(&self, token: &str) -> bool {
        let removed = self.sessions.remove(token.trim()).is_some();
        if removed {
            debug!(session = %token, "session terminated");
        }
        removed
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(self.ttl, now));
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::types::DEFAULT_PROTOCOL_VERSION};

    #[test]
    fn create_then_validate() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.create(Some("2025-06-18"));
        assert_eq!(session.protocol_version, "2025-06-18");

        let found = store.validate(Some(&session.id)).unwrap();
        assert_eq!(found.id, session.id);
    }

    #[test]
    fn unsupported_version_downgrades() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.create(Some("2099-12-31"));
        assert_eq!(session.protocol_version, DEFAULT_PROTOCOL_VERSION);
    }

    #[test]
    fn missing_and_unknown_tokens() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert_eq!(store.validate(None).unwrap_err(), SessionError::Missing);
        assert_eq!(store.validate(Some("  ")).unwrap_err(), SessionError::Missing);
        assert_eq!(
            store.validate(Some("nope")).unwrap_err(),
            SessionError::Unknown
        );
    }

    #[test]
    fn terminate_invalidates_token() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.create(None);
        assert!(store.terminate(&session.id));
        assert!(!store.terminate(&session.id));
        assert_eq!(
            store.validate(Some(&session.id)).unwrap_err(),
            SessionError::Unknown
        );
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let store = SessionStore::new(Duration::ZERO);
        let session = store.create(None);
        assert_eq!(
            store.validate(Some(&session.id)).unwrap_err(),
            SessionError::Expired
        );
        // Expired entries are removed on first sight.
        assert!(store.is_empty());
    }

    #[test]
    fn purge_removes_only_expired() {
        let store = SessionStore::new(Duration::ZERO);
        store.create(None);
        store.create(None);
        assert_eq!(store.purge_expired(), 2);

        let store = SessionStore::new(Duration::from_secs(60));
        store.create(None);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.len(), 1);
    }
}
