//! Session storage as an explicit capability handed to consumers
//!
//! Consumers that need per-user or per-connection state take a
//! [`SessionProvider`] and load a [`Session`] by key. HTTP consumers key by
//! the session cookie; WebSocket consumers key by the connection's reply
//! channel name.

use crate::ChannelResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Session payload
pub type SessionData = Map<String, Value>;

/// Backing store for sessions
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Load the data stored under `key`, if any
    async fn load(&self, key: &str) -> ChannelResult<Option<SessionData>>;

    /// Store data under `key`
    async fn save(&self, key: &str, data: &SessionData) -> ChannelResult<()>;

    /// Delete the session under `key`
    async fn delete(&self, key: &str) -> ChannelResult<()>;

    async fn exists(&self, key: &str) -> ChannelResult<bool> {
        Ok(self.load(key).await?.is_some())
    }
}

/// How long an untouched session lives by default (two weeks)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct StoredSession {
    data: SessionData,
    expires_at: Instant,
}

impl StoredSession {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Process-local session store.
///
/// Each save restarts the session's time to live. Expired sessions read as
/// absent and are pruned whenever a session is saved.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, StoredSession>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    /// Store whose sessions expire `ttl` after their last save
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stored sessions, expired ones included until the next prune
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every expired session, returning how many went
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, stored| !stored.is_expired(now));
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            debug!(pruned, "Pruned expired sessions");
        }
        pruned
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for MemorySessionStore {
    async fn load(&self, key: &str) -> ChannelResult<Option<SessionData>> {
        let now = Instant::now();
        if let Some(stored) = self.sessions.get(key) {
            if !stored.is_expired(now) {
                return Ok(Some(stored.data.clone()));
            }
        }
        self.sessions.remove_if(key, |_, stored| stored.is_expired(now));
        Ok(None)
    }

    async fn save(&self, key: &str, data: &SessionData) -> ChannelResult<()> {
        self.prune_expired();
        self.sessions.insert(
            key.to_string(),
            StoredSession {
                data: data.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> ChannelResult<()> {
        self.sessions.remove(key);
        Ok(())
    }
}

/// A loaded session that tracks whether it needs saving
#[derive(Debug, Clone)]
pub struct Session {
    key: String,
    data: SessionData,
    modified: bool,
    is_new: bool,
}

impl Session {
    /// Load the session for `key`, starting empty if none is stored
    pub async fn load(provider: &dyn SessionProvider, key: &str) -> ChannelResult<Self> {
        let stored = provider.load(key).await?;
        Ok(Self {
            key: key.to_string(),
            is_new: stored.is_none(),
            data: stored.unwrap_or_default(),
            modified: false,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True if nothing was stored under this key when loaded
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, field: K, value: V) {
        self.data.insert(field.into(), value.into());
        self.modified = true;
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let removed = self.data.remove(field);
        self.modified |= removed.is_some();
        removed
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    /// Persist the session if it was changed (or never stored before).
    /// Returns whether anything was written.
    pub async fn save_if_modified(&mut self, provider: &dyn SessionProvider) -> ChannelResult<bool> {
        if !self.modified && !self.is_new {
            return Ok(false);
        }
        provider.save(&self.key, &self.data).await?;
        self.modified = false;
        self.is_new = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_session_is_saved_once() {
        let store = MemorySessionStore::new();
        let mut session = Session::load(&store, "websocket.send!abc").await.unwrap();
        assert!(session.is_new());
        assert!(session.save_if_modified(&store).await.unwrap());
        assert!(!session.save_if_modified(&store).await.unwrap());
        assert!(store.exists("websocket.send!abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_persists_changes() {
        let store = MemorySessionStore::new();
        let mut session = Session::load(&store, "key").await.unwrap();
        session.insert("room", "lobby");
        session.save_if_modified(&store).await.unwrap();

        let mut reloaded = Session::load(&store, "key").await.unwrap();
        assert!(!reloaded.is_new());
        assert_eq!(reloaded.get("room").and_then(|v| v.as_str()), Some("lobby"));

        assert!(reloaded.remove("missing").is_none());
        assert!(!reloaded.is_modified());
        reloaded.remove("room");
        assert!(reloaded.is_modified());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemorySessionStore::new();
        store.save("gone", &SessionData::new()).await.unwrap();
        store.delete("gone").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_expire_after_ttl() {
        let store = MemorySessionStore::with_ttl(Duration::from_millis(30));
        let mut session = Session::load(&store, "old").await.unwrap();
        session.insert("visits", 1);
        session.save_if_modified(&store).await.unwrap();
        assert!(store.exists("old").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.exists("old").await.unwrap());
        assert!(Session::load(&store, "old").await.unwrap().is_new());
    }

    #[tokio::test]
    async fn test_saving_prunes_abandoned_sessions() {
        let store = MemorySessionStore::with_ttl(Duration::from_millis(30));
        for key in ["a", "b", "c"] {
            store.save(key, &SessionData::new()).await.unwrap();
        }
        assert_eq!(store.len(), 3);

        tokio::time::sleep(Duration::from_millis(60)).await;
        store.save("fresh", &SessionData::new()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.prune_expired(), 0);
    }
}
