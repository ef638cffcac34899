//! Per-visitor session storage
//!
//! Sessions are addressed by an opaque id carried in the `sessionid` cookie
//! and hold a small string map. Expiry belongs to the store: an entry that
//! has outlived its TTL simply stops being returned by [`SessionStore::load`].

use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub type SessionData = HashMap<String, String>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a live session, or `None` if the id is unknown or expired
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>>;

    /// Write the session back, restarting its expiry window
    async fn save(&self, session_id: &str, data: SessionData) -> Result<()>;
}

/// In-process session store backed by a Moka cache with a fixed TTL
pub struct MemorySessionStore {
    sessions: Cache<String, Arc<SessionData>>,
}

impl MemorySessionStore {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { sessions }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>> {
        Ok(self
            .sessions
            .get(session_id)
            .await
            .map(|data| data.as_ref().clone()))
    }

    async fn save(&self, session_id: &str, data: SessionData) -> Result<()> {
        self.sessions
            .insert(session_id.to_string(), Arc::new(data))
            .await;
        Ok(())
    }
}

/// A session as seen by one request.
///
/// Holds the id from the request cookie only if the store still knows it;
/// otherwise a fresh id is minted on first [`Session::persist`], so a stale
/// cookie can never be adopted as a live session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    id: Option<String>,
    data: SessionData,
}

impl Session {
    /// Resolve the session for a request's `sessionid` cookie value.
    pub async fn load(store: &dyn SessionStore, cookie: Option<&str>) -> Result<Self> {
        let Some(id) = cookie.filter(|id| !id.is_empty()) else {
            return Ok(Self::default());
        };

        Ok(match store.load(id).await? {
            Some(data) => Self {
                id: Some(id.to_string()),
                data,
            },
            None => Self::default(),
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: String) {
        self.data.insert(key.to_string(), value);
    }

    /// Save back to the store and return the session id to put in the cookie.
    pub async fn persist(&mut self, store: &dyn SessionStore) -> Result<String> {
        let id = self
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
            .clone();
        store.save(&id, self.data.clone()).await?;
        Ok(id)
    }
}
