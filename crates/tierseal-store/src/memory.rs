//! In-memory implementation of the store traits.
//!
//! Same semantics as SQLite with no persistence. Thread-safe via RwLock.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use tierseal_core::{Address, ObjectId};

use crate::error::{Result, StoreError};
use crate::records::{CacheEntry, SessionMetadata};
use crate::traits::{CacheStore, SessionStore};

/// In-memory store implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Session metadata indexed by (subject, scope).
    sessions: HashMap<(Address, String), SessionMetadata>,

    /// Plaintext cache indexed by (subject, content id).
    cache: HashMap<(Address, ObjectId), CacheEntry>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }

    /// Number of cached plaintext entries, live or not.
    pub fn cache_len(&self) -> usize {
        self.inner.read().map(|i| i.cache.len()).unwrap_or(0)
    }

    /// Number of persisted session rows.
    pub fn session_len(&self) -> usize {
        self.inner.read().map(|i| i.sessions.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(&self, subject: &Address, scope: &str) -> Result<Option<SessionMetadata>> {
        let inner = self.read()?;
        Ok(inner.sessions.get(&(*subject, scope.to_string())).cloned())
    }

    async fn save_session(&self, meta: &SessionMetadata) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .sessions
            .insert((meta.subject, meta.scope.clone()), meta.clone());
        Ok(())
    }

    async fn remove_session(&self, subject: &Address, scope: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.sessions.remove(&(*subject, scope.to_string()));
        Ok(())
    }

    async fn clear_sessions(&self, subject: &Address) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.sessions.len();
        inner.sessions.retain(|(s, _), _| s != subject);
        Ok(before - inner.sessions.len())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_entry(&self, subject: &Address, content_id: &ObjectId) -> Result<Option<CacheEntry>> {
        let inner = self.read()?;
        Ok(inner.cache.get(&(*subject, *content_id)).cloned())
    }

    async fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .cache
            .insert((entry.subject, entry.content_id), entry.clone());
        Ok(())
    }

    async fn remove_entry(&self, subject: &Address, content_id: &ObjectId) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner.cache.remove(&(*subject, *content_id)).is_some())
    }

    async fn purge_all(&self) -> Result<usize> {
        let mut inner = self.write()?;
        let n = inner.cache.len();
        inner.cache.clear();
        Ok(n)
    }

    async fn remove_expired(&self, now: i64) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.cache.len();
        inner.cache.retain(|_, e| e.is_live(now));
        Ok(before - inner.cache.len())
    }
}
