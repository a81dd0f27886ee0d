//! Store traits: the abstract interface for local persistence.
//!
//! The engine is storage-agnostic. Implementations include SQLite (primary)
//! and in-memory (tests, ephemeral clients).

use async_trait::async_trait;

use tierseal_core::{Address, ObjectId};

use crate::error::Result;
use crate::records::{CacheEntry, SessionMetadata};

/// Persistence for session issuance metadata, keyed by `(subject, scope)`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the metadata for a subject and scope, if any.
    ///
    /// Expired rows are returned as-is; the caller decides.
    async fn load_session(&self, subject: &Address, scope: &str) -> Result<Option<SessionMetadata>>;

    /// Insert or replace the metadata for `(meta.subject, meta.scope)`.
    async fn save_session(&self, meta: &SessionMetadata) -> Result<()>;

    /// Remove one subject/scope entry. Removing a missing entry is not an error.
    async fn remove_session(&self, subject: &Address, scope: &str) -> Result<()>;

    /// Remove every scope of a subject. Returns the number removed.
    async fn clear_sessions(&self, subject: &Address) -> Result<usize>;
}

/// Persistence for decrypted plaintext, keyed by `(subject, content_id)`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the raw entry a subject holds for a content id, live or not.
    async fn get_entry(&self, subject: &Address, content_id: &ObjectId) -> Result<Option<CacheEntry>>;

    /// Insert or replace the entry for `(entry.subject, entry.content_id)`.
    async fn put_entry(&self, entry: &CacheEntry) -> Result<()>;

    /// Remove one entry. Returns whether it existed.
    async fn remove_entry(&self, subject: &Address, content_id: &ObjectId) -> Result<bool>;

    /// Remove everything. Returns the number removed.
    async fn purge_all(&self) -> Result<usize>;

    /// Remove every entry with `expires_at <= now`. Returns the number removed.
    async fn remove_expired(&self, now: i64) -> Result<usize>;
}
