//! SQLite implementation of the store traits.
//!
//! The persistent backend: sessions and cached plaintext survive a restart
//! of the client, the way browser storage survives a page reload.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use tierseal_core::{Address, Ed25519PublicKey, Ed25519Signature, ObjectId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::records::{CacheEntry, SessionMetadata};
use crate::traits::{CacheStore, SessionStore};

/// SQLite-based store implementation.
///
/// Thread-safe via an internal Mutex around a single connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

fn fixed<const N: usize>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("expected {} bytes, got {}", N, v.len()).into(),
        )
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionMetadata> {
    Ok(SessionMetadata {
        subject: Address::from_bytes(fixed(row, 0)?),
        scope: row.get(1)?,
        issued_at: row.get(2)?,
        nominal_ttl_ms: row.get(3)?,
        expires_at: row.get(4)?,
        session_public_key: Ed25519PublicKey::from_bytes(fixed(row, 5)?),
        personal_message: row.get(6)?,
        signature: Ed25519Signature::from_bytes(fixed(row, 7)?),
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    let plaintext: Vec<u8> = row.get(2)?;
    let owner_tier: Option<Vec<u8>> = row.get(3)?;
    let owner_tier = match owner_tier {
        Some(bytes) => Some(ObjectId::from_bytes(bytes.try_into().map_err(|_| {
            rusqlite::Error::InvalidColumnType(3, "owner_tier".into(), Type::Blob)
        })?)),
        None => None,
    };

    Ok(CacheEntry {
        subject: Address::from_bytes(fixed(row, 0)?),
        content_id: ObjectId::from_bytes(fixed(row, 1)?),
        plaintext: Bytes::from(plaintext),
        owner_tier,
        expires_at: row.get(4)?,
        stored_at: row.get(5)?,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load_session(&self, subject: &Address, scope: &str) -> Result<Option<SessionMetadata>> {
        self.with_conn(|conn| {
            let meta = conn
                .query_row(
                    "SELECT subject, scope, issued_at, nominal_ttl_ms, expires_at,
                            session_public_key, personal_message, signature
                     FROM session_metadata WHERE subject = ?1 AND scope = ?2",
                    params![subject.as_bytes().as_slice(), scope],
                    row_to_session,
                )
                .optional()?;
            Ok(meta)
        })
    }

    async fn save_session(&self, meta: &SessionMetadata) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO session_metadata (
                    subject, scope, issued_at, nominal_ttl_ms, expires_at,
                    session_public_key, personal_message, signature
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    meta.subject.as_bytes().as_slice(),
                    meta.scope,
                    meta.issued_at,
                    meta.nominal_ttl_ms,
                    meta.expires_at,
                    meta.session_public_key.as_bytes().as_slice(),
                    meta.personal_message,
                    meta.signature.as_bytes().as_slice(),
                ],
            )?;
            Ok(())
        })
    }

    async fn remove_session(&self, subject: &Address, scope: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM session_metadata WHERE subject = ?1 AND scope = ?2",
                params![subject.as_bytes().as_slice(), scope],
            )?;
            Ok(())
        })
    }

    async fn clear_sessions(&self, subject: &Address) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM session_metadata WHERE subject = ?1",
                params![subject.as_bytes().as_slice()],
            )?;
            Ok(removed)
        })
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get_entry(&self, subject: &Address, content_id: &ObjectId) -> Result<Option<CacheEntry>> {
        self.with_conn(|conn| {
            let entry = conn
                .query_row(
                    "SELECT subject, content_id, plaintext, owner_tier, expires_at, stored_at
                     FROM plaintext_cache WHERE subject = ?1 AND content_id = ?2",
                    params![subject.as_bytes().as_slice(), content_id.as_bytes().as_slice()],
                    row_to_entry,
                )
                .optional()?;
            Ok(entry)
        })
    }

    async fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO plaintext_cache (
                    subject, content_id, plaintext, owner_tier, expires_at, stored_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.subject.as_bytes().as_slice(),
                    entry.content_id.as_bytes().as_slice(),
                    &entry.plaintext[..],
                    entry.owner_tier.as_ref().map(|t| t.as_bytes().to_vec()),
                    entry.expires_at,
                    entry.stored_at,
                ],
            )?;
            Ok(())
        })
    }

    async fn remove_entry(&self, subject: &Address, content_id: &ObjectId) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM plaintext_cache WHERE subject = ?1 AND content_id = ?2",
                params![subject.as_bytes().as_slice(), content_id.as_bytes().as_slice()],
            )?;
            Ok(removed > 0)
        })
    }

    async fn purge_all(&self) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM plaintext_cache", [])?))
    }

    async fn remove_expired(&self, now: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM plaintext_cache WHERE expires_at <= ?1",
                params![now],
            )?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierseal_core::Keypair;

    fn make_session(keypair: &Keypair, scope: &str, expires_at: i64) -> SessionMetadata {
        let session = Keypair::generate();
        let message = b"Accessing keys".to_vec();
        SessionMetadata {
            subject: keypair.address(),
            scope: scope.to_string(),
            issued_at: 1_000,
            nominal_ttl_ms: 30 * 60 * 1000,
            expires_at,
            session_public_key: session.public_key(),
            signature: keypair.sign(&message),
            personal_message: message,
        }
    }

    const READER: Address = Address::from_bytes([0xaa; 32]);

    fn make_entry(byte: u8, expires_at: i64, tier: Option<ObjectId>) -> CacheEntry {
        CacheEntry {
            content_id: ObjectId::from_bytes([byte; 32]),
            subject: READER,
            plaintext: Bytes::from(vec![byte; 16]),
            owner_tier: tier,
            expires_at,
            stored_at: 10,
        }
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let meta = make_session(&keypair, "0xpkg", 5_000);

        store.save_session(&meta).await.unwrap();
        let loaded = store
            .load_session(&keypair.address(), "0xpkg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, meta);

        assert!(store
            .load_session(&keypair.address(), "0xother")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_session_replace_and_clear() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();

        store.save_session(&make_session(&keypair, "a", 5_000)).await.unwrap();
        store.save_session(&make_session(&keypair, "a", 9_000)).await.unwrap();
        store.save_session(&make_session(&keypair, "b", 9_000)).await.unwrap();

        let loaded = store.load_session(&keypair.address(), "a").await.unwrap().unwrap();
        assert_eq!(loaded.expires_at, 9_000);

        assert_eq!(store.clear_sessions(&keypair.address()).await.unwrap(), 2);
        assert!(store.load_session(&keypair.address(), "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_entry_with_and_without_tier() {
        let store = SqliteStore::open_memory().unwrap();
        let tier = ObjectId::from_bytes([0xee; 32]);

        let gated = make_entry(1, 100, Some(tier));
        let creator = make_entry(2, 100, None);
        store.put_entry(&gated).await.unwrap();
        store.put_entry(&creator).await.unwrap();

        assert_eq!(
            store.get_entry(&READER, &gated.content_id).await.unwrap(),
            Some(gated.clone())
        );
        assert_eq!(
            store.get_entry(&READER, &creator.content_id).await.unwrap(),
            Some(creator)
        );

        assert!(store.remove_entry(&READER, &gated.content_id).await.unwrap());
        assert!(!store.remove_entry(&READER, &gated.content_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_entry_is_invisible_to_other_subjects() {
        let store = SqliteStore::open_memory().unwrap();
        let entry = make_entry(4, 100, None);
        let stranger = Address::from_bytes([0xbb; 32]);
        store.put_entry(&entry).await.unwrap();

        assert!(store.get_entry(&stranger, &entry.content_id).await.unwrap().is_none());
        assert!(!store.remove_entry(&stranger, &entry.content_id).await.unwrap());

        let theirs = CacheEntry {
            subject: stranger,
            plaintext: Bytes::from_static(b"theirs"),
            ..entry.clone()
        };
        store.put_entry(&theirs).await.unwrap();
        assert_eq!(store.get_entry(&READER, &entry.content_id).await.unwrap(), Some(entry));
        assert_eq!(store.get_entry(&stranger, &theirs.content_id).await.unwrap(), Some(theirs));
    }

    #[tokio::test]
    async fn test_remove_expired_is_inclusive() {
        let store = SqliteStore::open_memory().unwrap();
        store.put_entry(&make_entry(1, 100, None)).await.unwrap();
        store.put_entry(&make_entry(2, 101, None)).await.unwrap();

        assert_eq!(store.remove_expired(100).await.unwrap(), 1);
        assert!(store
            .get_entry(&READER, &ObjectId::from_bytes([2; 32]))
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.purge_all().await.unwrap(), 1);
    }
}
