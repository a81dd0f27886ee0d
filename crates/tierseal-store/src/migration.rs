//! Database schema migrations for SQLite.
//!
//! Versioned and forward-only. Each version is a batch of SQL applied inside
//! one transaction together with its `schema_migrations` row.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "store schema migrated");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: sessions and plaintext cache.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE session_metadata (
            subject BLOB NOT NULL,              -- 32 bytes, ledger address
            scope TEXT NOT NULL,                -- authorization namespace
            issued_at INTEGER NOT NULL,         -- Unix ms
            nominal_ttl_ms INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,        -- Unix ms, client-side cutoff
            session_public_key BLOB NOT NULL,   -- 32 bytes, Ed25519
            personal_message BLOB NOT NULL,
            signature BLOB NOT NULL,            -- 64 bytes, Ed25519

            PRIMARY KEY (subject, scope)
        );

        CREATE TABLE plaintext_cache (
            content_id BLOB PRIMARY KEY,        -- 32 bytes
            plaintext BLOB NOT NULL,
            owner_tier BLOB,                    -- 32 bytes, nullable for creator/public reads
            expires_at INTEGER NOT NULL,        -- Unix ms
            stored_at INTEGER NOT NULL          -- Unix ms
        );

        CREATE INDEX idx_plaintext_cache_expires ON plaintext_cache(expires_at);
        "#,
    )?;

    Ok(())
}

/// Migration v2: plaintext cache keyed by subject.
///
/// v1 rows carry no subject and cannot be attributed, so they are dropped.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP INDEX IF EXISTS idx_plaintext_cache_expires;
        DROP TABLE plaintext_cache;

        CREATE TABLE plaintext_cache (
            subject BLOB NOT NULL,              -- 32 bytes, ledger address
            content_id BLOB NOT NULL,           -- 32 bytes
            plaintext BLOB NOT NULL,
            owner_tier BLOB,                    -- 32 bytes, nullable for creator/public reads
            expires_at INTEGER NOT NULL,        -- Unix ms
            stored_at INTEGER NOT NULL,         -- Unix ms

            PRIMARY KEY (subject, content_id)
        );

        CREATE INDEX idx_plaintext_cache_expires ON plaintext_cache(expires_at);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
