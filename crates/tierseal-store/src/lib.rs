//! # tierseal store
//!
//! Subject-scoped local persistence: the browser-storage analogue that holds
//! session issuance metadata and decrypted plaintext between runs.
//!
//! ## Key Types
//!
//! - [`SessionStore`] / [`CacheStore`] - async traits the engine is generic over
//! - [`SqliteStore`] - persistent storage with versioned migrations
//! - [`MemoryStore`] - in-memory storage for tests and ephemeral clients
//! - [`SessionMetadata`] - the serializable half of a session key
//! - [`CacheEntry`] - decrypted bytes plus the subscription expiry that bounds them
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tierseal_store::{CacheStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("tierseal.db").unwrap();
//!     let purged = store.purge_all().await.unwrap();
//!     println!("purged {purged} cached items");
//! }
//! ```
//!
//! ## Design Notes
//!
//! - Stores never judge expiry on read; callers compare against their clock.
//!   [`CacheStore::remove_expired`] is a sweep, not a read filter.
//! - Session and cache purges are separate calls here; coupling them is the
//!   session manager's job.

pub mod error;
pub mod memory;
pub mod migration;
pub mod records;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use records::{CacheEntry, SessionMetadata};
pub use sqlite::SqliteStore;
pub use traits::{CacheStore, SessionStore};
