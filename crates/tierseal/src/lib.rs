//! # tierseal
//!
//! Client-side access control and decryption for creator subscriptions.
//!
//! ## Overview
//!
//! Content records live on a ledger; their bytes live in a blob store,
//! usually encrypted. A reader gets plaintext through one call,
//! [`DecryptionEngine::resolve_and_decrypt`], which:
//!
//! - **Resolves** the subscription credential the reader holds for the
//!   content's tier (or recognizes the reader as the creator)
//! - **Proves** access with a built, never-submitted ledger transaction
//! - **Fetches** key shares from a threshold of key servers under a
//!   wallet-signed session key
//! - **Caches** the plaintext until the authorizing subscription expires
//!
//! Legacy content sealed with an on-chain symmetric key skips the key
//! servers but still requires a live credential.
//!
//! ## Key Concepts
//!
//! - **Session**: one wallet signature per `(subject, package)` buys a
//!   session key usable for 28 minutes. Concurrent first reads share one
//!   signature prompt.
//! - **Cache bound**: a cached plaintext never outlives the credential that
//!   authorized it.
//! - **Failure kinds**: every error maps to a [`FailureKind`]; only share,
//!   timeout and retrieval failures are worth retrying.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tierseal::ledger::MessageSigner;
//! use tierseal::DecryptionEngine;
//!
//! async fn read(engine: &DecryptionEngine, signer: Arc<dyn MessageSigner>) {
//!     let subject = signer.address();
//!     engine.connect(signer).await.unwrap();
//!
//!     let id = tierseal::core::ObjectId::random();
//!     if let Some(record) = engine.load_content(&id).await.unwrap() {
//!         match engine.resolve_and_decrypt(&record, Some(&subject)).await {
//!             Ok(content) => println!("{} bytes", content.bytes.len()),
//!             Err(e) => println!("{}", e.user_message()),
//!         }
//!     }
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `tierseal::core` - identifiers, content records, key material
//! - `tierseal::store` - session and cache persistence
//! - `tierseal::ledger` - ledger and blob-store clients
//! - `tierseal::crypto` - identity encryption and key servers

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod proof;
pub mod publish;
pub mod resolver;
pub mod session;

// Re-export component crates
pub use tierseal_core as core;
pub use tierseal_crypto as crypto;
pub use tierseal_ledger as ledger;
pub use tierseal_store as store;

pub use cache::PlaintextCache;
pub use config::{BlobStoreConfig, ConfigError, EngineConfig, SessionConfig};
pub use engine::{
    Collaborators, ContentFormat, DecryptSource, DecryptState, DecryptTrace, Decrypted,
    DecryptionEngine,
};
pub use error::{EngineError, FailureKind, Result, SessionError};
pub use proof::{AccessProof, AccessProofBuilder, ProofClaim};
pub use publish::{load_content, policy_id_for, record_from_object, PublishRequest, Publisher, Visibility};
pub use resolver::{SubscriptionCredential, SubscriptionResolver, SubscriptionStatus};
pub use session::{ActiveSession, PurgeReport, SessionKeyManager, SessionState};

pub use tierseal_core::{Address, ContentKind, ContentRecord, KeyMaterial, ObjectId};
