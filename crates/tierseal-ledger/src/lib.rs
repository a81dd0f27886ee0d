//! # tierseal ledger
//!
//! The external collaborators the decryption engine talks to, expressed as
//! async traits: the ledger client, the connected wallet, and the blob store.
//!
//! ## Key Types
//!
//! - [`LedgerClient`] - object reads, event queries, build / dry-run / submit
//! - [`MessageSigner`] - personal-message and transaction signing
//! - [`BlobStore`] / [`BlobEndpoint`] - content-addressed bytes, with
//!   [`FallbackBlobStore`] walking aggregators then publishers
//! - [`TransactionData`] / [`MoveCall`] / [`CallArg`] - the unsigned
//!   transaction model used for access proofs and publishing
//!
//! ## In-memory doubles
//!
//! [`memory::MemoryLedger`] evaluates the platform's proof and publish calls
//! with the same abort conditions as the on-chain package, so the whole
//! engine can run in process. [`memory::MemoryBlobStore`] is one endpoint.

pub mod blob;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod package;
pub mod signer;
pub mod transaction;

pub use blob::{blob_id_for, BlobEndpoint, BlobStore, BlobStoreConfig, FallbackBlobStore};
pub use error::{BlobError, BlobResult, LedgerError, Result};
pub use ledger::{LedgerClient, LedgerEvent, LedgerObject, TransactionEffects};
pub use signer::{sign_built, KeypairSigner, MessageSigner};
pub use transaction::{BuiltTransaction, CallArg, MoveCall, SignedTransaction, TransactionData};
