//! Error types for the ledger and blob store seams.

use thiserror::Error;

use tierseal_core::{BlobRef, CoreError, ObjectId};

/// Errors returned by a ledger client or wallet signer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The object does not exist (or no longer exists).
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A transaction referenced an object the ledger no longer has.
    #[error("stale object reference: {0}")]
    StaleObject(ObjectId),

    /// Transport or node failure.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A call aborted while executing (or dry-running).
    #[error("{function} aborted: {reason}")]
    Aborted { function: String, reason: String },

    /// The wallet declined to sign, or a signature did not verify.
    #[error("signature rejected: {0}")]
    SignatureRejected(String),

    /// Malformed transaction bytes or arguments.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl LedgerError {
    /// Whether the error came from the network rather than from ledger state.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Rpc(_))
    }
}

/// Errors returned by blob endpoints and stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// The blob is unknown to every endpoint that was asked.
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    /// At least one endpoint failed for a reason other than not-found.
    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    /// The endpoint refused an upload.
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Result type for blob operations.
pub type BlobResult<T> = std::result::Result<T, BlobError>;
