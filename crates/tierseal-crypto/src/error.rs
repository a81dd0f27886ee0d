//! Error types for the crypto module.

use std::time::Duration;

use thiserror::Error;

use tierseal_core::KeyMaterialError;

/// Errors that can occur during encryption, decryption or share recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("encryption error: {0}")]
    Encryption(String),

    /// AEAD authentication failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid share: {0}")]
    InvalidShare(String),

    #[error("malformed encrypted object: {0}")]
    MalformedObject(String),

    /// The object was encrypted for a different namespace or identity.
    #[error("identity mismatch: expected {expected}, found {found}")]
    IdentityMismatch { expected: String, found: String },

    #[error("invalid key server configuration: {0}")]
    Config(String),

    /// Every key server that answered refused the access proof.
    #[error("access proof rejected: {0}")]
    ProofRejected(String),

    #[error("insufficient key shares: needed {needed}, got {got}")]
    InsufficientShares { needed: usize, got: usize },

    #[error("key servers did not answer within {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    KeyMaterial(#[from] KeyMaterialError),
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
