//! Error types for tierseal core.

use thiserror::Error;

/// Core errors for identifiers and signatures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

/// Errors produced while classifying on-chain key material.
///
/// `Missing` is kept apart from the shape errors: content published before
/// key material was stored on-chain can never be decrypted and must be
/// re-published, which is a different remedy than a corrupt string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyMaterialError {
    #[error("key material is missing")]
    Missing,

    #[error("key material is not valid base64: {0}")]
    Base64(String),

    #[error("key material is not valid UTF-8")]
    Utf8,

    #[error("identity key material must have 2 parts (seal_<id>:key), got {0}")]
    IdentityShape(usize),

    #[error("unrecognized key material shape: expected 2 or 3 parts, got {0}")]
    UnrecognizedShape(usize),

    #[error("invalid byte list in {field}: {reason}")]
    ByteList { field: &'static str, reason: String },

    #[error("invalid {field} length: expected {expected}, got {got}")]
    Length {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("empty policy id")]
    EmptyPolicyId,

    #[error("ciphertext too short for a prefixed nonce: {0} bytes")]
    CiphertextTooShort(usize),
}
