//! Records persisted by the local stores.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use tierseal_core::{Address, Ed25519PublicKey, Ed25519Signature, ObjectId};

/// Issuance parameters of a session key.
///
/// The live session object holds an ephemeral signing key and cannot be
/// persisted; this is everything that can. Restoring from it always costs one
/// fresh wallet signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub subject: Address,

    /// Authorization namespace (the package id).
    pub scope: String,

    /// When the session was first issued (Unix ms).
    pub issued_at: i64,

    /// Lifetime requested from the key-issuing services.
    pub nominal_ttl_ms: i64,

    /// When the client stops using the session (Unix ms). Earlier than
    /// `issued_at + nominal_ttl_ms`.
    pub expires_at: i64,

    /// Public half of the last ephemeral session key.
    pub session_public_key: Ed25519PublicKey,

    /// The personal message the subject last signed.
    pub personal_message: Vec<u8>,

    /// The subject's signature over `personal_message`.
    pub signature: Ed25519Signature,
}

impl SessionMetadata {
    /// Usable for `subject`/`scope` at `now`.
    pub fn is_usable_for(&self, subject: &Address, scope: &str, now: i64) -> bool {
        &self.subject == subject && self.scope == scope && now < self.expires_at
    }
}

/// A decrypted content item held locally for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub content_id: ObjectId,

    /// The subject the plaintext was decrypted for. Nobody else may read it.
    pub subject: Address,

    pub plaintext: Bytes,

    /// Tier the content was gated by, if any.
    pub owner_tier: Option<ObjectId>,

    /// Expiry of the subscription (or session) that authorized the decrypt.
    pub expires_at: i64,

    pub stored_at: i64,
}

impl CacheEntry {
    /// Entries die at their authorizing subscription's expiry, inclusive.
    pub fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_entry_expiry_boundary() {
        let entry = CacheEntry {
            content_id: ObjectId::from_bytes([1; 32]),
            subject: Address::from_bytes([2; 32]),
            plaintext: Bytes::from_static(b"x"),
            owner_tier: None,
            expires_at: 1_000,
            stored_at: 0,
        };
        assert!(entry.is_live(999));
        assert!(!entry.is_live(1_000));
    }
}
