//! The identity-encrypted object stored in the blob store.
//!
//! The object is self-describing: it names the namespace and identity it was
//! sealed for, the threshold, and one wrapped share per share slot. A key
//! server with weight `w` owns `w` consecutive slots.

use serde::{Deserialize, Serialize};

use tierseal_core::ObjectId;

use crate::error::{CryptoError, Result};
use crate::keys::{X25519PublicKey, NONCE_LEN};

/// Current envelope version.
pub const ENVELOPE_VERSION: u8 = 1;

/// A share wrapped for one key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedShare {
    pub service_id: ObjectId,
    pub ephemeral_public: X25519PublicKey,
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Ciphertext sealed for an identity under T-of-N key servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedObject {
    pub version: u8,
    pub namespace: String,
    pub identity: String,
    pub threshold: u8,
    pub shares: Vec<WrappedShare>,
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncryptedObject {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize and sanity-check CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let object: Self = ciborium::from_reader(bytes)
            .map_err(|e| CryptoError::MalformedObject(e.to_string()))?;
        if object.version != ENVELOPE_VERSION {
            return Err(CryptoError::MalformedObject(format!(
                "unsupported version {}",
                object.version
            )));
        }
        if object.threshold == 0 || object.threshold as usize > object.shares.len() {
            return Err(CryptoError::MalformedObject(format!(
                "threshold {} with {} shares",
                object.threshold,
                object.shares.len()
            )));
        }
        Ok(object)
    }

    /// Additional data bound into the payload AEAD.
    pub fn header_aad(namespace: &str, identity: &str) -> Vec<u8> {
        let mut aad = Vec::with_capacity(namespace.len() + identity.len() + 17);
        aad.push(ENVELOPE_VERSION);
        for field in [namespace.as_bytes(), identity.as_bytes()] {
            aad.extend_from_slice(&(field.len() as u64).to_le_bytes());
            aad.extend_from_slice(field);
        }
        aad
    }

    /// Fail unless the object was sealed for exactly this namespace and identity.
    pub fn check_identity(&self, namespace: &str, identity: &str) -> Result<()> {
        if self.namespace != namespace || self.identity != identity {
            return Err(CryptoError::IdentityMismatch {
                expected: format!("{}/{}", namespace, identity),
                found: format!("{}/{}", self.namespace, self.identity),
            });
        }
        Ok(())
    }

    /// Wrapped shares belonging to one service, in slot order.
    pub fn shares_for(&self, service_id: &ObjectId) -> Vec<&WrappedShare> {
        self.shares
            .iter()
            .filter(|s| &s.service_id == service_id)
            .collect()
    }
}
