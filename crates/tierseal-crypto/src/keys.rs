//! Key types: X25519 agreement, share wrapping and the AES-256-GCM DEM.
//!
//! Shares of a content key are wrapped per key server with ChaCha20-Poly1305
//! under a key derived from an X25519 agreement between a fresh ephemeral key
//! and the server's static key. The content itself is sealed with AES-256-GCM,
//! the same primitive the legacy formats use.

use aes_gcm::{aead::Payload, Aes256Gcm};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use tierseal_core::ObjectId;

use crate::error::{CryptoError, Result};

/// Blake3 derive-key context for share wrapping keys.
const WRAP_CONTEXT: &str = "tierseal-seal-v1 share wrapping";

/// AES-GCM and ChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 12;

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// A key server's long-lived X25519 secret.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

/// One-shot key pair used to wrap a single share.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Consumes the secret.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

/// Output of an X25519 agreement.
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive the wrapping key for one service's share of one identity.
    ///
    /// Fields are length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
    pub fn derive_wrapping_key(
        &self,
        namespace: &str,
        identity: &str,
        service_id: &ObjectId,
    ) -> WrappingKey {
        let mut hasher = blake3::Hasher::new_derive_key(WRAP_CONTEXT);
        hasher.update(&self.0);
        for field in [namespace.as_bytes(), identity.as_bytes()] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        hasher.update(service_id.as_bytes());
        WrappingKey(*hasher.finalize().as_bytes())
    }
}

/// ChaCha20-Poly1305 key that wraps a single share.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappingKey([u8; 32]);

impl WrappingKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

impl fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WrappingKey(..)")
    }
}

/// AES-256-GCM data-encapsulation key.
#[derive(Clone, PartialEq, Eq)]
pub struct DemKey([u8; 32]);

impl DemKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        cipher
            .encrypt(
                aes_gcm::Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        cipher
            .decrypt(
                aes_gcm::Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

impl fmt::Debug for DemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DemKey(..)")
    }
}

/// A fresh random nonce.
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_agreement_matches_static_side() {
        let server = X25519StaticSecret::generate();
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let service = ObjectId::from_bytes([3; 32]);
        let client_key = ephemeral
            .diffie_hellman(&server.public_key())
            .derive_wrapping_key("0xpkg", "abcd", &service);
        let server_key = server
            .diffie_hellman(&ephemeral_public)
            .derive_wrapping_key("0xpkg", "abcd", &service);

        assert_eq!(client_key, server_key);
    }

    #[test]
    fn test_wrapping_key_binds_identity_and_service() {
        let shared = SharedKey([0x42; 32]);
        let service = ObjectId::from_bytes([1; 32]);
        let base = shared.derive_wrapping_key("0xpkg", "abcd", &service);

        assert_ne!(base, shared.derive_wrapping_key("0xpkg", "abce", &service));
        assert_ne!(base, shared.derive_wrapping_key("0xpk", "gabcd", &service));
        assert_ne!(
            base,
            shared.derive_wrapping_key("0xpkg", "abcd", &ObjectId::from_bytes([2; 32]))
        );
    }

    #[test]
    fn test_wrapping_key_rejects_wrong_key() {
        let nonce = random_nonce();
        let ct = WrappingKey::from_bytes([1; 32]).encrypt(b"share", &nonce).unwrap();

        assert_eq!(
            WrappingKey::from_bytes([1; 32]).decrypt(&ct, &nonce).unwrap(),
            b"share"
        );
        assert!(WrappingKey::from_bytes([2; 32]).decrypt(&ct, &nonce).is_err());
    }

    #[test]
    fn test_dem_key_authenticates_aad() {
        let key = DemKey::generate();
        let nonce = random_nonce();
        let ct = key.encrypt(b"members only", &nonce, b"header").unwrap();

        assert_eq!(key.decrypt(&ct, &nonce, b"header").unwrap(), b"members only");
        assert!(matches!(
            key.decrypt(&ct, &nonce, b"other"),
            Err(CryptoError::Decryption(_))
        ));
    }
}
