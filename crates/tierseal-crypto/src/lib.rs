//! # tierseal crypto
//!
//! Everything between key material and plaintext.
//!
//! ## Key Types
//!
//! - [`IdentityEncryptionClient`] - threshold encrypt-for-identity and
//!   proof-gated decrypt against T-of-N [`KeyServer`]s
//! - [`EncryptedObject`] - the self-describing envelope stored as the blob
//! - [`SessionKey`] / [`SessionCertificate`] - the wallet-endorsed session
//!   presented with every key request
//! - [`decrypt_legacy`] - the two pre-identity symmetric formats
//!
//! ## Design Notes
//!
//! - Shares are wrapped per server with X25519 + ChaCha20-Poly1305; the
//!   wrapping key is bound to namespace, identity and service id, so a key
//!   released for one identity opens nothing else.
//! - The payload key is AES-256-GCM, authenticated over the envelope header.
//!   A wrong combination of shares fails authentication instead of yielding
//!   garbage.

pub mod client;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod keyserver;
pub mod legacy;
pub mod session;
pub mod shamir;

pub use client::{IdentityCiphertext, IdentityEncryptionClient, KeyServerConfig, SealConfig};
pub use envelope::{EncryptedObject, WrappedShare};
pub use error::{CryptoError, Result};
pub use keys::{DemKey, X25519PublicKey, X25519StaticSecret};
pub use keyserver::memory::MemoryKeyServer;
pub use keyserver::{KeyRequest, KeyResponse, KeyServer, KeyServerError};
pub use legacy::{decrypt_legacy, encrypt_legacy2, encrypt_legacy3};
pub use session::{personal_message, SessionCertificate, SessionKey};
