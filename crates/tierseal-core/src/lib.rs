//! # tierseal core
//!
//! Pure primitives shared by every tierseal crate: ledger identifiers and
//! addresses, Ed25519 identity keys, content records, the clock abstraction,
//! and the on-chain key-material formats.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`ObjectId`] / [`Address`] - 32-byte ledger identifiers
//! - [`ContentRecord`] - the immutable on-chain description of a content item
//! - [`KeyMaterial`] - the decoded, tagged form of the opaque key-material string
//! - [`Clock`] - injectable time source (epoch milliseconds)
//!
//! ## Key Material
//!
//! The ledger stores key material as a base64 string with no version tag.
//! [`KeyMaterial::classify`] recovers the variant structurally. See
//! [`key_material`] for the exact precedence.

pub mod clock;
pub mod content;
pub mod crypto;
pub mod error;
pub mod key_material;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use content::{BlobRef, ContentKind, ContentRecord};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, KeyMaterialError};
pub use key_material::{KeyMaterial, IDENTITY_PREFIX, LEGACY_KEY_LEN, NONCE_LEN};
pub use types::{Address, ObjectId};
