//! # tierseal testkit
//!
//! Testing utilities for tierseal.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an in-memory deployment (ledger, blob store, key servers,
//!   a creator with a profile) on one manual clock
//! - **Generators**: Proptest strategies for key material and identifiers
//!
//! ## Test Fixtures
//!
//! ```rust
//! use tierseal_testkit::fixtures::{TestWorld, DAY_MILLIS};
//! use tierseal_ledger::MessageSigner;
//!
//! let world = TestWorld::new();
//! let tier = world.create_tier();
//! let fan = world.fan();
//! world.subscribe(&fan.address(), &tier, 30 * DAY_MILLIS);
//! let record = world.insert_sealed(&tier, b"members only");
//! assert!(!record.is_public);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tierseal_testkit::generators::{ciphertext, key_material};
//!
//! proptest! {
//!     #[test]
//!     fn classification_is_stable(material in key_material(), ct in ciphertext()) {
//!         let parsed = KeyMaterial::classify(false, &material.encode(), &ct).unwrap();
//!         prop_assert_eq!(parsed, material);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{fans, TestWorld, DAY_MILLIS, MINUTE_MILLIS, PACKAGE, START_MILLIS};
