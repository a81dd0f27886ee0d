//! Proptest generators for property-based testing.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use proptest::prelude::*;

use tierseal_core::{Address, KeyMaterial, ObjectId, LEGACY_KEY_LEN, NONCE_LEN};

/// Generate a random ObjectId.
pub fn object_id() -> impl Strategy<Value = ObjectId> {
    any::<[u8; 32]>().prop_map(ObjectId::from_bytes)
}

/// Generate a random Address.
pub fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 32]>().prop_map(Address::from_bytes)
}

/// Generate a policy id. Never contains `:`.
pub fn policy_id() -> impl Strategy<Value = String> {
    "[0-9a-f]{1,64}"
}

/// Identity-encrypted key material.
pub fn identity_material() -> impl Strategy<Value = KeyMaterial> {
    (policy_id(), prop::collection::vec(any::<u8>(), 1..=48))
        .prop_map(|(policy_id, raw_key)| KeyMaterial::IdentityEncrypted { policy_id, raw_key })
}

/// 3-part legacy key material.
pub fn legacy3_material() -> impl Strategy<Value = KeyMaterial> {
    (
        any::<[u8; NONCE_LEN]>(),
        policy_id(),
        any::<[u8; LEGACY_KEY_LEN]>(),
    )
        .prop_map(|(iv, policy_id, key)| KeyMaterial::LegacySymmetric3 { iv, policy_id, key })
}

/// 2-part legacy key material.
pub fn legacy2_material() -> impl Strategy<Value = KeyMaterial> {
    (policy_id(), any::<[u8; LEGACY_KEY_LEN]>())
        .prop_map(|(policy_id, key)| KeyMaterial::LegacySymmetric2 { policy_id, key })
}

/// Any encrypted key material.
pub fn key_material() -> impl Strategy<Value = KeyMaterial> {
    prop_oneof![identity_material(), legacy3_material(), legacy2_material()]
}

/// Ciphertext long enough to carry a prefixed nonce.
pub fn ciphertext() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), NONCE_LEN + 1..=256)
}

/// Ciphertext too short to carry a prefixed nonce.
pub fn short_ciphertext() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=NONCE_LEN)
}

/// Comma-separated decimal byte list.
pub fn byte_list(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<u8>(), 1..=max_len).prop_map(|bytes| {
        bytes
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    })
}

/// Decoded text with no `:` separator at all.
pub fn separatorless_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_ ,.-]{1,64}"
}

/// Base64-encode decoded key-material text as the ledger stores it.
pub fn encode_text(text: &str) -> String {
    STANDARD.encode(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn test_policy_ids_have_no_separator() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let id = policy_id().new_tree(&mut runner).unwrap().current();
            assert!(!id.is_empty());
            assert!(!id.contains(':'));
        }
    }
}
