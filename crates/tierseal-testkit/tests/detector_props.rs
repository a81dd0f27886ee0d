//! Property tests for key-material classification.

use proptest::prelude::*;

use tierseal_core::{KeyMaterial, KeyMaterialError, IDENTITY_PREFIX};
use tierseal_testkit::generators::*;

proptest! {
    #[test]
    fn encoded_material_classifies_to_itself(material in key_material(), ct in ciphertext()) {
        let parsed = KeyMaterial::classify(false, &material.encode(), &ct).unwrap();
        prop_assert_eq!(parsed, material);
    }

    #[test]
    fn public_short_circuits_any_string(encoded in ".*", ct in short_ciphertext()) {
        prop_assert_eq!(KeyMaterial::classify(true, &encoded, &ct), Ok(KeyMaterial::Public));
    }

    #[test]
    fn identity_prefix_wins_over_two_part_legacy(policy in policy_id(), key in byte_list(32), ct in ciphertext()) {
        // Also a well-formed 2-part string when the key is 32 bytes long.
        let text = format!("{}{}:{}", IDENTITY_PREFIX, policy, key);
        let parsed = KeyMaterial::classify(false, &encode_text(&text), &ct).unwrap();
        let is_identity = matches!(parsed, KeyMaterial::IdentityEncrypted { .. });
        prop_assert!(is_identity);
    }

    #[test]
    fn text_without_separator_is_unrecognized(text in separatorless_text(), ct in ciphertext()) {
        prop_assume!(!text.starts_with(IDENTITY_PREFIX));
        let result = KeyMaterial::classify(false, &encode_text(&text), &ct);
        prop_assert_eq!(result, Err(KeyMaterialError::UnrecognizedShape(1)));
    }

    #[test]
    fn two_part_legacy_needs_a_nonce_prefix(material in legacy2_material(), ct in short_ciphertext()) {
        let result = KeyMaterial::classify(false, &material.encode(), &ct);
        prop_assert_eq!(result, Err(KeyMaterialError::CiphertextTooShort(ct.len())));
    }

    #[test]
    fn three_part_legacy_ignores_ciphertext_length(material in legacy3_material(), ct in short_ciphertext()) {
        let parsed = KeyMaterial::classify(false, &material.encode(), &ct).unwrap();
        prop_assert_eq!(parsed, material);
    }
}
