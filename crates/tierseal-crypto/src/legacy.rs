//! Decoders for the two symmetric formats that predate identity encryption.
//!
//! Both are bare AES-256-GCM without additional data. The 3-part format keeps
//! its nonce in the key material and the blob is the raw ciphertext; the
//! 2-part format prefixes the nonce to the blob.

use tierseal_core::{KeyMaterial, KeyMaterialError, NONCE_LEN};

use crate::error::{CryptoError, Result};
use crate::keys::{random_nonce, DemKey};

/// Decrypt legacy content.
pub fn decrypt_legacy(material: &KeyMaterial, blob: &[u8]) -> Result<Vec<u8>> {
    match material {
        KeyMaterial::LegacySymmetric3 { iv, key, .. } => {
            DemKey::from_bytes(*key).decrypt(blob, iv, &[])
        }
        KeyMaterial::LegacySymmetric2 { key, .. } => {
            if blob.len() <= NONCE_LEN {
                return Err(KeyMaterialError::CiphertextTooShort(blob.len()).into());
            }
            let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
            let mut iv = [0u8; NONCE_LEN];
            iv.copy_from_slice(nonce);
            DemKey::from_bytes(*key).decrypt(ciphertext, &iv, &[])
        }
        other => Err(CryptoError::InvalidKey(format!(
            "{} key material is not legacy",
            other.format_name()
        ))),
    }
}

/// Produce 3-part legacy key material and its blob.
pub fn encrypt_legacy3(plaintext: &[u8], policy_id: &str) -> Result<(KeyMaterial, Vec<u8>)> {
    let key = DemKey::generate();
    let iv = random_nonce();
    let blob = key.encrypt(plaintext, &iv, &[])?;
    Ok((
        KeyMaterial::LegacySymmetric3 {
            iv,
            policy_id: policy_id.to_string(),
            key: *key.as_bytes(),
        },
        blob,
    ))
}

/// Produce 2-part legacy key material and its nonce-prefixed blob.
pub fn encrypt_legacy2(plaintext: &[u8], policy_id: &str) -> Result<(KeyMaterial, Vec<u8>)> {
    let key = DemKey::generate();
    let iv = random_nonce();
    let mut blob = iv.to_vec();
    blob.extend(key.encrypt(plaintext, &iv, &[])?);
    Ok((
        KeyMaterial::LegacySymmetric2 {
            policy_id: policy_id.to_string(),
            key: *key.as_bytes(),
        },
        blob,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy3_blob_has_no_nonce_prefix() {
        let (material, blob) = encrypt_legacy3(b"old post", "p1").unwrap();
        // 16-byte tag, no prefix
        assert_eq!(blob.len(), b"old post".len() + 16);

        let reparsed = KeyMaterial::parse(&material.encode(), &blob).unwrap();
        assert_eq!(decrypt_legacy(&reparsed, &blob).unwrap(), b"old post");
    }

    #[test]
    fn test_legacy2_blob_is_nonce_prefixed() {
        let (material, blob) = encrypt_legacy2(b"older post", "p2").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + b"older post".len() + 16);

        let reparsed = KeyMaterial::parse(&material.encode(), &blob).unwrap();
        assert!(matches!(reparsed, KeyMaterial::LegacySymmetric2 { .. }));
        assert_eq!(decrypt_legacy(&reparsed, &blob).unwrap(), b"older post");
    }

    #[test]
    fn test_nonce_handling_is_not_interchangeable() {
        let (material, blob) = encrypt_legacy3(b"old post", "p1").unwrap();
        let KeyMaterial::LegacySymmetric3 { policy_id, key, .. } = material else {
            unreachable!()
        };
        // the same key treated as 2-part reads the first 12 bytes as nonce
        let as_two_part = KeyMaterial::LegacySymmetric2 { policy_id, key };
        assert!(matches!(
            decrypt_legacy(&as_two_part, &blob),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let (_, blob) = encrypt_legacy2(b"secret", "p").unwrap();
        let wrong = KeyMaterial::LegacySymmetric2 {
            policy_id: "p".into(),
            key: [0; 32],
        };
        assert!(matches!(
            decrypt_legacy(&wrong, &blob),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_rejects_non_legacy_material() {
        assert!(decrypt_legacy(&KeyMaterial::Public, b"x").is_err());
    }
}
