//! On-chain key material: the Format Detector.
//!
//! The ledger stores a single base64 string per content item. Its decoded
//! form is one of three encodings produced by successive protocol versions,
//! none of which carries a version tag:
//!
//! | Variant | Decoded form |
//! |---------|--------------|
//! | identity-encrypted (current) | `seal_<policyId>:<key bytes>` |
//! | 3-part legacy | `<iv bytes>:<policyId>:<key bytes>` |
//! | 2-part legacy | `<policyId>:<key bytes>` |
//!
//! Byte lists are comma-separated decimal values. Classification runs an
//! ordered chain of parsers and the first one whose shape applies wins, so a
//! string such as `seal_a:1,2` is identity-encrypted and never 2-part legacy.
//! The order of [`DETECTORS`] is part of the on-chain contract.
//!
//! Legacy ciphertexts are raw AES-256-GCM output with a 12-byte nonce. For the
//! 3-part form the nonce lives in the key material and the blob is the bare
//! ciphertext; for the 2-part form the nonce is the first 12 bytes of the blob.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

use crate::error::KeyMaterialError;

/// Prefix that marks identity-encrypted key material.
pub const IDENTITY_PREFIX: &str = "seal_";

/// AES-GCM nonce length used by both legacy formats.
pub const NONCE_LEN: usize = 12;

/// AES-256 key length required by both legacy formats.
pub const LEGACY_KEY_LEN: usize = 32;

type Result<T> = std::result::Result<T, KeyMaterialError>;

/// A parser either claims the decoded text (`Some`), declines it (`None`) so
/// the next one runs, or claims it and finds it malformed (`Err`).
type Detector = fn(&str, &[u8]) -> Result<Option<KeyMaterial>>;

/// Ordered detection chain. Do not reorder.
const DETECTORS: [(&str, Detector); 3] = [
    ("identity", detect_identity),
    ("legacy-3", detect_legacy3),
    ("legacy-2", detect_legacy2),
];

/// Decoded key material.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// Public content: the blob is plaintext.
    Public,

    /// Encrypted for an identity under the threshold key-issuing services.
    IdentityEncrypted { policy_id: String, raw_key: Vec<u8> },

    /// AES-256-GCM with the nonce stored in the key material.
    LegacySymmetric3 {
        iv: [u8; NONCE_LEN],
        policy_id: String,
        key: [u8; LEGACY_KEY_LEN],
    },

    /// AES-256-GCM with the nonce prefixed to the ciphertext.
    LegacySymmetric2 {
        policy_id: String,
        key: [u8; LEGACY_KEY_LEN],
    },
}

impl KeyMaterial {
    /// Classify a content item's key material.
    ///
    /// Public content short-circuits to [`KeyMaterial::Public`] whatever the
    /// string holds. Otherwise the string must be present and parse.
    pub fn classify(is_public: bool, encoded: &str, ciphertext: &[u8]) -> Result<Self> {
        if is_public {
            return Ok(KeyMaterial::Public);
        }
        Self::parse(encoded, ciphertext)
    }

    /// Parse non-public key material through the ordered detector chain.
    pub fn parse(encoded: &str, ciphertext: &[u8]) -> Result<Self> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(KeyMaterialError::Missing);
        }

        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| KeyMaterialError::Base64(e.to_string()))?;
        let text = String::from_utf8(decoded).map_err(|_| KeyMaterialError::Utf8)?;

        for (_name, detect) in DETECTORS {
            if let Some(material) = detect(&text, ciphertext)? {
                return Ok(material);
            }
        }

        Err(KeyMaterialError::UnrecognizedShape(text.split(':').count()))
    }

    /// Encode back to the on-chain base64 form. Public content has none.
    pub fn encode(&self) -> String {
        let text = match self {
            KeyMaterial::Public => return String::new(),
            KeyMaterial::IdentityEncrypted { policy_id, raw_key } => {
                format!("{}{}:{}", IDENTITY_PREFIX, policy_id, join_bytes(raw_key))
            }
            KeyMaterial::LegacySymmetric3 { iv, policy_id, key } => {
                format!("{}:{}:{}", join_bytes(iv), policy_id, join_bytes(key))
            }
            KeyMaterial::LegacySymmetric2 { policy_id, key } => {
                format!("{}:{}", policy_id, join_bytes(key))
            }
        };
        STANDARD.encode(text)
    }

    /// Policy id for every encrypted variant.
    pub fn policy_id(&self) -> Option<&str> {
        match self {
            KeyMaterial::Public => None,
            KeyMaterial::IdentityEncrypted { policy_id, .. }
            | KeyMaterial::LegacySymmetric3 { policy_id, .. }
            | KeyMaterial::LegacySymmetric2 { policy_id, .. } => Some(policy_id),
        }
    }

    /// Short name for logs.
    pub fn format_name(&self) -> &'static str {
        match self {
            KeyMaterial::Public => "public",
            KeyMaterial::IdentityEncrypted { .. } => "identity",
            KeyMaterial::LegacySymmetric3 { .. } => "legacy-3",
            KeyMaterial::LegacySymmetric2 { .. } => "legacy-2",
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            KeyMaterial::LegacySymmetric3 { .. } | KeyMaterial::LegacySymmetric2 { .. }
        )
    }
}

impl fmt::Debug for KeyMaterial {
    // Key bytes stay out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.policy_id() {
            Some(policy_id) => write!(f, "KeyMaterial::{}({})", self.format_name(), policy_id),
            None => write!(f, "KeyMaterial::public"),
        }
    }
}

fn detect_identity(text: &str, _ciphertext: &[u8]) -> Result<Option<KeyMaterial>> {
    if !text.starts_with(IDENTITY_PREFIX) {
        return Ok(None);
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 2 {
        return Err(KeyMaterialError::IdentityShape(parts.len()));
    }

    let policy_id = &parts[0][IDENTITY_PREFIX.len()..];
    if policy_id.is_empty() {
        return Err(KeyMaterialError::EmptyPolicyId);
    }

    Ok(Some(KeyMaterial::IdentityEncrypted {
        policy_id: policy_id.to_string(),
        raw_key: parse_byte_list("key", parts[1])?,
    }))
}

fn detect_legacy3(text: &str, _ciphertext: &[u8]) -> Result<Option<KeyMaterial>> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return Ok(None);
    }

    Ok(Some(KeyMaterial::LegacySymmetric3 {
        iv: parse_fixed("iv", parts[0])?,
        policy_id: parts[1].to_string(),
        key: parse_fixed("key", parts[2])?,
    }))
}

fn detect_legacy2(text: &str, ciphertext: &[u8]) -> Result<Option<KeyMaterial>> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 2 {
        return Ok(None);
    }

    let key = parse_fixed("key", parts[1])?;
    if ciphertext.len() <= NONCE_LEN {
        return Err(KeyMaterialError::CiphertextTooShort(ciphertext.len()));
    }

    Ok(Some(KeyMaterial::LegacySymmetric2 {
        policy_id: parts[0].to_string(),
        key,
    }))
}

/// Parse a comma-separated list of decimal bytes.
fn parse_byte_list(field: &'static str, s: &str) -> Result<Vec<u8>> {
    if s.trim().is_empty() {
        return Err(KeyMaterialError::ByteList {
            field,
            reason: "empty".into(),
        });
    }
    s.split(',')
        .map(|tok| {
            tok.trim()
                .parse::<u8>()
                .map_err(|e| KeyMaterialError::ByteList {
                    field,
                    reason: format!("{:?}: {}", tok, e),
                })
        })
        .collect()
}

fn parse_fixed<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N]> {
    let bytes = parse_byte_list(field, s)?;
    let got = bytes.len();
    bytes.try_into().map_err(|_| KeyMaterialError::Length {
        field,
        expected: N,
        got,
    })
}

fn join_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        STANDARD.encode(s)
    }

    fn key_list(byte: u8, n: usize) -> String {
        vec![byte.to_string(); n].join(",")
    }

    #[test]
    fn test_public_ignores_material() {
        let m = KeyMaterial::classify(true, "garbage!!", b"").unwrap();
        assert_eq!(m, KeyMaterial::Public);
    }

    #[test]
    fn test_empty_is_missing_not_format() {
        assert_eq!(KeyMaterial::parse("", b"ct"), Err(KeyMaterialError::Missing));
        assert_eq!(KeyMaterial::parse("  ", b"ct"), Err(KeyMaterialError::Missing));
    }

    #[test]
    fn test_identity_detected() {
        let encoded = b64("seal_abc123:1,2,3");
        let m = KeyMaterial::parse(&encoded, b"").unwrap();
        assert_eq!(
            m,
            KeyMaterial::IdentityEncrypted {
                policy_id: "abc123".into(),
                raw_key: vec![1, 2, 3],
            }
        );
    }

    #[test]
    fn test_identity_wins_over_two_part() {
        // Also a structurally valid 2-part string.
        let encoded = b64(&format!("seal_p:{}", key_list(7, 32)));
        let m = KeyMaterial::parse(&encoded, &[0u8; 40]).unwrap();
        assert!(matches!(m, KeyMaterial::IdentityEncrypted { .. }));
    }

    #[test]
    fn test_identity_prefix_with_three_parts_is_error() {
        let encoded = b64(&format!("seal_p:{}:{}", key_list(1, 12), key_list(2, 32)));
        assert_eq!(
            KeyMaterial::parse(&encoded, b""),
            Err(KeyMaterialError::IdentityShape(3))
        );
    }

    #[test]
    fn test_legacy3_detected() {
        let encoded = b64(&format!("{}:pol:{}", key_list(9, 12), key_list(4, 32)));
        let m = KeyMaterial::parse(&encoded, b"whatever").unwrap();
        assert_eq!(
            m,
            KeyMaterial::LegacySymmetric3 {
                iv: [9; 12],
                policy_id: "pol".into(),
                key: [4; 32],
            }
        );
    }

    #[test]
    fn test_legacy2_detected() {
        let encoded = b64(&format!("pol:{}", key_list(5, 32)));
        let m = KeyMaterial::parse(&encoded, &[0u8; 29]).unwrap();
        assert_eq!(
            m,
            KeyMaterial::LegacySymmetric2 {
                policy_id: "pol".into(),
                key: [5; 32],
            }
        );
    }

    #[test]
    fn test_legacy2_needs_prefixed_nonce() {
        let encoded = b64(&format!("pol:{}", key_list(5, 32)));
        assert_eq!(
            KeyMaterial::parse(&encoded, &[0u8; 12]),
            Err(KeyMaterialError::CiphertextTooShort(12))
        );
    }

    #[test]
    fn test_other_shapes_rejected() {
        assert_eq!(
            KeyMaterial::parse(&b64("just-one-part"), b""),
            Err(KeyMaterialError::UnrecognizedShape(1))
        );
        assert_eq!(
            KeyMaterial::parse(&b64("a:b:c:d"), b""),
            Err(KeyMaterialError::UnrecognizedShape(4))
        );
        assert!(matches!(
            KeyMaterial::parse("%%%not-base64", b""),
            Err(KeyMaterialError::Base64(_))
        ));
    }

    #[test]
    fn test_wrong_lengths_rejected() {
        let short_key = b64(&format!("pol:{}", key_list(5, 16)));
        assert!(matches!(
            KeyMaterial::parse(&short_key, &[0u8; 40]),
            Err(KeyMaterialError::Length { field: "key", expected: 32, got: 16 })
        ));

        let bad_iv = b64(&format!("{}:pol:{}", key_list(1, 16), key_list(4, 32)));
        assert!(matches!(
            KeyMaterial::parse(&bad_iv, b""),
            Err(KeyMaterialError::Length { field: "iv", .. })
        ));
    }

    #[test]
    fn test_non_byte_tokens_rejected() {
        let encoded = b64("seal_p:1,256,3");
        assert!(matches!(
            KeyMaterial::parse(&encoded, b""),
            Err(KeyMaterialError::ByteList { field: "key", .. })
        ));
    }

    #[test]
    fn test_encode_matches_on_chain_form() {
        let m = KeyMaterial::IdentityEncrypted {
            policy_id: "ff00".into(),
            raw_key: vec![0, 10, 255],
        };
        assert_eq!(m.encode(), b64("seal_ff00:0,10,255"));
        assert_eq!(KeyMaterial::Public.encode(), "");
    }

    #[test]
    fn test_debug_hides_key() {
        let m = KeyMaterial::LegacySymmetric2 {
            policy_id: "pol".into(),
            key: [200; 32],
        };
        assert!(!format!("{:?}", m).contains("200"));
    }
}
