//! Content records as published on the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Address, ObjectId};

/// Reference to a ciphertext (or plaintext, for public content) in the
/// content-addressed blob store.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blob refs are opaque, but an empty one can never resolve.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.0.chars().take(20).collect();
        write!(f, "BlobRef({})", shown)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of media a content item holds. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    Video,
    Audio,
    File,
}

impl ContentKind {
    /// Map a stored content-type string (`"text"` or a MIME type) to a kind.
    pub fn from_content_type(s: &str) -> Self {
        let s = s.to_ascii_lowercase();
        if s == "text" || s.starts_with("text/") {
            ContentKind::Text
        } else if s == "image" || s.starts_with("image/") {
            ContentKind::Image
        } else if s == "video" || s.starts_with("video/") {
            ContentKind::Video
        } else if s == "audio" || s.starts_with("audio/") {
            ContentKind::Audio
        } else {
            ContentKind::File
        }
    }
}

/// An immutable content record read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Ledger object id of the content.
    pub id: ObjectId,

    /// Where the (possibly encrypted) bytes live.
    pub blob_ref: BlobRef,

    /// Base64 key material; empty for public and pre-migration content.
    pub key_material: String,

    /// Public content is stored in the clear.
    pub is_public: bool,

    /// Tier a subscriber must hold; `None` for public content.
    pub required_tier: Option<ObjectId>,

    /// Address of the publishing creator.
    pub creator: Address,

    pub kind: ContentKind,
}

impl ContentRecord {
    /// Whether the record carries any key material at all.
    pub fn has_key_material(&self) -> bool {
        !self.key_material.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_from_mime() {
        assert_eq!(ContentKind::from_content_type("text"), ContentKind::Text);
        assert_eq!(ContentKind::from_content_type("image/png"), ContentKind::Image);
        assert_eq!(ContentKind::from_content_type("VIDEO/mp4"), ContentKind::Video);
        assert_eq!(
            ContentKind::from_content_type("application/pdf"),
            ContentKind::File
        );
    }

    #[test]
    fn test_blank_key_material_is_missing() {
        let record = ContentRecord {
            id: ObjectId::from_bytes([1; 32]),
            blob_ref: BlobRef::new("blob"),
            key_material: "   ".into(),
            is_public: false,
            required_tier: None,
            creator: Address::from_bytes([2; 32]),
            kind: ContentKind::Text,
        };
        assert!(!record.has_key_material());
    }
}
