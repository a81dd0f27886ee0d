//! Publishing and reading content records.
//!
//! Gated content is sealed for a fresh policy id derived from its tier. The
//! content key goes on-chain as `seal_<policy id>:<key bytes>` key material
//! next to the blob reference; the identity-encryption client never keeps it.

use std::sync::Arc;

use bytes::Bytes;
use rand::RngCore;

use tierseal_core::{BlobRef, ContentKind, ContentRecord, KeyMaterial, ObjectId};
use tierseal_crypto::IdentityEncryptionClient;
use tierseal_ledger::package::{CONTENT_MODULE, CONTENT_STRUCT, PUBLISH_CONTENT};
use tierseal_ledger::{
    sign_built, BlobStore, CallArg, LedgerClient, LedgerError, LedgerObject, MessageSigner,
    MoveCall, TransactionData,
};

use crate::error::Result;

/// Who may read a published item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Gated { tier: ObjectId },
}

/// A content item to publish under a creator profile.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub profile: ObjectId,
    pub title: String,

    /// `"text"` or a MIME type.
    pub content_type: String,

    pub bytes: Bytes,
    pub visibility: Visibility,
}

/// A fresh policy id for content gated by `tier`.
///
/// Hex of `blake3(tier || nonce)`; unique per item so that a key released
/// for one post opens no other.
pub fn policy_id_for(tier: &ObjectId) -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut hasher = blake3::Hasher::new();
    hasher.update(tier.as_bytes());
    hasher.update(&nonce);
    hex::encode(hasher.finalize().as_bytes())
}

/// Decode a content object into a record. `None` if it is not one.
pub fn record_from_object(object: &LedgerObject) -> Option<ContentRecord> {
    if !object.is_type(CONTENT_MODULE, CONTENT_STRUCT) {
        return None;
    }
    Some(ContentRecord {
        id: object.id,
        blob_ref: BlobRef::new(object.field_str("blob_id")?),
        key_material: object.field_str("key_material").unwrap_or_default().to_string(),
        is_public: object.field_bool("is_public")?,
        required_tier: object.field_id("tier_id"),
        creator: object.field_address("creator")?,
        kind: ContentKind::from_content_type(object.field_str("content_type").unwrap_or("file")),
    })
}

/// Read one content record from the ledger.
pub async fn load_content(ledger: &dyn LedgerClient, id: &ObjectId) -> Result<Option<ContentRecord>> {
    Ok(ledger
        .get_object(id)
        .await?
        .as_ref()
        .and_then(record_from_object))
}

/// Uploads content and records it on the ledger.
pub struct Publisher {
    package: String,
    ledger: Arc<dyn LedgerClient>,
    blobs: Arc<dyn BlobStore>,
    seal: Arc<IdentityEncryptionClient>,
}

impl Publisher {
    pub fn new(
        package: impl Into<String>,
        ledger: Arc<dyn LedgerClient>,
        blobs: Arc<dyn BlobStore>,
        seal: Arc<IdentityEncryptionClient>,
    ) -> Self {
        Self {
            package: package.into(),
            ledger,
            blobs,
            seal,
        }
    }

    /// Upload, submit `publish_content` signed by `signer`, and return the
    /// resulting record.
    pub async fn publish(
        &self,
        signer: &dyn MessageSigner,
        request: PublishRequest,
    ) -> Result<ContentRecord> {
        let (blob_ref, key_material, policy_id, tier) = match request.visibility {
            Visibility::Public => {
                let blob_ref = self.blobs.upload(request.bytes.clone()).await?;
                (blob_ref, String::new(), String::new(), None)
            }
            Visibility::Gated { tier } => {
                let policy_id = policy_id_for(&tier);
                let sealed = self
                    .seal
                    .encrypt_for_identity(&request.bytes, &self.package, &policy_id)?;
                let blob_ref = self.blobs.upload(Bytes::from(sealed.ciphertext)).await?;
                let key_material = KeyMaterial::IdentityEncrypted {
                    policy_id: policy_id.clone(),
                    raw_key: sealed.symmetric_key.to_vec(),
                }
                .encode();
                (blob_ref, key_material, policy_id, Some(tier))
            }
        };
        let is_public = tier.is_none();

        let call = MoveCall::new(
            &self.package,
            CONTENT_MODULE,
            PUBLISH_CONTENT,
            vec![
                CallArg::Object(request.profile),
                CallArg::pure(&request.title)?,
                CallArg::pure(&blob_ref.as_str())?,
                CallArg::pure(&key_material)?,
                CallArg::pure(&policy_id)?,
                CallArg::pure(&is_public)?,
                CallArg::pure(&tier)?,
                CallArg::pure(&request.content_type)?,
            ],
        );
        let bytes = self
            .ledger
            .build_transaction(&TransactionData::new(signer.address()).with_call(call))
            .await?;
        let signed = sign_built(signer, bytes).await?;
        let effects = self.ledger.submit_transaction(&signed).await?;

        let id = effects.created.first().copied().ok_or_else(|| {
            LedgerError::InvalidTransaction("publish created no content object".into())
        })?;
        tracing::info!(
            content = %id,
            blob = %blob_ref,
            public = is_public,
            size = request.bytes.len(),
            "content published"
        );

        Ok(ContentRecord {
            id,
            blob_ref,
            key_material,
            is_public,
            required_tier: tier,
            creator: signer.address(),
            kind: ContentKind::from_content_type(&request.content_type),
        })
    }
}
