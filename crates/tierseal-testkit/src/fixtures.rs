//! Test fixtures and helpers.
//!
//! [`TestWorld`] wires an in-memory ledger, blob store and key servers to
//! one manual clock, with a creator who already owns a profile.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use tierseal_core::{Address, BlobRef, ContentKind, ContentRecord, ManualClock, ObjectId};
use tierseal_crypto::{
    encrypt_legacy2, encrypt_legacy3, IdentityEncryptionClient, KeyServer, KeyServerConfig,
    MemoryKeyServer, SealConfig,
};
use tierseal_ledger::memory::{MemoryBlobStore, MemoryLedger};
use tierseal_ledger::package::{qualified, CONTENT_MODULE, CONTENT_STRUCT};
use tierseal_ledger::{BlobStore, KeypairSigner, LedgerClient, LedgerObject, MessageSigner};
use tierseal_store::MemoryStore;

/// Package every fixture object belongs to.
pub const PACKAGE: &str = "0x7e57";

/// Fixture start time, epoch milliseconds.
pub const START_MILLIS: i64 = 1_700_000_000_000;

pub const MINUTE_MILLIS: i64 = 60 * 1000;
pub const DAY_MILLIS: i64 = 24 * 60 * MINUTE_MILLIS;

/// An in-memory deployment: ledger, blob store, key servers and a creator.
pub struct TestWorld {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub blobs: MemoryBlobStore,
    pub key_servers: Vec<Arc<MemoryKeyServer>>,

    /// Threshold fixture content is sealed with.
    pub threshold: u8,

    /// Owner of [`TestWorld::profile`].
    pub creator: Arc<KeypairSigner>,
    pub profile: ObjectId,
}

impl TestWorld {
    /// Three key servers, each of weight one, and a threshold of two.
    pub fn new() -> Self {
        Self::with_key_servers(3)
    }

    pub fn with_key_servers(count: usize) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let ledger = Arc::new(MemoryLedger::new(PACKAGE, clock.clone()));
        let key_servers = (0..count)
            .map(|_| Arc::new(MemoryKeyServer::new(PACKAGE, ledger.clone(), clock.clone())))
            .collect();
        let creator = Arc::new(KeypairSigner::generate());
        let profile = ledger.create_profile(creator.address());

        Self {
            clock,
            ledger,
            blobs: MemoryBlobStore::new("primary"),
            key_servers,
            threshold: count.clamp(1, 2) as u8,
            creator,
            profile,
        }
    }

    /// Threshold configuration over every key server.
    pub fn seal_config(&self, threshold: u8) -> SealConfig {
        SealConfig {
            threshold,
            services: self
                .key_servers
                .iter()
                .map(|s| KeyServerConfig {
                    object_id: s.service_id(),
                    weight: 1,
                })
                .collect(),
            ..SealConfig::default()
        }
    }

    pub fn key_server_handles(&self) -> Vec<Arc<dyn KeyServer>> {
        self.key_servers
            .iter()
            .map(|s| s.clone() as Arc<dyn KeyServer>)
            .collect()
    }

    pub fn ledger_client(&self) -> Arc<dyn LedgerClient> {
        self.ledger.clone()
    }

    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        Arc::new(self.blobs.clone())
    }

    /// A fresh in-memory store for sessions and cached plaintext.
    pub fn memory_store(&self) -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    /// An identity-encryption client over every key server.
    pub fn seal_client(&self, threshold: u8) -> IdentityEncryptionClient {
        IdentityEncryptionClient::new(self.seal_config(threshold), self.key_server_handles())
            .expect("fixture seal config is valid")
    }

    pub fn now(&self) -> i64 {
        use tierseal_core::Clock;
        self.clock.now_millis()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tiers and subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// A new tier under the creator's profile.
    pub fn create_tier(&self) -> ObjectId {
        self.ledger.create_tier(self.profile)
    }

    /// A reader with no subscriptions.
    pub fn fan(&self) -> Arc<KeypairSigner> {
        Arc::new(KeypairSigner::generate())
    }

    /// Mint a credential for `tier` that expires `duration_ms` from now.
    pub fn subscribe(&self, subscriber: &Address, tier: &ObjectId, duration_ms: i64) -> ObjectId {
        self.ledger
            .mint_subscription(*subscriber, *tier, self.now() + duration_ms)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Content
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a content object on the ledger as publishing would.
    pub fn insert_content(
        &self,
        blob_ref: BlobRef,
        key_material: String,
        policy_id: &str,
        tier: Option<ObjectId>,
    ) -> ContentRecord {
        let id = ObjectId::random();
        let creator = self.creator.address();
        let is_public = tier.is_none();
        self.ledger.insert_object(LedgerObject {
            id,
            owner: None,
            type_tag: qualified(PACKAGE, CONTENT_MODULE, CONTENT_STRUCT),
            version: 1,
            fields: json!({
                "profile_id": self.profile.to_hex(),
                "creator": creator.to_hex(),
                "title": "fixture",
                "blob_id": blob_ref.as_str(),
                "key_material": key_material,
                "policy_id": policy_id,
                "is_public": is_public,
                "tier_id": tier.map(|t| t.to_hex()),
                "content_type": "text",
                "created_at": self.now().to_string(),
            }),
        });

        ContentRecord {
            id,
            blob_ref,
            key_material,
            is_public,
            required_tier: tier,
            creator,
            kind: ContentKind::Text,
        }
    }

    /// Public content stored in the clear.
    pub fn insert_public(&self, plaintext: &[u8]) -> ContentRecord {
        let blob_ref = self.blobs.insert(Bytes::copy_from_slice(plaintext));
        self.insert_content(blob_ref, String::new(), "", None)
    }

    /// Content sealed for a fresh identity under `tier`.
    pub fn insert_sealed(&self, tier: &ObjectId, plaintext: &[u8]) -> ContentRecord {
        let policy_id = ObjectId::random().to_hex();
        let sealed = self
            .seal_client(self.threshold)
            .encrypt_for_identity(plaintext, PACKAGE, &policy_id)
            .expect("fixture encryption");
        let blob_ref = self.blobs.insert(Bytes::from(sealed.ciphertext));
        let material = tierseal_core::KeyMaterial::IdentityEncrypted {
            policy_id: policy_id.clone(),
            raw_key: sealed.symmetric_key.to_vec(),
        };
        self.insert_content(blob_ref, material.encode(), &policy_id, Some(*tier))
    }

    /// Content sealed with 3-part legacy key material.
    pub fn insert_legacy3(&self, tier: &ObjectId, plaintext: &[u8]) -> ContentRecord {
        let policy_id = ObjectId::random().to_hex();
        let (material, blob) = encrypt_legacy3(plaintext, &policy_id).expect("fixture encryption");
        let blob_ref = self.blobs.insert(Bytes::from(blob));
        self.insert_content(blob_ref, material.encode(), &policy_id, Some(*tier))
    }

    /// Content sealed with 2-part legacy key material.
    pub fn insert_legacy2(&self, tier: &ObjectId, plaintext: &[u8]) -> ContentRecord {
        let policy_id = ObjectId::random().to_hex();
        let (material, blob) = encrypt_legacy2(plaintext, &policy_id).expect("fixture encryption");
        let blob_ref = self.blobs.insert(Bytes::from(blob));
        self.insert_content(blob_ref, material.encode(), &policy_id, Some(*tier))
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` unsubscribed readers.
pub fn fans(count: usize) -> Vec<Arc<KeypairSigner>> {
    (0..count).map(|_| Arc::new(KeypairSigner::generate())).collect()
}
