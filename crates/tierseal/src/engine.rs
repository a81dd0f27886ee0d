//! The decryption orchestrator.
//!
//! ```text
//! Idle → CacheCheck ─hit──────────────────────────────────────────────▶ Done
//!            └─miss→ Downloading → FormatDetect ─Public────────────────▶ Done
//!                                   ├─IdentityEncrypted→ Authorizing → Decrypting → CachePut → Done
//!                                   └─Legacy→ LegacyAuthorizing ─────▶ Decrypting → CachePut → Done
//! ```
//!
//! Any state may end in `Failed(kind)`. Both terminal states are final for
//! the call; a retry starts again from `Idle` and nothing in between is
//! persisted. Public content skips the cache and every authorization step.
//!
//! Cached plaintext belongs to the subject it was decrypted for. A purge that
//! lands while a read is in flight wins: the read does not cache its result.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use tierseal_core::{Address, BlobRef, Clock, ContentRecord, KeyMaterial, ObjectId};
use tierseal_crypto::{decrypt_legacy, IdentityEncryptionClient, KeyServer};
use tierseal_ledger::{BlobStore, LedgerClient, MessageSigner};
use tierseal_store::{CacheStore, SessionStore};

use crate::cache::PlaintextCache;
use crate::config::{ConfigError, EngineConfig};
use crate::error::{EngineError, FailureKind, Result};
use crate::proof::AccessProofBuilder;
use crate::publish::{load_content, PublishRequest, Publisher};
use crate::resolver::{SubscriptionCredential, SubscriptionResolver, SubscriptionStatus};
use crate::session::{PurgeReport, SessionKeyManager};

/// Orchestrator states, in the order a call passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptState {
    Idle,
    CacheCheck,
    Downloading,
    FormatDetect,
    Authorizing,
    LegacyAuthorizing,
    Decrypting,
    CachePut,
    Done,
    Failed(FailureKind),
}

/// The ciphertext format a network read went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Public,
    IdentityEncrypted,
    LegacySymmetric3,
    LegacySymmetric2,
}

impl ContentFormat {
    fn of(material: &KeyMaterial) -> Self {
        match material {
            KeyMaterial::Public => ContentFormat::Public,
            KeyMaterial::IdentityEncrypted { .. } => ContentFormat::IdentityEncrypted,
            KeyMaterial::LegacySymmetric3 { .. } => ContentFormat::LegacySymmetric3,
            KeyMaterial::LegacySymmetric2 { .. } => ContentFormat::LegacySymmetric2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptSource {
    Cache,
    Network,
}

/// Plaintext returned by a successful resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    pub bytes: Bytes,
    pub source: DecryptSource,

    /// `None` for cache hits.
    pub format: Option<ContentFormat>,
}

/// The states one call passed through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptTrace {
    states: Vec<DecryptState>,
}

impl DecryptTrace {
    pub fn states(&self) -> &[DecryptState] {
        &self.states
    }

    pub fn visited(&self, state: DecryptState) -> bool {
        self.states.contains(&state)
    }

    fn enter(&mut self, content: &ObjectId, state: DecryptState) {
        tracing::debug!(%content, ?state, "decrypt state");
        self.states.push(state);
    }
}

/// Everything the engine talks to.
pub struct Collaborators {
    pub ledger: Arc<dyn LedgerClient>,
    pub blobs: Arc<dyn BlobStore>,

    /// One per configured key service.
    pub key_servers: Vec<Arc<dyn KeyServer>>,

    pub sessions: Arc<dyn SessionStore>,
    pub cache: Arc<dyn CacheStore>,
    pub clock: Arc<dyn Clock>,
}

enum Authorization {
    Subscriber(SubscriptionCredential),
    Creator { profile: ObjectId },
}

/// The single entry point for reading content.
pub struct DecryptionEngine {
    config: EngineConfig,
    ledger: Arc<dyn LedgerClient>,
    blobs: Arc<dyn BlobStore>,
    seal: Arc<IdentityEncryptionClient>,
    resolver: SubscriptionResolver,
    proofs: AccessProofBuilder,
    sessions: SessionKeyManager,
    cache: PlaintextCache,
    clock: Arc<dyn Clock>,
    signer: RwLock<Option<Arc<dyn MessageSigner>>>,
}

impl DecryptionEngine {
    pub fn new(config: EngineConfig, deps: Collaborators) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let seal = Arc::new(IdentityEncryptionClient::new(
            config.seal.clone(),
            deps.key_servers,
        )?);
        let cache = PlaintextCache::new(deps.cache, Arc::clone(&deps.clock));
        let sessions = SessionKeyManager::new(
            deps.sessions,
            cache.clone(),
            Arc::clone(&deps.clock),
            config.session.clone(),
        );
        Ok(Self {
            resolver: SubscriptionResolver::new(Arc::clone(&deps.ledger), &config.package_id),
            proofs: AccessProofBuilder::new(
                Arc::clone(&deps.ledger),
                &config.package_id,
                config.clock_object_id,
            ),
            ledger: deps.ledger,
            blobs: deps.blobs,
            seal,
            sessions,
            cache,
            clock: deps.clock,
            config,
            signer: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionKeyManager {
        &self.sessions
    }

    pub fn cache(&self) -> &PlaintextCache {
        &self.cache
    }

    pub fn resolver(&self) -> &SubscriptionResolver {
        &self.resolver
    }

    /// Address of the connected subject, if any.
    pub fn connected(&self) -> Option<Address> {
        self.current_signer().map(|s| s.address())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subject lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect a subject. A different, previously connected subject is
    /// purged first.
    pub async fn connect(&self, signer: Arc<dyn MessageSigner>) -> Result<()> {
        let subject = signer.address();
        let previous = self
            .signer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(signer);
        if let Some(previous) = previous {
            let previous = previous.address();
            if previous != subject {
                self.sessions.clear(&previous).await?;
            }
        }
        tracing::info!(%subject, "subject connected");
        Ok(())
    }

    /// Disconnect and purge sessions and cache.
    pub async fn disconnect(&self) -> Result<PurgeReport> {
        let previous = self
            .signer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let report = self.purge_for(previous.map(|s| s.address())).await?;
        tracing::info!("subject disconnected");
        Ok(report)
    }

    /// Purge sessions and cached plaintext together. The subject stays
    /// connected and will be prompted again on the next gated read.
    pub async fn purge_session_and_cache(&self) -> Result<PurgeReport> {
        self.purge_for(self.connected()).await
    }

    async fn purge_for(&self, subject: Option<Address>) -> Result<PurgeReport> {
        match subject {
            Some(subject) => Ok(self.sessions.clear(&subject).await?),
            None => {
                let cached_items = self.sessions.purge_cache().await?;
                tracing::info!(cached_items, "purged plaintext cache");
                Ok(PurgeReport {
                    sessions: 0,
                    cached_items,
                })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// Read one content record from the ledger.
    pub async fn load_content(&self, id: &ObjectId) -> Result<Option<ContentRecord>> {
        load_content(self.ledger.as_ref(), id).await
    }

    /// Resolve access to `record` for `caller` and return its plaintext.
    pub async fn resolve_and_decrypt(
        &self,
        record: &ContentRecord,
        caller: Option<&Address>,
    ) -> Result<Decrypted> {
        self.resolve_and_decrypt_traced(record, caller).await.0
    }

    /// [`DecryptionEngine::resolve_and_decrypt`], also returning the states
    /// the call went through.
    pub async fn resolve_and_decrypt_traced(
        &self,
        record: &ContentRecord,
        caller: Option<&Address>,
    ) -> (Result<Decrypted>, DecryptTrace) {
        let mut trace = DecryptTrace::default();
        trace.enter(&record.id, DecryptState::Idle);

        let result = self.run(record, caller, &mut trace).await;
        match &result {
            Ok(decrypted) => {
                trace.enter(&record.id, DecryptState::Done);
                tracing::debug!(
                    content = %record.id,
                    source = ?decrypted.source,
                    size = decrypted.bytes.len(),
                    "content resolved"
                );
            }
            Err(e) => {
                let kind = e.kind();
                trace.enter(&record.id, DecryptState::Failed(kind));
                if kind.is_retriable() {
                    tracing::warn!(content = %record.id, %kind, error = %e, "resolve and decrypt failed");
                } else {
                    tracing::info!(content = %record.id, %kind, error = %e, "resolve and decrypt refused");
                }
            }
        }
        (result, trace)
    }

    async fn run(
        &self,
        record: &ContentRecord,
        caller: Option<&Address>,
        trace: &mut DecryptTrace,
    ) -> Result<Decrypted> {
        let id = record.id;

        if record.is_public {
            trace.enter(&id, DecryptState::Downloading);
            let bytes = self.download(&record.blob_ref).await?;
            trace.enter(&id, DecryptState::FormatDetect);
            return Ok(Decrypted {
                bytes,
                source: DecryptSource::Network,
                format: Some(ContentFormat::Public),
            });
        }

        if !record.has_key_material() {
            return Err(EngineError::MissingKeyMaterial);
        }
        let (subject, signer) = self.authenticated(caller)?;
        let generation = self.sessions.generation();

        trace.enter(&id, DecryptState::CacheCheck);
        match self.cache.get(&subject, &id).await {
            Ok(Some(bytes)) => {
                return Ok(Decrypted {
                    bytes,
                    source: DecryptSource::Cache,
                    format: None,
                })
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(content = %id, error = %e, "cache read failed, treating as miss"),
        }

        trace.enter(&id, DecryptState::Downloading);
        let ciphertext = self.download(&record.blob_ref).await?;

        trace.enter(&id, DecryptState::FormatDetect);
        let material = KeyMaterial::classify(false, &record.key_material, &ciphertext)?;
        let format = ContentFormat::of(&material);
        tracing::debug!(content = %id, format = material.format_name(), "key material detected");

        let (plaintext, expires_at) = match &material {
            KeyMaterial::Public => {
                return Ok(Decrypted {
                    bytes: ciphertext,
                    source: DecryptSource::Network,
                    format: Some(format),
                })
            }
            KeyMaterial::IdentityEncrypted { policy_id, .. } => {
                trace.enter(&id, DecryptState::Authorizing);
                let authorization = self.authorize(record, subject).await?;
                let proof = match &authorization {
                    Authorization::Subscriber(credential) => {
                        self.proofs
                            .build_subscription_proof(&credential.id, &id, Some(subject))
                            .await?
                    }
                    Authorization::Creator { profile } => {
                        self.proofs
                            .build_creator_proof(profile, &id, Some(subject))
                            .await?
                    }
                };
                let session = self
                    .sessions
                    .get_or_create(signer, &self.config.package_id)
                    .await?;

                trace.enter(&id, DecryptState::Decrypting);
                let plaintext = self
                    .seal
                    .decrypt_with_proof(
                        &ciphertext,
                        &self.config.package_id,
                        policy_id,
                        session.key(),
                        proof.as_bytes(),
                    )
                    .await?;
                let expires_at = match authorization {
                    Authorization::Subscriber(credential) => credential.expires_at,
                    Authorization::Creator { .. } => session.expires_at(),
                };
                (plaintext, expires_at)
            }
            legacy => {
                trace.enter(&id, DecryptState::LegacyAuthorizing);
                let authorization = self.authorize(record, subject).await?;

                trace.enter(&id, DecryptState::Decrypting);
                let plaintext = decrypt_legacy(legacy, &ciphertext)?;
                let expires_at = match authorization {
                    Authorization::Subscriber(credential) => credential.expires_at,
                    Authorization::Creator { .. } => {
                        self.clock.now_millis() + self.config.session.effective_ttl_ms()
                    }
                };
                (plaintext, expires_at)
            }
        };

        trace.enter(&id, DecryptState::CachePut);
        let bytes = Bytes::from(plaintext);
        if self.config.cache_writes_enabled {
            self.cache_put(subject, record, bytes.clone(), expires_at, generation)
                .await;
        }

        Ok(Decrypted {
            bytes,
            source: DecryptSource::Network,
            format: Some(format),
        })
    }

    /// Cache plaintext for `subject` unless a purge has run since `generation`.
    async fn cache_put(
        &self,
        subject: Address,
        record: &ContentRecord,
        bytes: Bytes,
        expires_at: i64,
        generation: u64,
    ) {
        let id = record.id;
        if self.sessions.generation() != generation {
            tracing::debug!(content = %id, "purged during read, not caching plaintext");
            return;
        }
        if let Err(e) = self
            .cache
            .put(subject, id, bytes, record.required_tier, expires_at)
            .await
        {
            tracing::warn!(content = %id, error = %e, "failed to cache plaintext");
            return;
        }
        if self.sessions.generation() != generation {
            // the purge raced the write
            if let Err(e) = self.cache.remove(&subject, &id).await {
                tracing::warn!(content = %id, error = %e, "failed to drop plaintext cached across a purge");
            }
        }
    }

    /// The caller must be the connected subject.
    fn authenticated(&self, caller: Option<&Address>) -> Result<(Address, Arc<dyn MessageSigner>)> {
        let signer = self
            .current_signer()
            .ok_or_else(|| EngineError::NotAuthenticated("no connected subject".into()))?;
        match caller {
            Some(caller) if *caller == signer.address() => Ok((*caller, signer)),
            Some(_) => Err(EngineError::NotAuthenticated(
                "caller is not the connected subject".into(),
            )),
            None => Err(EngineError::NotAuthenticated("no caller identity".into())),
        }
    }

    /// The creator reads through their profile; everyone else needs a live
    /// credential for the gating tier.
    async fn authorize(&self, record: &ContentRecord, subject: Address) -> Result<Authorization> {
        if subject == record.creator {
            let profile = self
                .resolver
                .find_creator_profile(&subject)
                .await?
                .ok_or(EngineError::NoActiveSubscription {
                    tier: record.required_tier,
                })?;
            tracing::debug!(content = %record.id, %profile, "authorizing as creator");
            return Ok(Authorization::Creator { profile });
        }

        let tier = record
            .required_tier
            .ok_or(EngineError::NoActiveSubscription { tier: None })?;
        match self
            .resolver
            .status(&subject, &tier, self.clock.now_millis())
            .await?
        {
            SubscriptionStatus::Active(credential) => {
                tracing::debug!(content = %record.id, credential = %credential.id, "authorizing as subscriber");
                Ok(Authorization::Subscriber(credential))
            }
            SubscriptionStatus::Expired(credential) => Err(EngineError::SubscriptionExpired {
                credential: credential.id,
                expires_at: credential.expires_at,
            }),
            SubscriptionStatus::None => Err(EngineError::NoActiveSubscription { tier: Some(tier) }),
        }
    }

    async fn download(&self, blob_ref: &BlobRef) -> Result<Bytes> {
        let timeout = self.config.download_timeout;
        Ok(tokio::time::timeout(timeout, self.blobs.download(blob_ref))
            .await
            .map_err(|_| EngineError::Timeout(timeout))??)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────────────────

    /// A publisher sharing this engine's ledger, blob store and key servers.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            &self.config.package_id,
            Arc::clone(&self.ledger),
            Arc::clone(&self.blobs),
            Arc::clone(&self.seal),
        )
    }

    /// Publish as the connected subject.
    pub async fn publish(&self, request: PublishRequest) -> Result<ContentRecord> {
        let signer = self
            .current_signer()
            .ok_or_else(|| EngineError::NotAuthenticated("no connected subject".into()))?;
        self.publisher().publish(signer.as_ref(), request).await
    }

    fn current_signer(&self) -> Option<Arc<dyn MessageSigner>> {
        self.signer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
