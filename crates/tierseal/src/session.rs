//! Session key manager.
//!
//! ```text
//! Absent ──create──▶ PendingSignature ──sign──▶ Active(expires_at)
//!    ▲                                              │
//!    └──────────── ttl elapsed | clear() ───────────┘
//! ```
//!
//! A session is one wallet signature that the key servers honor for a fixed
//! window. The live session holds an ephemeral signing key and cannot be
//! persisted; only its issuance metadata is. Restoring from metadata
//! (`PersistedMetadataOnly → Active`) therefore costs exactly one fresh
//! signature and keeps the original expiry.
//!
//! Concurrent requests for the same subject and scope share one in-flight
//! creation, so the wallet is prompted once. Waiters hold a clone of the
//! shared future, never the state lock, across the signature prompt.
//!
//! Every purge bumps a generation counter. Work that started under an older
//! generation (a session creation, a decrypt about to cache its plaintext)
//! must not leave anything behind in the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use tierseal_core::{Address, Clock, Keypair};
use tierseal_crypto::{personal_message, SessionCertificate, SessionKey};
use tierseal_ledger::MessageSigner;
use tierseal_store::{SessionMetadata, SessionStore};

use crate::cache::PlaintextCache;
use crate::config::SessionConfig;
use crate::error::SessionError;

/// A session ready for key requests.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    key: SessionKey,
    expires_at: i64,
}

impl ActiveSession {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// When the client stops using the session (Unix ms).
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// Where a subject/scope pair is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    PendingSignature,
    Active { expires_at: i64 },
}

/// What a [`SessionKeyManager::clear`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: usize,
    pub cached_items: usize,
}

type Flight = Shared<BoxFuture<'static, Result<ActiveSession, SessionError>>>;
type Slot = (Address, String);

#[derive(Default)]
struct State {
    active: HashMap<Slot, ActiveSession>,
    flights: HashMap<Slot, Flight>,
}

/// Creates, restores and reuses session keys.
pub struct SessionKeyManager {
    store: Arc<dyn SessionStore>,
    cache: PlaintextCache,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    state: Mutex<State>,
    generation: Arc<AtomicU64>,
}

impl SessionKeyManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cache: PlaintextCache,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            config,
            state: Mutex::new(State::default()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Purge generation. Changes whenever sessions or the cache are purged.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The live session for the signer's subject and `scope`, creating or
    /// restoring one if needed.
    pub async fn get_or_create(
        &self,
        signer: Arc<dyn MessageSigner>,
        scope: &str,
    ) -> Result<ActiveSession, SessionError> {
        let slot = (signer.address(), scope.to_string());
        let now = self.clock.now_millis();

        let (flight, generation) = {
            let mut state = self.lock();
            if let Some(active) = state.active.get(&slot) {
                if now < active.expires_at {
                    return Ok(active.clone());
                }
                tracing::debug!(subject = %slot.0, scope, "session expired");
                state.active.remove(&slot);
            }
            let flight = match state.flights.get(&slot) {
                Some(flight) => {
                    tracing::debug!(subject = %slot.0, scope, "joining in-flight session creation");
                    flight.clone()
                }
                None => {
                    let flight = establish(
                        signer,
                        scope.to_string(),
                        Arc::clone(&self.store),
                        Arc::clone(&self.clock),
                        self.config.clone(),
                        Arc::clone(&self.generation),
                    )
                    .boxed()
                    .shared();
                    state.flights.insert(slot.clone(), flight.clone());
                    flight
                }
            };
            (flight, self.generation())
        };

        let result = flight.clone().await;

        let mut state = self.lock();
        if state.flights.get(&slot).is_some_and(|f| f.ptr_eq(&flight)) {
            state.flights.remove(&slot);
        }
        if let Ok(session) = &result {
            if self.generation() == generation {
                state.active.insert(slot, session.clone());
            }
        }
        result
    }

    pub fn state(&self, subject: &Address, scope: &str) -> SessionState {
        let slot = (*subject, scope.to_string());
        let state = self.lock();
        if state.flights.contains_key(&slot) {
            return SessionState::PendingSignature;
        }
        match state.active.get(&slot) {
            Some(active) if self.clock.now_millis() < active.expires_at => SessionState::Active {
                expires_at: active.expires_at,
            },
            _ => SessionState::Absent,
        }
    }

    /// Drop every session of `subject`, in memory and persisted, and purge
    /// the plaintext cache with them.
    pub async fn clear(&self, subject: &Address) -> Result<PurgeReport, SessionError> {
        {
            let mut state = self.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            state.active.retain(|(s, _), _| s != subject);
            state.flights.retain(|(s, _), _| s != subject);
        }
        let sessions = self.store.clear_sessions(subject).await?;
        let cached_items = self.cache.purge_all().await?;
        tracing::info!(%subject, sessions, cached_items, "cleared sessions and plaintext cache");
        Ok(PurgeReport {
            sessions,
            cached_items,
        })
    }

    /// Purge the plaintext cache alone. Sessions are kept, but writes already
    /// in flight are fenced off as by [`SessionKeyManager::clear`].
    pub async fn purge_cache(&self) -> Result<usize, SessionError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(self.cache.purge_all().await?)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn establish(
    signer: Arc<dyn MessageSigner>,
    scope: String,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    generation: Arc<AtomicU64>,
) -> Result<ActiveSession, SessionError> {
    let started = generation.load(Ordering::SeqCst);
    let subject = signer.address();
    let now = clock.now_millis();

    let restored = match store.load_session(&subject, &scope).await? {
        Some(meta) if meta.is_usable_for(&subject, &scope, now) => Some(meta),
        Some(_) => {
            store.remove_session(&subject, &scope).await?;
            None
        }
        None => None,
    };

    let (issued_at, ttl_minutes, expires_at) = match &restored {
        Some(meta) => (
            meta.issued_at,
            u32::try_from(meta.nominal_ttl_ms / 60_000).unwrap_or(config.nominal_ttl_minutes),
            meta.expires_at,
        ),
        None => (
            now,
            config.nominal_ttl_minutes,
            now + config.effective_ttl_ms(),
        ),
    };

    let ephemeral = Keypair::generate();
    let message = personal_message(&scope, ttl_minutes, issued_at, &ephemeral.public_key())?;
    let signature = signer.sign_personal_message(message.as_bytes()).await?;
    let wallet_public_key = signer.public_key();
    if wallet_public_key.to_address() != subject
        || wallet_public_key.verify(message.as_bytes(), &signature).is_err()
    {
        return Err(SessionError::SignatureRejected(
            "wallet signature does not verify".into(),
        ));
    }

    let certificate = SessionCertificate {
        subject,
        wallet_public_key,
        scope: scope.clone(),
        issued_at,
        ttl_minutes,
        session_public_key: ephemeral.public_key(),
        personal_message: message.into_bytes(),
        signature,
    };

    let meta = SessionMetadata {
        subject,
        scope: scope.clone(),
        issued_at,
        nominal_ttl_ms: i64::from(ttl_minutes) * 60_000,
        expires_at,
        session_public_key: certificate.session_public_key,
        personal_message: certificate.personal_message.clone(),
        signature: certificate.signature,
    };
    let cleared = || generation.load(Ordering::SeqCst) != started;
    if cleared() {
        tracing::debug!(%subject, %scope, "sessions cleared while signing, not persisting");
    } else if let Err(e) = store.save_session(&meta).await {
        tracing::warn!(%subject, %scope, error = %e, "failed to persist session metadata");
    } else if cleared() {
        // the clear raced the write
        if let Err(e) = store.remove_session(&subject, &scope).await {
            tracing::warn!(%subject, %scope, error = %e, "failed to drop session metadata after clear");
        }
    }

    let key = SessionKey::new(certificate, ephemeral)?;
    tracing::info!(
        %subject,
        %scope,
        expires_at,
        restored = restored.is_some(),
        "session established"
    );
    Ok(ActiveSession { key, expires_at })
}
