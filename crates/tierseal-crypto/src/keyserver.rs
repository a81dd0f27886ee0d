//! Key server seam.
//!
//! A key server holds an X25519 secret. Given a signed session and an access
//! proof it checks the proof against the ledger and, if the proof passes,
//! returns the wrapping keys for its shares of the requested identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tierseal_core::{Ed25519Signature, ObjectId};

use crate::keys::X25519PublicKey;
use crate::session::{SessionCertificate, SessionKey};

/// Why a key server refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyServerError {
    /// The access proof did not pass.
    #[error("proof rejected: {0}")]
    ProofRejected(String),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("key server unavailable: {0}")]
    Unavailable(String),
}

/// A request for the wrapping keys of one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub namespace: String,
    pub identity: String,

    /// One per share slot the server holds; empty for a pre-flight check.
    pub ephemeral_keys: Vec<X25519PublicKey>,

    /// Built access-proof transaction bytes.
    pub proof: Vec<u8>,

    pub certificate: SessionCertificate,

    /// Session-key signature over [`KeyRequest::digest`].
    pub request_signature: Ed25519Signature,
}

impl KeyRequest {
    /// Build and sign a request with a live session.
    pub fn new(
        session: &SessionKey,
        namespace: &str,
        identity: &str,
        ephemeral_keys: Vec<X25519PublicKey>,
        proof: &[u8],
    ) -> Self {
        let digest = Self::digest(namespace, identity, &ephemeral_keys, proof);
        Self {
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            ephemeral_keys,
            proof: proof.to_vec(),
            certificate: session.certificate().clone(),
            request_signature: session.sign_request(&digest),
        }
    }

    /// What the session key signs.
    pub fn digest(
        namespace: &str,
        identity: &str,
        ephemeral_keys: &[X25519PublicKey],
        proof: &[u8],
    ) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_derive_key("tierseal-seal-v1 key request");
        for field in [namespace.as_bytes(), identity.as_bytes(), proof] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        for key in ephemeral_keys {
            hasher.update(key.as_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    /// Check the session-key signature.
    pub fn verify_signature(&self) -> bool {
        let digest = Self::digest(&self.namespace, &self.identity, &self.ephemeral_keys, &self.proof);
        self.certificate
            .session_public_key
            .verify(&digest, &self.request_signature)
            .is_ok()
    }
}

/// Wrapping keys in the order of the request's ephemeral keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyResponse {
    pub service_id: ObjectId,
    pub wrapping_keys: Vec<[u8; 32]>,
}

/// A threshold key-issuing service.
#[async_trait]
pub trait KeyServer: Send + Sync {
    /// Ledger object id of the service registration.
    fn service_id(&self) -> ObjectId;

    fn public_key(&self) -> X25519PublicKey;

    /// Evaluate the proof and, if it passes, derive wrapping keys.
    async fn derive_keys(&self, request: &KeyRequest) -> Result<KeyResponse, KeyServerError>;
}

/// An in-process key server that approves by dry-running the proof.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tierseal_core::Clock;
    use tierseal_ledger::package::{
        CREATE_ACCESS_PROOF, CREATE_CREATOR_ACCESS_PROOF, SUBSCRIPTION_MODULE,
    };
    use tierseal_ledger::{BuiltTransaction, LedgerClient, LedgerError};

    use crate::keys::X25519StaticSecret;

    /// Key server backed by a ledger client.
    ///
    /// Approval requires all of: a valid session certificate for this
    /// package, a valid request signature, a proof sent by the session's
    /// subject that only calls the access-proof entry points, a successful
    /// dry run, and a content object whose policy id is the requested
    /// identity.
    pub struct MemoryKeyServer {
        id: ObjectId,
        secret: X25519StaticSecret,
        package: String,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
        offline: AtomicBool,
        delay: Option<Duration>,
        requests: AtomicUsize,
    }

    impl MemoryKeyServer {
        pub fn new(
            package: impl Into<String>,
            ledger: Arc<dyn LedgerClient>,
            clock: Arc<dyn Clock>,
        ) -> Self {
            Self {
                id: ObjectId::random(),
                secret: X25519StaticSecret::generate(),
                package: package.into(),
                ledger,
                clock,
                offline: AtomicBool::new(false),
                delay: None,
                requests: AtomicUsize::new(0),
            }
        }

        /// Wait this long before answering each request.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        async fn evaluate(&self, request: &KeyRequest) -> Result<(), KeyServerError> {
            if request.namespace != self.package || request.certificate.scope != self.package {
                return Err(KeyServerError::InvalidRequest(format!(
                    "namespace {} is not served here",
                    request.namespace
                )));
            }
            request
                .certificate
                .verify(self.clock.now_millis())
                .map_err(KeyServerError::InvalidSession)?;
            if !request.verify_signature() {
                return Err(KeyServerError::InvalidSession("bad request signature".into()));
            }

            let built = BuiltTransaction::from_bytes(&request.proof)
                .map_err(|e| KeyServerError::InvalidRequest(e.to_string()))?;
            if built.data.sender != request.certificate.subject {
                return Err(KeyServerError::ProofRejected(
                    "proof sender is not the session subject".into(),
                ));
            }
            if built.data.calls.is_empty() {
                return Err(KeyServerError::InvalidRequest("empty proof".into()));
            }

            let mut content_ids = Vec::new();
            for call in &built.data.calls {
                let (package, module, function) = call
                    .parts()
                    .map_err(|e| KeyServerError::InvalidRequest(e.to_string()))?;
                let allowed = package == self.package
                    && module == SUBSCRIPTION_MODULE
                    && (function == CREATE_ACCESS_PROOF || function == CREATE_CREATOR_ACCESS_PROOF);
                if !allowed {
                    return Err(KeyServerError::InvalidRequest(format!(
                        "{} is not an access-proof entry point",
                        call.target
                    )));
                }
                let content = call
                    .object_arg(1)
                    .map_err(|e| KeyServerError::InvalidRequest(e.to_string()))?;
                content_ids.push(content);
            }

            match self.ledger.dry_run_transaction(&request.proof).await {
                Ok(()) => {}
                Err(LedgerError::Rpc(e)) => return Err(KeyServerError::Unavailable(e)),
                Err(e) => return Err(KeyServerError::ProofRejected(e.to_string())),
            }

            for content_id in content_ids {
                let content = self
                    .ledger
                    .get_object(&content_id)
                    .await
                    .map_err(|e| KeyServerError::Unavailable(e.to_string()))?
                    .ok_or_else(|| KeyServerError::ProofRejected("content not found".into()))?;
                if content.field_str("policy_id") != Some(request.identity.as_str()) {
                    return Err(KeyServerError::ProofRejected(
                        "identity does not belong to the proven content".into(),
                    ));
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyServer for MemoryKeyServer {
        fn service_id(&self) -> ObjectId {
            self.id
        }

        fn public_key(&self) -> X25519PublicKey {
            self.secret.public_key()
        }

        async fn derive_keys(&self, request: &KeyRequest) -> Result<KeyResponse, KeyServerError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(KeyServerError::Unavailable("offline".into()));
            }

            self.evaluate(request).await?;

            let wrapping_keys = request
                .ephemeral_keys
                .iter()
                .map(|ephemeral| {
                    *self
                        .secret
                        .diffie_hellman(ephemeral)
                        .derive_wrapping_key(&request.namespace, &request.identity, &self.id)
                        .as_bytes()
                })
                .collect();

            tracing::debug!(service = %self.id, identity = %request.identity, "key request approved");
            Ok(KeyResponse {
                service_id: self.id,
                wrapping_keys,
            })
        }
    }
}
