//! Identity-encryption client.
//!
//! Wraps the threshold encrypt-for-identity / fetch-keys-and-decrypt protocol
//! against a fixed set of key servers.
//!
//! ## Encryption
//!
//! A random AES-256-GCM key seals the payload. The key is Shamir-split into
//! one share per weight unit; each share is wrapped for its server. The key
//! itself is returned to the caller and never stored by the client.
//!
//! ## Decryption
//!
//! Every server holding shares is asked concurrently. The first `threshold`
//! shares that unwrap are combined, and the payload only opens if the
//! combined key authenticates. Nothing partial is ever returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};

use tierseal_core::ObjectId;

use crate::envelope::{EncryptedObject, WrappedShare, ENVELOPE_VERSION};
use crate::error::{CryptoError, Result};
use crate::keys::{random_nonce, DemKey, EphemeralKeyPair, WrappingKey};
use crate::keyserver::{KeyRequest, KeyServer, KeyServerError};
use crate::session::SessionKey;
use crate::shamir::{self, Share};

/// One configured key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyServerConfig {
    pub object_id: ObjectId,

    /// Number of shares the server holds.
    pub weight: u8,
}

/// Threshold configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    /// Shares needed to recover a key.
    pub threshold: u8,
    pub services: Vec<KeyServerConfig>,

    /// Upper bound on a whole decrypt or pre-flight.
    pub request_timeout: Duration,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            threshold: 1,
            services: Vec::new(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl SealConfig {
    /// Total share slots.
    pub fn total_weight(&self) -> usize {
        self.services.iter().map(|s| s.weight as usize).sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(CryptoError::Config("threshold must be at least 1".into()));
        }
        if self.services.iter().any(|s| s.weight == 0) {
            return Err(CryptoError::Config("key server weight must be at least 1".into()));
        }
        let total = self.total_weight();
        if total > u8::MAX as usize {
            return Err(CryptoError::Config(format!("total weight {} exceeds 255", total)));
        }
        if self.threshold as usize > total {
            return Err(CryptoError::Config(format!(
                "threshold {} exceeds total weight {}",
                self.threshold, total
            )));
        }
        for (i, service) in self.services.iter().enumerate() {
            if self.services[..i].iter().any(|s| s.object_id == service.object_id) {
                return Err(CryptoError::Config(format!(
                    "key server {} listed twice",
                    service.object_id
                )));
            }
        }
        Ok(())
    }
}

/// Output of [`IdentityEncryptionClient::encrypt_for_identity`].
#[derive(Clone)]
pub struct IdentityCiphertext {
    /// Encoded [`EncryptedObject`], ready for the blob store.
    pub ciphertext: Vec<u8>,

    /// The content key. The caller decides where it lives.
    pub symmetric_key: [u8; 32],

    pub identity: String,
}

/// Client for a fixed set of key servers.
pub struct IdentityEncryptionClient {
    config: SealConfig,
    servers: HashMap<ObjectId, Arc<dyn KeyServer>>,
}

enum Answer {
    Shares(Vec<Share>),
    Rejected(String),
    Failed(String),
}

impl IdentityEncryptionClient {
    /// Every configured service must have a matching server.
    pub fn new(config: SealConfig, servers: Vec<Arc<dyn KeyServer>>) -> Result<Self> {
        config.validate()?;
        let servers: HashMap<ObjectId, Arc<dyn KeyServer>> =
            servers.into_iter().map(|s| (s.service_id(), s)).collect();
        for service in &config.services {
            if !servers.contains_key(&service.object_id) {
                return Err(CryptoError::Config(format!(
                    "no key server for configured service {}",
                    service.object_id
                )));
            }
        }
        Ok(Self { config, servers })
    }

    pub fn config(&self) -> &SealConfig {
        &self.config
    }

    /// Seal `plaintext` for `identity` in `namespace`.
    pub fn encrypt_for_identity(
        &self,
        plaintext: &[u8],
        namespace: &str,
        identity: &str,
    ) -> Result<IdentityCiphertext> {
        let dem = DemKey::generate();
        let nonce = random_nonce();
        let ciphertext = dem.encrypt(
            plaintext,
            &nonce,
            &EncryptedObject::header_aad(namespace, identity),
        )?;

        let total = self.config.total_weight() as u8;
        let shares = shamir::split(dem.as_bytes(), self.config.threshold, total)?;

        let mut slots = shares.iter();
        let mut wrapped = Vec::with_capacity(shares.len());
        for service in &self.config.services {
            let server = self.server(&service.object_id)?;
            for _ in 0..service.weight {
                let share = slots
                    .next()
                    .ok_or_else(|| CryptoError::Config("share count mismatch".into()))?;
                wrapped.push(wrap_share(share, server.as_ref(), namespace, identity)?);
            }
        }

        let object = EncryptedObject {
            version: ENVELOPE_VERSION,
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            threshold: self.config.threshold,
            shares: wrapped,
            nonce,
            ciphertext,
        };

        Ok(IdentityCiphertext {
            ciphertext: object.to_bytes()?,
            symmetric_key: *dem.as_bytes(),
            identity: identity.to_string(),
        })
    }

    /// Recover plaintext by presenting a session and access proof.
    pub async fn decrypt_with_proof(
        &self,
        ciphertext: &[u8],
        namespace: &str,
        identity: &str,
        session: &SessionKey,
        proof: &[u8],
    ) -> Result<Vec<u8>> {
        let object = EncryptedObject::from_bytes(ciphertext)?;
        object.check_identity(namespace, identity)?;
        let needed = object.threshold as usize;

        let mut pending = FuturesUnordered::new();
        for (service_id, slots) in group_by_service(&object.shares) {
            let Some(server) = self.servers.get(&service_id) else {
                tracing::debug!(service = %service_id, "no client for share holder, skipping");
                continue;
            };
            let server = Arc::clone(server);
            let request = KeyRequest::new(
                session,
                namespace,
                identity,
                slots.iter().map(|s| s.ephemeral_public).collect(),
                proof,
            );
            pending.push(async move {
                let answer = match server.derive_keys(&request).await {
                    Ok(response) if response.wrapping_keys.len() == slots.len() => {
                        unwrap_shares(&slots, &response.wrapping_keys)
                    }
                    Ok(_) => Answer::Failed("wrong number of keys".into()),
                    Err(KeyServerError::ProofRejected(reason)) => Answer::Rejected(reason),
                    Err(e) => Answer::Failed(e.to_string()),
                };
                (service_id, answer)
            });
        }
        let asked = pending.len();

        let collect = async {
            let mut shares: Vec<Share> = Vec::new();
            let mut rejections = Vec::new();
            let mut failures = Vec::new();
            while let Some((service_id, answer)) = pending.next().await {
                match answer {
                    Answer::Shares(got) => shares.extend(got),
                    Answer::Rejected(reason) => {
                        tracing::debug!(service = %service_id, %reason, "key server rejected proof");
                        rejections.push(reason);
                    }
                    Answer::Failed(reason) => {
                        tracing::warn!(service = %service_id, %reason, "key server failed");
                        failures.push(reason);
                    }
                }
                if shares.len() >= needed {
                    break;
                }
            }
            (shares, rejections, failures)
        };

        let (shares, rejections, _failures) =
            tokio::time::timeout(self.config.request_timeout, collect)
                .await
                .map_err(|_| CryptoError::Timeout(self.config.request_timeout))?;

        if shares.len() < needed {
            if asked > 0 && rejections.len() == asked {
                return Err(CryptoError::ProofRejected(rejections.join("; ")));
            }
            return Err(CryptoError::InsufficientShares {
                needed,
                got: shares.len(),
            });
        }

        let key = DemKey::from_bytes(shamir::combine(&shares[..needed])?);
        key.decrypt(
            &object.ciphertext,
            &object.nonce,
            &EncryptedObject::header_aad(namespace, identity),
        )
        .map_err(|_| CryptoError::InsufficientShares {
            needed,
            got: shares.len(),
        })
    }

    /// Check that at least `threshold` weight of servers would release keys
    /// for each identity, without downloading anything.
    pub async fn fetch_keys(
        &self,
        namespace: &str,
        identities: &[String],
        session: &SessionKey,
        proof: &[u8],
    ) -> Result<()> {
        let needed = self.config.threshold as usize;
        let check = async {
            for identity in identities {
                let mut pending: FuturesUnordered<_> = self
                    .config
                    .services
                    .iter()
                    .filter_map(|service| {
                        let server = Arc::clone(self.servers.get(&service.object_id)?);
                        let request = KeyRequest::new(session, namespace, identity, Vec::new(), proof);
                        let weight = service.weight as usize;
                        Some(async move { (weight, server.derive_keys(&request).await) })
                    })
                    .collect();
                let asked = pending.len();

                let mut approved = 0usize;
                let mut rejections = Vec::new();
                while let Some((weight, result)) = pending.next().await {
                    match result {
                        Ok(_) => approved += weight,
                        Err(KeyServerError::ProofRejected(reason)) => rejections.push(reason),
                        Err(e) => tracing::warn!(error = %e, "key server failed during pre-flight"),
                    }
                    if approved >= needed {
                        break;
                    }
                }

                if approved < needed {
                    if asked > 0 && rejections.len() == asked {
                        return Err(CryptoError::ProofRejected(rejections.join("; ")));
                    }
                    return Err(CryptoError::InsufficientShares {
                        needed,
                        got: approved,
                    });
                }
            }
            Ok(())
        };

        tokio::time::timeout(self.config.request_timeout, check)
            .await
            .map_err(|_| CryptoError::Timeout(self.config.request_timeout))?
    }

    fn server(&self, id: &ObjectId) -> Result<&Arc<dyn KeyServer>> {
        self.servers
            .get(id)
            .ok_or_else(|| CryptoError::Config(format!("no key server for {}", id)))
    }
}

fn wrap_share(
    share: &Share,
    server: &dyn KeyServer,
    namespace: &str,
    identity: &str,
) -> Result<WrappedShare> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();
    let service_id = server.service_id();
    let key = ephemeral
        .diffie_hellman(&server.public_key())
        .derive_wrapping_key(namespace, identity, &service_id);
    let nonce = random_nonce();
    Ok(WrappedShare {
        service_id,
        ephemeral_public,
        nonce,
        ciphertext: key.encrypt(&share.to_bytes(), &nonce)?,
    })
}

fn group_by_service(shares: &[WrappedShare]) -> Vec<(ObjectId, Vec<WrappedShare>)> {
    let mut groups: Vec<(ObjectId, Vec<WrappedShare>)> = Vec::new();
    for share in shares {
        match groups.iter_mut().find(|(id, _)| *id == share.service_id) {
            Some((_, slots)) => slots.push(share.clone()),
            None => groups.push((share.service_id, vec![share.clone()])),
        }
    }
    groups
}

fn unwrap_shares(slots: &[WrappedShare], keys: &[[u8; 32]]) -> Answer {
    let mut shares = Vec::with_capacity(slots.len());
    for (slot, key) in slots.iter().zip(keys) {
        let opened = WrappingKey::from_bytes(*key)
            .decrypt(&slot.ciphertext, &slot.nonce)
            .and_then(|bytes| Share::from_bytes(&bytes));
        match opened {
            Ok(share) => shares.push(share),
            Err(e) => return Answer::Failed(format!("share did not unwrap: {}", e)),
        }
    }
    Answer::Shares(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let service = |b: u8, weight: u8| KeyServerConfig {
            object_id: ObjectId::from_bytes([b; 32]),
            weight,
        };

        let mut config = SealConfig {
            threshold: 1,
            services: vec![service(1, 1), service(2, 1)],
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(120));

        config.threshold = 0;
        assert!(config.validate().is_err());

        config.threshold = 3;
        assert!(config.validate().is_err());

        config.threshold = 2;
        config.services = vec![service(1, 1), service(1, 1)];
        assert!(config.validate().is_err());

        config.services = vec![service(1, 0), service(2, 2)];
        assert!(config.validate().is_err());

        config.services = vec![service(1, 1), service(2, 2)];
        config.threshold = 3;
        config.validate().unwrap();
    }

    #[test]
    fn test_group_by_service_keeps_slot_order() {
        let share = |b: u8, n: u8| WrappedShare {
            service_id: ObjectId::from_bytes([b; 32]),
            ephemeral_public: crate::keys::X25519PublicKey::from_bytes([n; 32]),
            nonce: [0; 12],
            ciphertext: vec![],
        };
        let groups = group_by_service(&[share(1, 1), share(2, 2), share(1, 3)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[0].1[1].ephemeral_public.as_bytes(), &[3; 32]);
    }
}
