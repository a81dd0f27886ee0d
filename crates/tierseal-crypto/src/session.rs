//! Session certificates as presented to key servers.
//!
//! A session is an ephemeral Ed25519 key that the subject's wallet endorses
//! once by signing a personal message naming the key, the package and the
//! lifetime. Key requests are then signed by the session key alone.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use tierseal_core::{Address, Ed25519PublicKey, Ed25519Signature, Keypair};

use crate::error::{CryptoError, Result};

/// The personal message a wallet signs to endorse a session key.
pub fn personal_message(
    scope: &str,
    ttl_minutes: u32,
    issued_at: i64,
    session_public_key: &Ed25519PublicKey,
) -> Result<String> {
    let issued = DateTime::<Utc>::from_timestamp_millis(issued_at)
        .ok_or_else(|| CryptoError::InvalidKey(format!("issue time out of range: {}", issued_at)))?;
    Ok(format!(
        "Accessing keys of package {} for {} mins from {}, session key {}",
        scope,
        ttl_minutes,
        issued.to_rfc3339_opts(SecondsFormat::Millis, true),
        session_public_key.to_hex()
    ))
}

/// Wallet-endorsed session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCertificate {
    pub subject: Address,
    pub wallet_public_key: Ed25519PublicKey,

    /// Package the session may request keys for.
    pub scope: String,

    /// Unix ms.
    pub issued_at: i64,

    /// Lifetime the key servers honor.
    pub ttl_minutes: u32,

    pub session_public_key: Ed25519PublicKey,
    pub personal_message: Vec<u8>,

    /// Wallet signature over `personal_message`.
    pub signature: Ed25519Signature,
}

impl SessionCertificate {
    /// When key servers stop honoring the session.
    pub fn expires_at(&self) -> i64 {
        self.issued_at + i64::from(self.ttl_minutes) * 60_000
    }

    /// Full verification as a key server performs it.
    pub fn verify(&self, now: i64) -> std::result::Result<(), String> {
        if self.wallet_public_key.to_address() != self.subject {
            return Err("wallet key does not match subject".into());
        }
        let expected = personal_message(
            &self.scope,
            self.ttl_minutes,
            self.issued_at,
            &self.session_public_key,
        )
        .map_err(|e| e.to_string())?;
        if expected.as_bytes() != self.personal_message.as_slice() {
            return Err("personal message does not match session parameters".into());
        }
        self.wallet_public_key
            .verify(&self.personal_message, &self.signature)
            .map_err(|_| "invalid wallet signature".to_string())?;
        if now < self.issued_at {
            return Err("session issued in the future".into());
        }
        if now >= self.expires_at() {
            return Err("session expired".into());
        }
        Ok(())
    }
}

/// A live session: the certificate plus the ephemeral signing key.
///
/// Cannot be persisted; only the certificate's parameters can.
#[derive(Debug, Clone)]
pub struct SessionKey {
    certificate: SessionCertificate,
    keypair: Keypair,
}

impl SessionKey {
    /// Pair a certificate with the keypair it names.
    pub fn new(certificate: SessionCertificate, keypair: Keypair) -> Result<Self> {
        if keypair.public_key() != certificate.session_public_key {
            return Err(CryptoError::InvalidKey(
                "session keypair does not match certificate".into(),
            ));
        }
        Ok(Self {
            certificate,
            keypair,
        })
    }

    pub fn certificate(&self) -> &SessionCertificate {
        &self.certificate
    }

    pub fn subject(&self) -> Address {
        self.certificate.subject
    }

    pub fn scope(&self) -> &str {
        &self.certificate.scope
    }

    /// Sign a key-request digest with the session key.
    pub fn sign_request(&self, digest: &[u8; 32]) -> Ed25519Signature {
        self.keypair.sign(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certificate(wallet: &Keypair, session: &Keypair, issued_at: i64) -> SessionCertificate {
        let message = personal_message("0xpkg", 30, issued_at, &session.public_key()).unwrap();
        SessionCertificate {
            subject: wallet.address(),
            wallet_public_key: wallet.public_key(),
            scope: "0xpkg".into(),
            issued_at,
            ttl_minutes: 30,
            session_public_key: session.public_key(),
            signature: wallet.sign(message.as_bytes()),
            personal_message: message.into_bytes(),
        }
    }

    #[test]
    fn test_personal_message_format() {
        let session = Keypair::from_seed(&[1; 32]);
        let message = personal_message("0xpkg", 30, 1_700_000_000_000, &session.public_key()).unwrap();
        assert_eq!(
            message,
            format!(
                "Accessing keys of package 0xpkg for 30 mins from 2023-11-14T22:13:20.000Z, session key {}",
                session.public_key().to_hex()
            )
        );
    }

    #[test]
    fn test_certificate_lifetime() {
        let wallet = Keypair::generate();
        let session = Keypair::generate();
        let cert = certificate(&wallet, &session, 1_000);

        assert!(cert.verify(1_000).is_ok());
        assert!(cert.verify(1_000 + 30 * 60_000 - 1).is_ok());
        assert!(cert.verify(1_000 + 30 * 60_000).is_err());
        assert!(cert.verify(999).is_err());
    }

    #[test]
    fn test_certificate_rejects_foreign_signature() {
        let wallet = Keypair::generate();
        let session = Keypair::generate();
        let mut cert = certificate(&wallet, &session, 0);
        cert.signature = Keypair::generate().sign(&cert.personal_message);
        assert!(cert.verify(1).is_err());
    }

    #[test]
    fn test_session_key_must_match_certificate() {
        let wallet = Keypair::generate();
        let session = Keypair::generate();
        let cert = certificate(&wallet, &session, 0);

        assert!(SessionKey::new(cert.clone(), Keypair::generate()).is_err());
        let key = SessionKey::new(cert, session.clone()).unwrap();
        let sig = key.sign_request(&[7; 32]);
        session.public_key().verify(&[7; 32], &sig).unwrap();
    }
}
