//! Error types for the decryption engine.
//!
//! Every failure the engine surfaces maps onto one [`FailureKind`]. The kind
//! drives logging and retry; [`EngineError::user_message`] is what a person
//! sees.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use tierseal_core::{KeyMaterialError, ObjectId};
use tierseal_crypto::CryptoError;
use tierseal_ledger::{BlobError, LedgerError};
use tierseal_store::StoreError;

/// The failure taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Key material or ciphertext could not be parsed.
    FormatError,

    /// Content published before key material was stored. Re-publish.
    MissingKeyMaterial,

    /// No credential for the gating tier. Subscribe.
    NoActiveSubscription,

    /// A credential exists but has lapsed. Renew.
    SubscriptionExpired,

    /// The key servers refused the access proof, or it referenced an object
    /// the ledger no longer has.
    ProofRejected,

    InsufficientShares,
    Timeout,

    /// Ledger, blob store or local store failure.
    RetrievalError,

    /// No connected subject, or the subject declined to sign.
    NotAuthenticated,

    /// Symmetric decryption failed authentication.
    DecryptionFailed,
}

impl FailureKind {
    /// Whether retrying the same call may succeed.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            FailureKind::InsufficientShares | FailureKind::Timeout | FailureKind::RetrievalError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::FormatError => "format_error",
            FailureKind::MissingKeyMaterial => "missing_key_material",
            FailureKind::NoActiveSubscription => "no_active_subscription",
            FailureKind::SubscriptionExpired => "subscription_expired",
            FailureKind::ProofRejected => "proof_rejected",
            FailureKind::InsufficientShares => "insufficient_shares",
            FailureKind::Timeout => "timeout",
            FailureKind::RetrievalError => "retrieval_error",
            FailureKind::NotAuthenticated => "not_authenticated",
            FailureKind::DecryptionFailed => "decryption_failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session establishment failures.
///
/// Cloneable so that every caller waiting on one shared session creation
/// receives the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The wallet declined, or returned a signature that does not verify.
    #[error("session signature rejected: {0}")]
    SignatureRejected(String),

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("session store error: {0}")]
    Store(String),

    #[error("session key error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<LedgerError> for SessionError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::SignatureRejected(reason) => SessionError::SignatureRejected(reason),
            other => SessionError::Ledger(other),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e.to_string())
    }
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unrecognized key material: {0}")]
    Format(KeyMaterialError),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("content has no key material")]
    MissingKeyMaterial,

    #[error("no active subscription{}", tier_suffix(.tier))]
    NoActiveSubscription { tier: Option<ObjectId> },

    #[error("subscription {credential} expired at {}", expiry_moment(.expires_at))]
    SubscriptionExpired {
        credential: ObjectId,
        expires_at: i64,
    },

    #[error("access proof rejected: {0}")]
    ProofRejected(String),

    #[error("insufficient key shares: needed {needed}, got {got}")]
    InsufficientShares { needed: usize, got: usize },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

impl From<KeyMaterialError> for EngineError {
    fn from(e: KeyMaterialError) -> Self {
        match e {
            KeyMaterialError::Missing => EngineError::MissingKeyMaterial,
            other => EngineError::Format(other),
        }
    }
}

impl From<CryptoError> for EngineError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::ProofRejected(reason) => EngineError::ProofRejected(reason),
            CryptoError::InsufficientShares { needed, got } => {
                EngineError::InsufficientShares { needed, got }
            }
            CryptoError::Timeout(after) => EngineError::Timeout(after),
            CryptoError::KeyMaterial(e) => e.into(),
            CryptoError::MalformedObject(reason) | CryptoError::Serialization(reason) => {
                EngineError::MalformedCiphertext(reason)
            }
            e @ CryptoError::IdentityMismatch { .. } => {
                EngineError::MalformedCiphertext(e.to_string())
            }
            other => EngineError::DecryptionFailed(other.to_string()),
        }
    }
}

impl EngineError {
    /// The taxonomy entry for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Format(_) | EngineError::MalformedCiphertext(_) => FailureKind::FormatError,
            EngineError::MissingKeyMaterial => FailureKind::MissingKeyMaterial,
            EngineError::NoActiveSubscription { .. } => FailureKind::NoActiveSubscription,
            EngineError::SubscriptionExpired { .. } => FailureKind::SubscriptionExpired,
            EngineError::ProofRejected(_) => FailureKind::ProofRejected,
            EngineError::InsufficientShares { .. } => FailureKind::InsufficientShares,
            EngineError::Timeout(_) => FailureKind::Timeout,
            EngineError::Ledger(LedgerError::SignatureRejected(_)) => FailureKind::NotAuthenticated,
            EngineError::Ledger(LedgerError::StaleObject(_)) => FailureKind::ProofRejected,
            EngineError::Ledger(_) | EngineError::Blob(_) | EngineError::Store(_) => {
                FailureKind::RetrievalError
            }
            EngineError::Session(SessionError::SignatureRejected(_)) => {
                FailureKind::NotAuthenticated
            }
            EngineError::Session(SessionError::Crypto(_)) => FailureKind::DecryptionFailed,
            EngineError::Session(_) => FailureKind::RetrievalError,
            EngineError::NotAuthenticated(_) => FailureKind::NotAuthenticated,
            EngineError::DecryptionFailed(_) => FailureKind::DecryptionFailed,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// The reason shown to a person.
    ///
    /// A rejected proof reads the same as a missing subscription; only
    /// [`EngineError::kind`] and the logs tell them apart.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Format(_) | EngineError::MalformedCiphertext(_) => {
                "This content is stored in a format that cannot be read.".into()
            }
            EngineError::MissingKeyMaterial => {
                "This content was published without its decryption key and must be re-published by the creator."
                    .into()
            }
            EngineError::NoActiveSubscription { .. } | EngineError::ProofRejected(_) => {
                "You need an active subscription to this tier to view this content.".into()
            }
            EngineError::SubscriptionExpired { expires_at, .. } => format!(
                "Your subscription expired on {}. Renew it to view this content.",
                render_millis(*expires_at)
            ),
            EngineError::InsufficientShares { .. } | EngineError::Timeout(_) => {
                "The key service did not respond in time. Please try again.".into()
            }
            EngineError::NotAuthenticated(_) => {
                "Connect and approve the signature request to view this content.".into()
            }
            EngineError::DecryptionFailed(_) => {
                "The content could not be decrypted with its stored key.".into()
            }
            other => match other.kind() {
                FailureKind::ProofRejected => {
                    "You need an active subscription to this tier to view this content.".into()
                }
                FailureKind::NotAuthenticated => {
                    "Connect and approve the signature request to view this content.".into()
                }
                FailureKind::DecryptionFailed => {
                    "The content could not be decrypted with its stored key.".into()
                }
                _ => "The content could not be retrieved. Please try again.".into(),
            },
        }
    }
}

fn tier_suffix(tier: &Option<ObjectId>) -> String {
    match tier {
        Some(tier) => format!(" for tier {}", tier),
        None => String::new(),
    }
}

fn expiry_moment(millis: &i64) -> String {
    render_millis(*millis)
}

/// Unix ms as an RFC 3339 UTC moment.
pub(crate) fn render_millis(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(moment) => moment.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => format!("{} ms", millis),
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
