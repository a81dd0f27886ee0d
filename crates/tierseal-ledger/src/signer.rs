//! Wallet signer abstraction.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use tierseal_core::{Address, Ed25519PublicKey, Ed25519Signature, Keypair};

use crate::error::{LedgerError, Result};
use crate::transaction::SignedTransaction;

/// The connected identity's signing capability.
///
/// Each call to a `sign_*` method may prompt the user.
#[async_trait]
pub trait MessageSigner: Send + Sync {
    fn address(&self) -> Address;

    fn public_key(&self) -> Ed25519PublicKey;

    /// Sign an arbitrary personal message.
    async fn sign_personal_message(&self, message: &[u8]) -> Result<Ed25519Signature>;

    /// Sign built transaction bytes.
    async fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<Ed25519Signature>;
}

/// Sign built bytes and package them for submission.
pub async fn sign_built(signer: &dyn MessageSigner, bytes: Vec<u8>) -> Result<SignedTransaction> {
    let signature = signer.sign_transaction(&bytes).await?;
    Ok(SignedTransaction {
        bytes,
        public_key: signer.public_key(),
        signature,
    })
}

/// A signer holding a local keypair.
///
/// Counts personal-message prompts and can be told to decline or to answer
/// slowly, which is what wallet behavior looks like from the engine's side.
pub struct KeypairSigner {
    keypair: Keypair,
    prompts: AtomicUsize,
    decline: AtomicBool,
    delay: Option<Duration>,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            prompts: AtomicUsize::new(0),
            decline: AtomicBool::new(false),
            delay: None,
        }
    }

    pub fn generate() -> Self {
        Self::new(Keypair::generate())
    }

    /// Wait this long before answering each personal-message prompt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Decline every subsequent personal-message prompt.
    pub fn set_declining(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    /// Personal-message prompts shown so far, declined ones included.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

#[async_trait]
impl MessageSigner for KeypairSigner {
    fn address(&self) -> Address {
        self.keypair.address()
    }

    fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    async fn sign_personal_message(&self, message: &[u8]) -> Result<Ed25519Signature> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.decline.load(Ordering::SeqCst) {
            return Err(LedgerError::SignatureRejected("user declined".into()));
        }
        Ok(self.keypair.sign(message))
    }

    async fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<Ed25519Signature> {
        Ok(self.keypair.sign(tx_bytes))
    }
}
