//! Access proof builder.
//!
//! An access proof is a built, never-submitted transaction calling one of
//! the package's authorization entry points. Key servers dry-run it; nothing
//! is executed on the ledger.

use std::sync::Arc;

use tierseal_core::{Address, ObjectId};
use tierseal_ledger::package::{CREATE_ACCESS_PROOF, CREATE_CREATOR_ACCESS_PROOF, SUBSCRIPTION_MODULE};
use tierseal_ledger::{CallArg, LedgerClient, LedgerError, MoveCall, TransactionData};

use crate::error::{EngineError, Result};

/// What an access proof claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofClaim {
    Subscriber { credential: ObjectId },
    Creator { profile: ObjectId },
}

/// Serialized proof bytes. Rebuilt per decrypt, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessProof {
    bytes: Vec<u8>,
    claim: ProofClaim,
    content: ObjectId,
}

impl AccessProof {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn claim(&self) -> ProofClaim {
        self.claim
    }

    pub fn content(&self) -> ObjectId {
        self.content
    }
}

/// Builds access proofs for one package.
pub struct AccessProofBuilder {
    ledger: Arc<dyn LedgerClient>,
    package: String,
    clock_object_id: ObjectId,
}

impl AccessProofBuilder {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        package: impl Into<String>,
        clock_object_id: ObjectId,
    ) -> Self {
        Self {
            ledger,
            package: package.into(),
            clock_object_id,
        }
    }

    /// Prove `subject` holds `credential` for the tier gating `content`.
    pub async fn build_subscription_proof(
        &self,
        credential: &ObjectId,
        content: &ObjectId,
        subject: Option<Address>,
    ) -> Result<AccessProof> {
        let call = MoveCall::new(
            &self.package,
            SUBSCRIPTION_MODULE,
            CREATE_ACCESS_PROOF,
            vec![
                CallArg::Object(*credential),
                CallArg::Object(*content),
                CallArg::Object(self.clock_object_id),
            ],
        );
        self.build(
            subject,
            call,
            ProofClaim::Subscriber {
                credential: *credential,
            },
            *content,
        )
        .await
    }

    /// Prove `subject` owns `profile`, the profile that published `content`.
    pub async fn build_creator_proof(
        &self,
        profile: &ObjectId,
        content: &ObjectId,
        subject: Option<Address>,
    ) -> Result<AccessProof> {
        let call = MoveCall::new(
            &self.package,
            SUBSCRIPTION_MODULE,
            CREATE_CREATOR_ACCESS_PROOF,
            vec![CallArg::Object(*profile), CallArg::Object(*content)],
        );
        self.build(subject, call, ProofClaim::Creator { profile: *profile }, *content)
            .await
    }

    async fn build(
        &self,
        subject: Option<Address>,
        call: MoveCall,
        claim: ProofClaim,
        content: ObjectId,
    ) -> Result<AccessProof> {
        let sender = subject.ok_or_else(|| EngineError::NotAuthenticated("no signing context".into()))?;

        for id in call.object_ids() {
            if id == self.clock_object_id {
                continue;
            }
            if self.ledger.get_object(&id).await?.is_none() {
                return Err(LedgerError::StaleObject(id).into());
            }
        }

        let bytes = self
            .ledger
            .build_transaction(&TransactionData::new(sender).with_call(call))
            .await?;
        tracing::debug!(%content, size = bytes.len(), "built access proof");
        Ok(AccessProof {
            bytes,
            claim,
            content,
        })
    }
}
