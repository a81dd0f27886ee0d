//! Subscription resolver.
//!
//! Locates a subject's credential for a tier and judges its liveness. All
//! reads, no side effects. Credentials are never deleted when they lapse, so
//! liveness is always `now < expires_at` against the caller's clock.

use std::sync::Arc;

use tierseal_core::{Address, ObjectId};
use tierseal_ledger::package::{profile_created_event, subscription_type};
use tierseal_ledger::{LedgerClient, LedgerObject};

use crate::error::Result;

/// How many `ProfileCreated` events to scan for a creator's profile.
pub const PROFILE_EVENT_SCAN_LIMIT: usize = 50;

/// A subscription credential as read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCredential {
    pub id: ObjectId,
    pub tier_id: ObjectId,
    pub subscriber: Address,

    /// Unix ms.
    pub expires_at: i64,
}

impl SubscriptionCredential {
    /// Decode a credential object. `None` if a field is missing.
    pub fn from_object(object: &LedgerObject) -> Option<Self> {
        Some(Self {
            id: object.id,
            tier_id: object.field_id("tier_id")?,
            subscriber: object.field_address("subscriber")?,
            expires_at: i64::try_from(object.field_u64("expires_at")?).ok()?,
        })
    }

    pub fn is_active(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

/// A subject's standing for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active(SubscriptionCredential),

    /// Holds credentials for the tier, all lapsed. Carries the latest.
    Expired(SubscriptionCredential),

    None,
}

/// Reads subscription state for one package.
pub struct SubscriptionResolver {
    ledger: Arc<dyn LedgerClient>,
    package: String,
}

impl SubscriptionResolver {
    pub fn new(ledger: Arc<dyn LedgerClient>, package: impl Into<String>) -> Self {
        Self {
            ledger,
            package: package.into(),
        }
    }

    /// The first credential the subject holds for `tier`, live or not.
    pub async fn find(&self, subject: &Address, tier: &ObjectId) -> Result<Option<ObjectId>> {
        Ok(self
            .credentials_for(subject, tier)
            .await?
            .first()
            .map(|c| c.id))
    }

    pub async fn credential(&self, id: &ObjectId) -> Result<Option<SubscriptionCredential>> {
        let Some(object) = self.ledger.get_object(id).await? else {
            return Ok(None);
        };
        if object.type_tag != subscription_type(&self.package) {
            return Ok(None);
        }
        Ok(SubscriptionCredential::from_object(&object))
    }

    pub async fn expiry(&self, id: &ObjectId) -> Result<Option<i64>> {
        Ok(self.credential(id).await?.map(|c| c.expires_at))
    }

    /// Unknown credentials are inactive.
    pub async fn is_active(&self, id: &ObjectId, now: i64) -> Result<bool> {
        Ok(self
            .credential(id)
            .await?
            .is_some_and(|c| c.is_active(now)))
    }

    /// Prefer any live credential; otherwise report the latest lapsed one.
    pub async fn status(
        &self,
        subject: &Address,
        tier: &ObjectId,
        now: i64,
    ) -> Result<SubscriptionStatus> {
        let held = self.credentials_for(subject, tier).await?;
        if let Some(live) = held.iter().find(|c| c.is_active(now)) {
            return Ok(SubscriptionStatus::Active(live.clone()));
        }
        Ok(held
            .into_iter()
            .max_by_key(|c| c.expires_at)
            .map(SubscriptionStatus::Expired)
            .unwrap_or(SubscriptionStatus::None))
    }

    /// The profile `creator` registered, from recent `ProfileCreated` events.
    pub async fn find_creator_profile(&self, creator: &Address) -> Result<Option<ObjectId>> {
        let events = self
            .ledger
            .query_events(&profile_created_event(&self.package), PROFILE_EVENT_SCAN_LIMIT)
            .await?;
        Ok(events
            .iter()
            .find(|e| e.field_address("owner").as_ref() == Some(creator))
            .and_then(|e| e.field_id("profile_id")))
    }

    async fn credentials_for(
        &self,
        subject: &Address,
        tier: &ObjectId,
    ) -> Result<Vec<SubscriptionCredential>> {
        let owned = self
            .ledger
            .owned_objects(subject, &subscription_type(&self.package))
            .await?;
        Ok(owned
            .iter()
            .filter_map(SubscriptionCredential::from_object)
            .filter(|c| &c.tier_id == tier)
            .collect())
    }
}
