//! In-memory ledger and blob store.
//!
//! [`MemoryLedger`] keeps objects and events in process and evaluates the
//! platform's access-proof and publish calls itself, with the same abort
//! conditions the on-chain package enforces. [`MemoryBlobStore`] is a single
//! content-addressed endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use tierseal_core::{Address, BlobRef, Clock, ObjectId};

use crate::blob::{blob_id_for, BlobEndpoint, BlobStore, DEFAULT_STORAGE_EPOCHS};
use crate::error::{BlobError, BlobResult, LedgerError, Result};
use crate::ledger::{LedgerClient, LedgerEvent, LedgerObject, TransactionEffects};
use crate::package::*;
use crate::transaction::{BuiltTransaction, MoveCall, SignedTransaction, TransactionData};

/// Gas budget the memory ledger stamps onto built transactions.
pub const MEMORY_GAS_BUDGET: u64 = 10_000_000;

#[derive(Default, Clone)]
struct LedgerState {
    objects: HashMap<ObjectId, LedgerObject>,
    /// Oldest first.
    events: Vec<LedgerEvent>,
}

/// In-memory ledger for one package.
pub struct MemoryLedger {
    package: String,
    clock: Arc<dyn Clock>,
    state: RwLock<LedgerState>,
    offline: AtomicBool,
    dry_runs: AtomicUsize,
    submissions: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(package: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            package: package.into(),
            clock,
            state: RwLock::new(LedgerState::default()),
            offline: AtomicBool::new(false),
            dry_runs: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// While offline every call fails with [`LedgerError::Rpc`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn dry_run_count(&self) -> usize {
        self.dry_runs.load(Ordering::SeqCst)
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn insert_object(&self, object: LedgerObject) {
        self.write_state().objects.insert(object.id, object);
    }

    pub fn remove_object(&self, id: &ObjectId) -> Option<LedgerObject> {
        self.write_state().objects.remove(id)
    }

    /// Create a creator profile owned by `owner` and emit `ProfileCreated`.
    pub fn create_profile(&self, owner: Address) -> ObjectId {
        let id = ObjectId::random();
        let now = self.clock.now_millis();
        let mut state = self.write_state();
        state.objects.insert(
            id,
            LedgerObject {
                id,
                owner: Some(owner),
                type_tag: qualified(&self.package, CREATOR_PROFILE_MODULE, CREATOR_PROFILE_STRUCT),
                version: 1,
                fields: json!({ "owner": owner.to_hex() }),
            },
        );
        state.events.push(LedgerEvent {
            event_type: profile_created_event(&self.package),
            sender: owner,
            timestamp_ms: now,
            parsed: json!({ "profile_id": id.to_hex(), "owner": owner.to_hex() }),
        });
        id
    }

    /// Create a subscription tier under a profile.
    pub fn create_tier(&self, profile: ObjectId) -> ObjectId {
        let id = ObjectId::random();
        self.insert_object(LedgerObject {
            id,
            owner: None,
            type_tag: qualified(&self.package, CREATOR_PROFILE_MODULE, TIER_STRUCT),
            version: 1,
            fields: json!({ "profile_id": profile.to_hex() }),
        });
        id
    }

    /// Mint a subscription credential, as a purchase would.
    pub fn mint_subscription(&self, subscriber: Address, tier: ObjectId, expires_at: i64) -> ObjectId {
        let id = ObjectId::random();
        self.insert_object(LedgerObject {
            id,
            owner: Some(subscriber),
            type_tag: subscription_type(&self.package),
            version: 1,
            fields: json!({
                "tier_id": tier.to_hex(),
                "subscriber": subscriber.to_hex(),
                "expires_at": expires_at.to_string(),
            }),
        });
        id
    }

    /// Overwrite a credential's expiry. Returns false if it does not exist.
    pub fn set_subscription_expiry(&self, id: &ObjectId, expires_at: i64) -> bool {
        let mut state = self.write_state();
        match state.objects.get_mut(id) {
            Some(obj) => match obj.fields.as_object_mut() {
                Some(fields) => {
                    fields.insert("expires_at".into(), Value::String(expires_at.to_string()));
                    obj.version += 1;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("memory ledger is offline".into()));
        }
        Ok(())
    }

    fn execute(
        &self,
        state: &mut LedgerState,
        data: &TransactionData,
        now: i64,
        effects: &mut TransactionEffects,
    ) -> Result<()> {
        for call in &data.calls {
            let (package, module, function) = call.parts()?;
            if package != self.package {
                return Err(abort(call, "EPackageNotFound"));
            }
            match (module, function) {
                (SUBSCRIPTION_MODULE, CREATE_ACCESS_PROOF) => {
                    check_subscription_access(state, data.sender, call, now)?
                }
                (SUBSCRIPTION_MODULE, CREATE_CREATOR_ACCESS_PROOF) => {
                    check_creator_access(state, data.sender, call)?
                }
                (CONTENT_MODULE, PUBLISH_CONTENT) => {
                    self.publish_content(state, data.sender, call, now, effects)?
                }
                _ => return Err(abort(call, "EFunctionNotFound")),
            }
        }
        Ok(())
    }

    fn publish_content(
        &self,
        state: &mut LedgerState,
        sender: Address,
        call: &MoveCall,
        now: i64,
        effects: &mut TransactionEffects,
    ) -> Result<()> {
        let profile_id = call.object_arg(0)?;
        let title: String = call.pure_arg(1)?;
        let blob_id: String = call.pure_arg(2)?;
        let key_material: String = call.pure_arg(3)?;
        let policy_id: String = call.pure_arg(4)?;
        let is_public: bool = call.pure_arg(5)?;
        let tier: Option<ObjectId> = call.pure_arg(6)?;
        let content_type: String = call.pure_arg(7)?;

        let profile = input(state, &profile_id)?;
        if profile.owner != Some(sender) {
            return Err(abort(call, "ENotCreator"));
        }
        match tier {
            Some(tier_id) => {
                let tier_obj = input(state, &tier_id)?;
                if tier_obj.field_id("profile_id") != Some(profile_id) {
                    return Err(abort(call, "EWrongTier"));
                }
            }
            None if !is_public => return Err(abort(call, "EMissingTier")),
            None => {}
        }

        let id = ObjectId::random();
        state.objects.insert(
            id,
            LedgerObject {
                id,
                owner: None,
                type_tag: qualified(&self.package, CONTENT_MODULE, CONTENT_STRUCT),
                version: 1,
                fields: json!({
                    "profile_id": profile_id.to_hex(),
                    "creator": sender.to_hex(),
                    "title": title,
                    "blob_id": blob_id,
                    "key_material": key_material,
                    "policy_id": policy_id,
                    "is_public": is_public,
                    "tier_id": tier.map(|t| t.to_hex()),
                    "content_type": content_type,
                    "created_at": now.to_string(),
                }),
            },
        );
        let event = LedgerEvent {
            event_type: qualified(&self.package, CONTENT_MODULE, CONTENT_PUBLISHED_EVENT),
            sender,
            timestamp_ms: now,
            parsed: json!({ "content_id": id.to_hex(), "profile_id": profile_id.to_hex() }),
        };
        state.events.push(event.clone());
        effects.created.push(id);
        effects.events.push(event);
        Ok(())
    }
}

fn abort(call: &MoveCall, reason: &str) -> LedgerError {
    LedgerError::Aborted {
        function: call.target.clone(),
        reason: reason.to_string(),
    }
}

fn input<'a>(state: &'a LedgerState, id: &ObjectId) -> Result<&'a LedgerObject> {
    state.objects.get(id).ok_or(LedgerError::StaleObject(*id))
}

fn check_subscription_access(
    state: &LedgerState,
    sender: Address,
    call: &MoveCall,
    now: i64,
) -> Result<()> {
    let credential = input(state, &call.object_arg(0)?)?;
    let content = input(state, &call.object_arg(1)?)?;
    if call.object_arg(2)? != ObjectId::CLOCK {
        return Err(abort(call, "EInvalidClock"));
    }

    if !credential.is_type(SUBSCRIPTION_MODULE, SUBSCRIPTION_STRUCT) {
        return Err(abort(call, "EWrongType"));
    }
    if credential.owner != Some(sender) {
        return Err(abort(call, "ENotOwner"));
    }
    let expires_at = credential
        .field_u64("expires_at")
        .ok_or_else(|| abort(call, "EMalformedSubscription"))?;
    if now >= expires_at as i64 {
        return Err(abort(call, "ESubscriptionExpired"));
    }
    match (credential.field_id("tier_id"), content.field_id("tier_id")) {
        (Some(held), Some(required)) if held == required => Ok(()),
        _ => Err(abort(call, "EWrongTier")),
    }
}

fn check_creator_access(state: &LedgerState, sender: Address, call: &MoveCall) -> Result<()> {
    let profile_id = call.object_arg(0)?;
    let profile = input(state, &profile_id)?;
    let content = input(state, &call.object_arg(1)?)?;

    if !profile.is_type(CREATOR_PROFILE_MODULE, CREATOR_PROFILE_STRUCT) || profile.owner != Some(sender) {
        return Err(abort(call, "ENotCreator"));
    }
    if content.field_id("profile_id") != Some(profile_id) {
        return Err(abort(call, "ENotCreator"));
    }
    Ok(())
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn get_object(&self, id: &ObjectId) -> Result<Option<LedgerObject>> {
        self.check_online()?;
        Ok(self.read_state().objects.get(id).cloned())
    }

    async fn owned_objects(&self, owner: &Address, type_tag: &str) -> Result<Vec<LedgerObject>> {
        self.check_online()?;
        let state = self.read_state();
        let mut owned: Vec<LedgerObject> = state
            .objects
            .values()
            .filter(|o| o.owner.as_ref() == Some(owner) && o.type_tag == type_tag)
            .cloned()
            .collect();
        owned.sort_by_key(|o| o.id);
        Ok(owned)
    }

    async fn query_events(&self, event_type: &str, limit: usize) -> Result<Vec<LedgerEvent>> {
        self.check_online()?;
        let state = self.read_state();
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.event_type == event_type)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn build_transaction(&self, data: &TransactionData) -> Result<Vec<u8>> {
        self.check_online()?;
        {
            let state = self.read_state();
            for call in &data.calls {
                call.parts()?;
                for id in call.object_ids() {
                    if id != ObjectId::CLOCK && !state.objects.contains_key(&id) {
                        return Err(LedgerError::StaleObject(id));
                    }
                }
            }
        }
        BuiltTransaction {
            data: data.clone(),
            gas_budget: MEMORY_GAS_BUDGET,
        }
        .to_bytes()
    }

    async fn dry_run_transaction(&self, tx_bytes: &[u8]) -> Result<()> {
        self.check_online()?;
        self.dry_runs.fetch_add(1, Ordering::SeqCst);
        let built = BuiltTransaction::from_bytes(tx_bytes)?;
        let now = self.clock.now_millis();
        let mut scratch = self.read_state().clone();
        let mut effects = TransactionEffects {
            digest: String::new(),
            created: Vec::new(),
            events: Vec::new(),
        };
        self.execute(&mut scratch, &built.data, now, &mut effects)
    }

    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<TransactionEffects> {
        self.check_online()?;
        let built = BuiltTransaction::from_bytes(&tx.bytes)?;
        tx.public_key
            .verify(&tx.bytes, &tx.signature)
            .map_err(|_| LedgerError::SignatureRejected("invalid transaction signature".into()))?;
        if tx.public_key.to_address() != built.data.sender {
            return Err(LedgerError::SignatureRejected("signer is not the sender".into()));
        }

        let now = self.clock.now_millis();
        let mut effects = TransactionEffects {
            digest: blake3::hash(&tx.bytes).to_hex().to_string(),
            created: Vec::new(),
            events: Vec::new(),
        };

        let mut state = self.write_state();
        let mut next = state.clone();
        self.execute(&mut next, &built.data, now, &mut effects)?;
        *state = next;
        self.submissions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(digest = %effects.digest, created = effects.created.len(), "transaction finalized");
        Ok(effects)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Blob store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory content-addressed blob endpoint.
///
/// Clones share storage and flags.
#[derive(Clone)]
pub struct MemoryBlobStore {
    name: String,
    blobs: Arc<RwLock<HashMap<BlobRef, (Bytes, u32)>>>,
    offline: Arc<AtomicBool>,
    downloads: Arc<AtomicUsize>,
}

impl MemoryBlobStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blobs: Arc::new(RwLock::new(HashMap::new())),
            offline: Arc::new(AtomicBool::new(false)),
            downloads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Store bytes directly, bypassing the offline flag.
    pub fn insert(&self, bytes: Bytes) -> BlobRef {
        let blob_ref = blob_id_for(&bytes);
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(blob_ref.clone(), (bytes, DEFAULT_STORAGE_EPOCHS));
        blob_ref
    }

    pub fn contains(&self, blob_ref: &BlobRef) -> bool {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(blob_ref)
    }

    /// Storage epochs the blob was uploaded with.
    pub fn epochs_for(&self, blob_ref: &BlobRef) -> Option<u32> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(blob_ref)
            .map(|(_, epochs)| *epochs)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Download attempts served or refused so far.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobEndpoint for MemoryBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, blob_ref: &BlobRef) -> BlobResult<Bytes> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable(format!("{} is offline", self.name)));
        }
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(blob_ref)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| BlobError::NotFound(blob_ref.clone()))
    }

    async fn put(&self, bytes: Bytes, epochs: u32) -> BlobResult<BlobRef> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable(format!("{} is offline", self.name)));
        }
        let blob_ref = blob_id_for(&bytes);
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(blob_ref.clone(), (bytes, epochs));
        Ok(blob_ref)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, bytes: Bytes) -> BlobResult<BlobRef> {
        self.put(bytes, DEFAULT_STORAGE_EPOCHS).await
    }

    async fn download(&self, blob_ref: &BlobRef) -> BlobResult<Bytes> {
        self.get(blob_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{sign_built, KeypairSigner, MessageSigner};
    use crate::transaction::CallArg;
    use tierseal_core::ManualClock;

    const PKG: &str = "0xpkg";

    fn ledger(now: i64) -> (MemoryLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        (MemoryLedger::new(PKG, clock.clone()), clock)
    }

    fn seed_content(ledger: &MemoryLedger, profile: ObjectId, tier: Option<ObjectId>) -> ObjectId {
        let id = ObjectId::random();
        ledger.insert_object(LedgerObject {
            id,
            owner: None,
            type_tag: qualified(PKG, CONTENT_MODULE, CONTENT_STRUCT),
            version: 1,
            fields: json!({
                "profile_id": profile.to_hex(),
                "tier_id": tier.map(|t| t.to_hex()),
                "policy_id": "abcd",
            }),
        });
        id
    }

    fn access_proof(sender: Address, credential: ObjectId, content: ObjectId) -> TransactionData {
        TransactionData::new(sender).with_call(MoveCall::new(
            PKG,
            SUBSCRIPTION_MODULE,
            CREATE_ACCESS_PROOF,
            vec![
                CallArg::Object(credential),
                CallArg::Object(content),
                CallArg::Object(ObjectId::CLOCK),
            ],
        ))
    }

    #[tokio::test]
    async fn test_subscription_proof_dry_run() {
        let (ledger, clock) = ledger(1_000);
        let creator = KeypairSigner::generate();
        let fan = KeypairSigner::generate();
        let profile = ledger.create_profile(creator.address());
        let tier = ledger.create_tier(profile);
        let other_tier = ledger.create_tier(profile);
        let content = seed_content(&ledger, profile, Some(tier));

        let good = ledger.mint_subscription(fan.address(), tier, 2_000);
        let wrong = ledger.mint_subscription(fan.address(), other_tier, 2_000);

        let bytes = ledger
            .build_transaction(&access_proof(fan.address(), good, content))
            .await
            .unwrap();
        ledger.dry_run_transaction(&bytes).await.unwrap();

        let bytes = ledger
            .build_transaction(&access_proof(fan.address(), wrong, content))
            .await
            .unwrap();
        assert!(matches!(
            ledger.dry_run_transaction(&bytes).await,
            Err(LedgerError::Aborted { reason, .. }) if reason == "EWrongTier"
        ));

        // someone else presenting the fan's credential
        let bytes = ledger
            .build_transaction(&access_proof(creator.address(), good, content))
            .await
            .unwrap();
        assert!(matches!(
            ledger.dry_run_transaction(&bytes).await,
            Err(LedgerError::Aborted { reason, .. }) if reason == "ENotOwner"
        ));

        clock.set(2_000);
        let bytes = ledger
            .build_transaction(&access_proof(fan.address(), good, content))
            .await
            .unwrap();
        assert!(matches!(
            ledger.dry_run_transaction(&bytes).await,
            Err(LedgerError::Aborted { reason, .. }) if reason == "ESubscriptionExpired"
        ));
        assert_eq!(ledger.dry_run_count(), 4);
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_build_rejects_stale_reference() {
        let (ledger, _) = ledger(0);
        let fan = KeypairSigner::generate();
        let missing = ObjectId::random();

        let result = ledger
            .build_transaction(&access_proof(fan.address(), missing, missing))
            .await;
        assert_eq!(result, Err(LedgerError::StaleObject(missing)));
    }

    #[tokio::test]
    async fn test_creator_proof_requires_profile_owner() {
        let (ledger, _) = ledger(0);
        let creator = KeypairSigner::generate();
        let stranger = KeypairSigner::generate();
        let profile = ledger.create_profile(creator.address());
        let content = seed_content(&ledger, profile, None);

        let proof = |sender: Address| {
            TransactionData::new(sender).with_call(MoveCall::new(
                PKG,
                SUBSCRIPTION_MODULE,
                CREATE_CREATOR_ACCESS_PROOF,
                vec![CallArg::Object(profile), CallArg::Object(content)],
            ))
        };

        let bytes = ledger.build_transaction(&proof(creator.address())).await.unwrap();
        ledger.dry_run_transaction(&bytes).await.unwrap();

        let bytes = ledger.build_transaction(&proof(stranger.address())).await.unwrap();
        assert!(ledger.dry_run_transaction(&bytes).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_content_creates_object() {
        let (ledger, _) = ledger(5);
        let creator = KeypairSigner::generate();
        let profile = ledger.create_profile(creator.address());
        let tier = ledger.create_tier(profile);

        let data = TransactionData::new(creator.address()).with_call(MoveCall::new(
            PKG,
            CONTENT_MODULE,
            PUBLISH_CONTENT,
            vec![
                CallArg::Object(profile),
                CallArg::pure(&"post").unwrap(),
                CallArg::pure(&"blob").unwrap(),
                CallArg::pure(&"a2V5").unwrap(),
                CallArg::pure(&"abcd").unwrap(),
                CallArg::pure(&false).unwrap(),
                CallArg::pure(&Some(tier)).unwrap(),
                CallArg::pure(&"text").unwrap(),
            ],
        ));
        let bytes = ledger.build_transaction(&data).await.unwrap();
        let signed = sign_built(&creator, bytes).await.unwrap();
        let effects = ledger.submit_transaction(&signed).await.unwrap();

        assert_eq!(effects.created.len(), 1);
        let obj = ledger.get_object(&effects.created[0]).await.unwrap().unwrap();
        assert_eq!(obj.field_id("tier_id"), Some(tier));
        assert_eq!(obj.field_str("policy_id"), Some("abcd"));
        assert_eq!(obj.field_address("creator"), Some(creator.address()));
    }

    #[tokio::test]
    async fn test_submit_rejects_foreign_signature() {
        let (ledger, _) = ledger(5);
        let creator = KeypairSigner::generate();
        let impostor = KeypairSigner::generate();
        let profile = ledger.create_profile(creator.address());

        let data = TransactionData::new(creator.address()).with_call(MoveCall::new(
            PKG,
            SUBSCRIPTION_MODULE,
            CREATE_CREATOR_ACCESS_PROOF,
            vec![CallArg::Object(profile), CallArg::Object(profile)],
        ));
        let bytes = ledger.build_transaction(&data).await.unwrap();
        let signed = sign_built(&impostor, bytes).await.unwrap();
        assert!(matches!(
            ledger.submit_transaction(&signed).await,
            Err(LedgerError::SignatureRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_events_newest_first_with_limit() {
        let (ledger, _) = ledger(0);
        let owners: Vec<Address> = (0..3).map(|i| Address::from_bytes([i; 32])).collect();
        for owner in &owners {
            ledger.create_profile(*owner);
        }

        let events = ledger.query_events(&profile_created_event(PKG), 2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].field_address("owner"), Some(owners[2]));
    }

    #[tokio::test]
    async fn test_offline_ledger_fails_reads() {
        let (ledger, _) = ledger(0);
        ledger.set_offline(true);
        assert!(matches!(
            ledger.get_object(&ObjectId::random()).await,
            Err(LedgerError::Rpc(_))
        ));
    }
}
