//! Plaintext cache.
//!
//! Decrypted bytes keyed by subject and content id, each bounded by the
//! expiry of the subscription (or session) that authorized the decrypt. A
//! subject only ever sees its own entries. An entry past its expiry is a miss
//! even while it is still physically stored, and is evicted on sight.

use std::sync::Arc;

use bytes::Bytes;

use tierseal_core::{Address, Clock, ObjectId};
use tierseal_store::{CacheEntry, CacheStore, Result};

/// Subscription-bounded cache of decrypted content.
#[derive(Clone)]
pub struct PlaintextCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl PlaintextCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Live plaintext `subject` holds for `content_id`, or `None` on a miss.
    pub async fn get(&self, subject: &Address, content_id: &ObjectId) -> Result<Option<Bytes>> {
        let Some(entry) = self.store.get_entry(subject, content_id).await? else {
            return Ok(None);
        };
        let now = self.clock.now_millis();
        if entry.is_live(now) {
            return Ok(Some(entry.plaintext));
        }
        tracing::debug!(content = %content_id, expired_at = entry.expires_at, "evicting expired plaintext");
        self.store.remove_entry(subject, content_id).await?;
        Ok(None)
    }

    /// Store plaintext until `expires_at`. Already-expired writes are dropped.
    pub async fn put(
        &self,
        subject: Address,
        content_id: ObjectId,
        plaintext: Bytes,
        owner_tier: Option<ObjectId>,
        expires_at: i64,
    ) -> Result<()> {
        let now = self.clock.now_millis();
        if expires_at <= now {
            tracing::debug!(content = %content_id, "not caching plaintext that is already expired");
            return Ok(());
        }
        self.store
            .put_entry(&CacheEntry {
                content_id,
                subject,
                plaintext,
                owner_tier,
                expires_at,
                stored_at: now,
            })
            .await
    }

    pub async fn remove(&self, subject: &Address, content_id: &ObjectId) -> Result<bool> {
        self.store.remove_entry(subject, content_id).await
    }

    pub async fn purge_all(&self) -> Result<usize> {
        self.store.purge_all().await
    }

    /// Drop every expired entry.
    pub async fn evict_expired(&self) -> Result<usize> {
        self.store.remove_expired(self.clock.now_millis()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierseal_core::ManualClock;
    use tierseal_store::MemoryStore;

    const READER: Address = Address::from_bytes([7; 32]);

    fn setup() -> (Arc<ManualClock>, Arc<MemoryStore>, PlaintextCache) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new());
        let cache = PlaintextCache::new(store.clone(), clock.clone());
        (clock, store, cache)
    }

    #[tokio::test]
    async fn test_hit_until_subscription_expiry() {
        let (clock, _, cache) = setup();
        let id = ObjectId::random();
        cache
            .put(READER, id, Bytes::from_static(b"post"), None, 2_000)
            .await
            .unwrap();

        assert_eq!(cache.get(&READER, &id).await.unwrap().as_deref(), Some(&b"post"[..]));
        clock.set(1_999);
        assert!(cache.get(&READER, &id).await.unwrap().is_some());
        clock.set(2_000);
        assert!(cache.get(&READER, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_though_present() {
        let (clock, store, cache) = setup();
        let id = ObjectId::random();
        cache
            .put(READER, id, Bytes::from_static(b"post"), None, 1_500)
            .await
            .unwrap();
        clock.set(5_000);

        assert!(store.get_entry(&READER, &id).await.unwrap().is_some());
        assert!(cache.get(&READER, &id).await.unwrap().is_none());
        assert!(store.get_entry(&READER, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_past_expiry_is_dropped() {
        let (_, store, cache) = setup();
        cache
            .put(READER, ObjectId::random(), Bytes::from_static(b"x"), None, 1_000)
            .await
            .unwrap();
        assert_eq!(store.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_evict_and_purge() {
        let (clock, store, cache) = setup();
        let tier = Some(ObjectId::random());
        cache
            .put(READER, ObjectId::random(), Bytes::from_static(b"a"), tier, 1_500)
            .await
            .unwrap();
        cache
            .put(READER, ObjectId::random(), Bytes::from_static(b"b"), tier, 9_000)
            .await
            .unwrap();

        clock.set(2_000);
        assert_eq!(cache.evict_expired().await.unwrap(), 1);
        assert_eq!(store.cache_len(), 1);
        assert_eq!(cache.purge_all().await.unwrap(), 1);
        assert_eq!(store.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_other_subject_misses() {
        let (_, store, cache) = setup();
        let id = ObjectId::random();
        let stranger = Address::from_bytes([8; 32]);
        cache
            .put(READER, id, Bytes::from_static(b"post"), None, 2_000)
            .await
            .unwrap();

        assert!(cache.get(&stranger, &id).await.unwrap().is_none());
        assert_eq!(store.cache_len(), 1);
        assert!(cache.get(&READER, &id).await.unwrap().is_some());
    }
}
