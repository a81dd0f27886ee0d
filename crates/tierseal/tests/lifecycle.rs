//! Sessions, purges and persistence across engine instances.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use tierseal::ledger::{BlobError, BlobResult, BlobStore, KeypairSigner, MessageSigner};
use tierseal::store::{CacheStore, SqliteStore};
use tierseal::{
    Collaborators, DecryptSource, DecryptState, DecryptionEngine, FailureKind, SessionState,
};
use tierseal_core::BlobRef;
use tierseal_testkit::{TestWorld, DAY_MILLIS, MINUTE_MILLIS, PACKAGE};

use common::{config, engine_with, init_tracing};

#[tokio::test]
async fn test_disconnect_purges_sessions_and_cache() {
    let world = TestWorld::new();
    let store = world.memory_store();
    let engine = engine_with(&world, config(&world), store.clone());
    let tier = world.create_tier();
    let fan = world.fan();
    world.subscribe(&fan.address(), &tier, DAY_MILLIS);
    engine.connect(fan.clone()).await.unwrap();
    let post = world.insert_sealed(&tier, b"purge me");

    engine
        .resolve_and_decrypt(&post, Some(&fan.address()))
        .await
        .unwrap();
    assert_eq!(store.session_len(), 1);
    assert_eq!(store.cache_len(), 1);

    let report = engine.disconnect().await.unwrap();
    assert_eq!(report.sessions, 1);
    assert_eq!(report.cached_items, 1);
    assert_eq!(store.session_len(), 0);
    assert_eq!(store.cache_len(), 0);
    assert_eq!(engine.connected(), None);
    assert_eq!(
        engine.sessions().state(&fan.address(), PACKAGE),
        SessionState::Absent
    );

    engine.connect(fan.clone()).await.unwrap();
    let (result, trace) = engine
        .resolve_and_decrypt_traced(&post, Some(&fan.address()))
        .await;
    assert_eq!(result.unwrap().source, DecryptSource::Network);
    assert!(trace.visited(DecryptState::Decrypting));
    assert_eq!(fan.prompt_count(), 2);
}

#[tokio::test]
async fn test_switching_subject_purges_the_previous_one() {
    let world = TestWorld::new();
    let store = world.memory_store();
    let engine = engine_with(&world, config(&world), store.clone());
    let tier = world.create_tier();
    let first = world.fan();
    let second = world.fan();
    world.subscribe(&first.address(), &tier, DAY_MILLIS);
    engine.connect(first.clone()).await.unwrap();
    let post = world.insert_sealed(&tier, b"first only");

    engine
        .resolve_and_decrypt(&post, Some(&first.address()))
        .await
        .unwrap();

    // Reconnecting the same subject keeps everything.
    engine.connect(first.clone()).await.unwrap();
    assert_eq!(store.cache_len(), 1);

    engine.connect(second.clone()).await.unwrap();
    assert_eq!(engine.connected(), Some(second.address()));
    assert_eq!(store.cache_len(), 0);
    assert_eq!(store.session_len(), 0);

    let err = engine
        .resolve_and_decrypt(&post, Some(&second.address()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::NoActiveSubscription);
}

#[tokio::test]
async fn test_purge_keeps_subject_connected() {
    let world = TestWorld::new();
    let store = world.memory_store();
    let engine = engine_with(&world, config(&world), store.clone());
    let tier = world.create_tier();
    let fan = world.fan();
    world.subscribe(&fan.address(), &tier, DAY_MILLIS);
    engine.connect(fan.clone()).await.unwrap();
    let post = world.insert_sealed(&tier, b"again");

    engine
        .resolve_and_decrypt(&post, Some(&fan.address()))
        .await
        .unwrap();
    engine.purge_session_and_cache().await.unwrap();

    assert_eq!(engine.connected(), Some(fan.address()));
    assert_eq!(store.cache_len(), 0);
    engine
        .resolve_and_decrypt(&post, Some(&fan.address()))
        .await
        .unwrap();
    assert_eq!(fan.prompt_count(), 2);
}

#[tokio::test]
async fn test_session_is_renewed_after_effective_ttl() {
    let world = TestWorld::new();
    let mut config = config(&world);
    config.cache_writes_enabled = false;
    let engine = engine_with(&world, config, world.memory_store());
    let tier = world.create_tier();
    let fan = world.fan();
    world.subscribe(&fan.address(), &tier, DAY_MILLIS);
    engine.connect(fan.clone()).await.unwrap();
    let post = world.insert_sealed(&tier, b"long read");

    engine
        .resolve_and_decrypt(&post, Some(&fan.address()))
        .await
        .unwrap();
    world.clock.advance(27 * MINUTE_MILLIS);
    let decrypted = engine
        .resolve_and_decrypt(&post, Some(&fan.address()))
        .await
        .unwrap();
    assert_eq!(decrypted.source, DecryptSource::Network);
    assert_eq!(fan.prompt_count(), 1);

    world.clock.advance(MINUTE_MILLIS);
    engine
        .resolve_and_decrypt(&post, Some(&fan.address()))
        .await
        .unwrap();
    assert_eq!(fan.prompt_count(), 2);
}

#[tokio::test]
async fn test_cached_plaintext_survives_restart() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("tierseal.db");
    let world = TestWorld::new();
    let tier = world.create_tier();
    let fan = world.fan();
    world.subscribe(&fan.address(), &tier, DAY_MILLIS);
    let post = world.insert_sealed(&tier, b"persisted");

    {
        let engine = engine_with(&world, config(&world), Arc::new(SqliteStore::open(&path)?));
        engine.connect(fan.clone()).await?;
        engine
            .resolve_and_decrypt(&post, Some(&fan.address()))
            .await?;
    }

    let engine = engine_with(&world, config(&world), Arc::new(SqliteStore::open(&path)?));
    engine.connect(fan.clone()).await?;
    let downloads = world.blobs.download_count();
    let decrypted = engine
        .resolve_and_decrypt(&post, Some(&fan.address()))
        .await?;

    assert_eq!(decrypted.source, DecryptSource::Cache);
    assert_eq!(&decrypted.bytes[..], b"persisted");
    assert_eq!(world.blobs.download_count(), downloads);
    assert_eq!(fan.prompt_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_restart_does_not_share_plaintext_between_subjects() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("tierseal.db");
    let world = TestWorld::new();
    let tier = world.create_tier();
    let subscriber = world.fan();
    let stranger = world.fan();
    world.subscribe(&subscriber.address(), &tier, DAY_MILLIS);
    let post = world.insert_sealed(&tier, b"paid post");

    {
        let engine = engine_with(&world, config(&world), Arc::new(SqliteStore::open(&path)?));
        engine.connect(subscriber.clone()).await?;
        engine
            .resolve_and_decrypt(&post, Some(&subscriber.address()))
            .await?;
        // no disconnect: the process just exits
    }

    let store = Arc::new(SqliteStore::open(&path)?);
    let engine = engine_with(&world, config(&world), store.clone());
    engine.connect(stranger.clone()).await?;
    let (result, trace) = engine
        .resolve_and_decrypt_traced(&post, Some(&stranger.address()))
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), FailureKind::NoActiveSubscription);
    assert!(trace.visited(DecryptState::Authorizing));
    assert!(store
        .get_entry(&stranger.address(), &post.id)
        .await?
        .is_none());
    assert!(store
        .get_entry(&subscriber.address(), &post.id)
        .await?
        .is_some());
    Ok(())
}

#[tokio::test]
async fn test_disconnect_during_read_leaves_nothing_behind() {
    let world = TestWorld::new();
    let store = world.memory_store();
    let engine = engine_with(&world, config(&world), store.clone());
    let tier = world.create_tier();
    let fan = Arc::new(KeypairSigner::generate().with_delay(Duration::from_millis(100)));
    world.subscribe(&fan.address(), &tier, DAY_MILLIS);
    engine.connect(fan.clone()).await.unwrap();
    let post = world.insert_sealed(&tier, b"slow read");
    let fan_address = fan.address();

    let (result, report) = tokio::join!(
        engine.resolve_and_decrypt(&post, Some(&fan_address)),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            engine.disconnect().await
        }
    );

    // the read began while connected and still completes
    assert_eq!(&result.unwrap().bytes[..], b"slow read");
    assert_eq!(report.unwrap().sessions, 0);
    assert_eq!(engine.connected(), None);
    assert_eq!(store.cache_len(), 0);
    assert_eq!(store.session_len(), 0);
    assert_eq!(
        engine.sessions().state(&fan.address(), PACKAGE),
        SessionState::Absent
    );
}

#[tokio::test]
async fn test_cache_writes_can_be_disabled() {
    let world = TestWorld::new();
    let store = world.memory_store();
    let mut config = config(&world);
    config.cache_writes_enabled = false;
    let engine = engine_with(&world, config, store.clone());
    let tier = world.create_tier();
    let fan = world.fan();
    world.subscribe(&fan.address(), &tier, DAY_MILLIS);
    engine.connect(fan.clone()).await.unwrap();
    let post = world.insert_legacy3(&tier, b"not cached");

    for _ in 0..2 {
        let decrypted = engine
            .resolve_and_decrypt(&post, Some(&fan.address()))
            .await
            .unwrap();
        assert_eq!(decrypted.source, DecryptSource::Network);
    }
    assert_eq!(store.cache_len(), 0);
}

struct StalledBlobStore;

#[async_trait]
impl BlobStore for StalledBlobStore {
    async fn upload(&self, _bytes: Bytes) -> BlobResult<BlobRef> {
        Err(BlobError::Unavailable("stalled".into()))
    }

    async fn download(&self, _blob_ref: &BlobRef) -> BlobResult<Bytes> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(BlobError::Unavailable("stalled".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_download_times_out() {
    init_tracing();
    let world = TestWorld::new();
    let store = world.memory_store();
    let mut config = config(&world);
    config.download_timeout = Duration::from_secs(5);
    let engine = DecryptionEngine::new(
        config,
        Collaborators {
            ledger: world.ledger_client(),
            blobs: Arc::new(StalledBlobStore),
            key_servers: world.key_server_handles(),
            sessions: store.clone(),
            cache: store,
            clock: world.clock.clone(),
        },
    )
    .unwrap();
    let post = world.insert_public(b"never arrives");

    let err = engine.resolve_and_decrypt(&post, None).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timeout);
    assert!(err.kind().is_retriable());
}

#[test]
fn test_invalid_config_is_rejected() {
    let world = TestWorld::new();
    let store = world.memory_store();
    let mut config = config(&world);
    config.seal.threshold = 9;

    let result = DecryptionEngine::new(
        config,
        Collaborators {
            ledger: world.ledger_client(),
            blobs: world.blob_store(),
            key_servers: world.key_server_handles(),
            sessions: store.clone(),
            cache: store,
            clock: world.clock.clone(),
        },
    );
    assert!(result.is_err());
}
