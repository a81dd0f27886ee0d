#![allow(dead_code)]

use std::sync::Arc;

use tierseal::store::{CacheStore, SessionStore};
use tierseal::{Collaborators, DecryptionEngine, EngineConfig};
use tierseal_testkit::{TestWorld, PACKAGE};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn config(world: &TestWorld) -> EngineConfig {
    let mut config = EngineConfig::for_package(PACKAGE);
    config.seal = world.seal_config(world.threshold);
    config
}

pub fn engine_with<S>(world: &TestWorld, config: EngineConfig, store: Arc<S>) -> DecryptionEngine
where
    S: SessionStore + CacheStore + 'static,
{
    init_tracing();
    DecryptionEngine::new(
        config,
        Collaborators {
            ledger: world.ledger_client(),
            blobs: world.blob_store(),
            key_servers: world.key_server_handles(),
            sessions: store.clone(),
            cache: store,
            clock: world.clock.clone(),
        },
    )
    .unwrap()
}

pub fn key_server_requests(world: &TestWorld) -> usize {
    world.key_servers.iter().map(|s| s.request_count()).sum()
}
