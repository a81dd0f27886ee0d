//! Content-addressed blob storage with endpoint fallback.
//!
//! Reads go to aggregators first, then publishers; the first endpoint that
//! returns bytes wins. A blob is only reported missing when every endpoint
//! says so. Any other failure on any endpoint makes the result `Unavailable`,
//! because the blob may well exist behind the endpoint that failed.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use tierseal_core::BlobRef;

use crate::error::{BlobError, BlobResult};

/// Default storage period for uploads, in storage epochs.
pub const DEFAULT_STORAGE_EPOCHS: u32 = 30;

/// Content address of `bytes`.
pub fn blob_id_for(bytes: &[u8]) -> BlobRef {
    BlobRef::new(URL_SAFE_NO_PAD.encode(blake3::hash(bytes).as_bytes()))
}

/// Byte-exact blob storage as seen by the engine.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: Bytes) -> BlobResult<BlobRef>;

    async fn download(&self, blob_ref: &BlobRef) -> BlobResult<Bytes>;
}

/// A single aggregator or publisher.
#[async_trait]
pub trait BlobEndpoint: Send + Sync {
    /// Human-readable name for logs (usually the URL).
    fn name(&self) -> &str;

    async fn get(&self, blob_ref: &BlobRef) -> BlobResult<Bytes>;

    async fn put(&self, bytes: Bytes, epochs: u32) -> BlobResult<BlobRef>;
}

/// Endpoint configuration for [`FallbackBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobStoreConfig {
    /// Read endpoints, tried in order.
    pub aggregators: Vec<String>,

    /// Write endpoints, also used as read fallbacks.
    pub publishers: Vec<String>,

    pub storage_epochs: u32,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            aggregators: Vec::new(),
            publishers: Vec::new(),
            storage_epochs: DEFAULT_STORAGE_EPOCHS,
        }
    }
}

/// A [`BlobStore`] over ordered endpoints.
pub struct FallbackBlobStore {
    aggregators: Vec<Arc<dyn BlobEndpoint>>,
    publishers: Vec<Arc<dyn BlobEndpoint>>,
    storage_epochs: u32,
}

impl FallbackBlobStore {
    pub fn new(
        aggregators: Vec<Arc<dyn BlobEndpoint>>,
        publishers: Vec<Arc<dyn BlobEndpoint>>,
        storage_epochs: u32,
    ) -> Self {
        Self {
            aggregators,
            publishers,
            storage_epochs,
        }
    }

    /// Build from config, turning each configured URL into an endpoint.
    pub fn from_config<F>(config: &BlobStoreConfig, mut connect: F) -> Self
    where
        F: FnMut(&str) -> Arc<dyn BlobEndpoint>,
    {
        let aggregators = config.aggregators.iter().map(|u| connect(u)).collect();
        let publishers = config.publishers.iter().map(|u| connect(u)).collect();
        Self::new(aggregators, publishers, config.storage_epochs)
    }
}

#[async_trait]
impl BlobStore for FallbackBlobStore {
    async fn upload(&self, bytes: Bytes) -> BlobResult<BlobRef> {
        let mut errors = Vec::new();
        for endpoint in &self.publishers {
            match endpoint.put(bytes.clone(), self.storage_epochs).await {
                Ok(blob_ref) => return Ok(blob_ref),
                Err(e) => {
                    tracing::warn!(endpoint = endpoint.name(), error = %e, "upload failed, trying next publisher");
                    errors.push(format!("{}: {}", endpoint.name(), e));
                }
            }
        }
        if errors.is_empty() {
            return Err(BlobError::Unavailable("no publishers configured".into()));
        }
        Err(BlobError::Unavailable(errors.join("; ")))
    }

    async fn download(&self, blob_ref: &BlobRef) -> BlobResult<Bytes> {
        if blob_ref.is_empty() {
            return Err(BlobError::NotFound(blob_ref.clone()));
        }

        let mut errors = Vec::new();
        let mut tried = 0usize;
        for endpoint in self.aggregators.iter().chain(self.publishers.iter()) {
            tried += 1;
            match endpoint.get(blob_ref).await {
                Ok(bytes) => {
                    tracing::debug!(endpoint = endpoint.name(), %blob_ref, len = bytes.len(), "blob downloaded");
                    return Ok(bytes);
                }
                Err(BlobError::NotFound(_)) => {
                    tracing::debug!(endpoint = endpoint.name(), %blob_ref, "blob not on endpoint");
                }
                Err(e) => {
                    tracing::warn!(endpoint = endpoint.name(), %blob_ref, error = %e, "endpoint failed, falling back");
                    errors.push(format!("{}: {}", endpoint.name(), e));
                }
            }
        }

        if tried == 0 {
            Err(BlobError::Unavailable("no endpoints configured".into()))
        } else if errors.is_empty() {
            Err(BlobError::NotFound(blob_ref.clone()))
        } else {
            Err(BlobError::Unavailable(errors.join("; ")))
        }
    }
}
