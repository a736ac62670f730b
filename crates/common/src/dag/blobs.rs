use std::collections::HashMap;
use std::future::IntoFuture;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use iroh_blobs::{
    api::{
        blobs::{BlobStatus, Blobs},
        ExportBaoError, RequestError,
    },
    store::{fs::FsStore, mem::MemStore},
    BlobsProtocol, Hash,
};
use parking_lot::Mutex;

use super::provider::{DagProvider, PutOptions};
use crate::linked_data::Link;
use crate::provider::ProviderError;

/// Client over a local iroh-blobs store
///
/// Router must handle the iroh-blobs ALPN if the store should also be served
/// to peers.
#[derive(Clone, Debug)]
pub struct BlobsStore {
    pub inner: Arc<BlobsProtocol>,
}

impl Deref for BlobsStore {
    type Target = Arc<BlobsProtocol>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobsStoreError {
    #[error("blobs store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("blob store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export bao error: {0}")]
    ExportBao(#[from] ExportBaoError),
    #[error("request error: {0}")]
    Request(#[from] RequestError),
}

impl From<BlobsStoreError> for ProviderError {
    fn from(e: BlobsStoreError) -> Self {
        ProviderError::Default(anyhow!("{}", e))
    }
}

impl BlobsStore {
    /// Load a blob store from the given path
    pub async fn fs(path: &Path) -> Result<Self, BlobsStoreError> {
        tracing::debug!("BlobsStore::fs loading store at {:?}", path);
        let store = FsStore::load(path).await?;
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    pub async fn memory() -> Result<Self, BlobsStoreError> {
        let store = MemStore::new();
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    pub fn blobs(&self) -> &Blobs {
        self.inner.store().blobs()
    }

    pub async fn get(&self, hash: &Hash) -> Result<Bytes, BlobsStoreError> {
        let bytes = self.blobs().get_bytes(*hash).await?;
        Ok(bytes)
    }

    pub async fn put(&self, data: Vec<u8>) -> Result<Hash, BlobsStoreError> {
        let hash = self.blobs().add_bytes(data).into_future().await?.hash;
        Ok(hash)
    }

    /// Whether the blob is complete in the local store
    pub async fn stat(&self, hash: &Hash) -> Result<bool, BlobsStoreError> {
        let stat = self
            .blobs()
            .status(*hash)
            .await
            .map_err(|err| BlobsStoreError::Default(anyhow!(err)))?;
        Ok(matches!(stat, BlobStatus::Complete { .. }))
    }
}

/// DAG provider over an iroh-blobs store
///
/// Blocks are stored as blobs, so a link's digest is the blob hash. Pin
/// counts are tracked here; the store itself keeps every blob.
#[derive(Clone, Debug)]
pub struct BlobsDagProvider {
    store: BlobsStore,
    pins: Arc<Mutex<HashMap<Link, usize>>>,
}

impl BlobsDagProvider {
    pub fn new(store: BlobsStore) -> Self {
        Self {
            store,
            pins: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &BlobsStore {
        &self.store
    }
}

#[async_trait]
impl DagProvider for BlobsDagProvider {
    async fn get(&self, link: &Link) -> Result<Bytes, ProviderError> {
        let hash = link.hash();
        if !self.store.stat(&hash).await? {
            return Err(ProviderError::NotFound(link.to_string()));
        }
        Ok(self.store.get(&hash).await?)
    }

    async fn put(&self, data: Vec<u8>, options: PutOptions) -> Result<Link, ProviderError> {
        let hash = self.store.put(data).await?;
        let link = Link::new(options.codec, hash)?;
        if options.pin {
            *self.pins.lock().entry(link).or_insert(0) += 1;
        }
        tracing::debug!("dag/blobs: stored {}", link);
        Ok(link)
    }

    async fn has(&self, link: &Link) -> Result<bool, ProviderError> {
        Ok(self.store.stat(&link.hash()).await?)
    }

    async fn pin(&self, link: &Link) -> Result<(), ProviderError> {
        if !self.has(link).await? {
            return Err(ProviderError::NotFound(link.to_string()));
        }
        *self.pins.lock().entry(*link).or_insert(0) += 1;
        Ok(())
    }

    async fn unpin(&self, link: &Link) -> Result<(), ProviderError> {
        let mut pins = self.pins.lock();
        let count = pins
            .get_mut(link)
            .ok_or_else(|| ProviderError::NotFound(format!("no pins on {}", link)))?;
        *count -= 1;
        if *count == 0 {
            pins.remove(link);
        }
        Ok(())
    }

    async fn pin_count(&self, link: &Link) -> Result<usize, ProviderError> {
        Ok(self.pins.lock().get(link).copied().unwrap_or(0))
    }
}
