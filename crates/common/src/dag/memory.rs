use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::provider::{DagProvider, PutOptions};
use crate::linked_data::Link;
use crate::provider::ProviderError;

/// In-memory DAG provider
#[derive(Debug, Clone, Default)]
pub struct MemoryDagProvider {
    inner: Arc<RwLock<MemoryDagProviderInner>>,
}

#[derive(Debug, Default)]
struct MemoryDagProviderInner {
    blocks: HashMap<Link, Bytes>,
    /// Reference counts, entries are removed when they reach zero
    pins: HashMap<Link, usize>,
}

fn poisoned(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Default(anyhow::anyhow!("memory dag lock poisoned: {}", e))
}

impl MemoryDagProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every block without pins, returning how many were removed
    pub fn gc(&self) -> Result<usize, ProviderError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let MemoryDagProviderInner { blocks, pins } = &mut *inner;
        let before = blocks.len();
        blocks.retain(|link, _| pins.contains_key(link));
        let removed = before - blocks.len();
        tracing::debug!("dag/gc: removed {} unpinned blocks", removed);
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, ProviderError> {
        Ok(self.inner.read().map_err(poisoned)?.blocks.len())
    }

    pub fn is_empty(&self) -> Result<bool, ProviderError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl DagProvider for MemoryDagProvider {
    async fn get(&self, link: &Link) -> Result<Bytes, ProviderError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .blocks
            .get(link)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(link.to_string()))
    }

    async fn put(&self, data: Vec<u8>, options: PutOptions) -> Result<Link, ProviderError> {
        let link = Link::for_bytes(options.codec, &data)?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.blocks.insert(link, Bytes::from(data));
        if options.pin {
            *inner.pins.entry(link).or_insert(0) += 1;
        }
        Ok(link)
    }

    async fn has(&self, link: &Link) -> Result<bool, ProviderError> {
        Ok(self.inner.read().map_err(poisoned)?.blocks.contains_key(link))
    }

    async fn pin(&self, link: &Link) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if !inner.blocks.contains_key(link) {
            return Err(ProviderError::NotFound(link.to_string()));
        }
        *inner.pins.entry(*link).or_insert(0) += 1;
        Ok(())
    }

    async fn unpin(&self, link: &Link) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let count = inner
            .pins
            .get_mut(link)
            .ok_or_else(|| ProviderError::NotFound(format!("no pins on {}", link)))?;
        *count -= 1;
        if *count == 0 {
            inner.pins.remove(link);
        }
        Ok(())
    }

    async fn pin_count(&self, link: &Link) -> Result<usize, ProviderError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.pins.get(link).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::linked_data::{JSON_CODEC, RAW_CODEC};

    #[tokio::test]
    async fn test_put_get() {
        let dag = MemoryDagProvider::new();
        let link = dag.put(b"block".to_vec(), PutOptions::default()).await.unwrap();

        assert_eq!(link.codec(), JSON_CODEC);
        assert_eq!(dag.get(&link).await.unwrap().as_ref(), b"block");
        assert!(dag.has(&link).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_block() {
        let dag = MemoryDagProvider::new();
        let link = Link::for_bytes(RAW_CODEC, b"never stored").unwrap();
        assert!(dag.get(&link).await.unwrap_err().is_not_found());
        assert!(dag.pin(&link).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_pins_are_reference_counted() {
        let dag = MemoryDagProvider::new();
        let link = dag.put(b"root".to_vec(), PutOptions::default()).await.unwrap();
        dag.pin(&link).await.unwrap();
        assert_eq!(dag.pin_count(&link).await.unwrap(), 2);

        dag.unpin(&link).await.unwrap();
        assert_eq!(dag.gc().unwrap(), 0);
        assert!(dag.has(&link).await.unwrap());

        dag.unpin(&link).await.unwrap();
        assert_eq!(dag.gc().unwrap(), 1);
        assert!(!dag.has(&link).await.unwrap());
        assert!(dag.unpin(&link).await.is_err());
    }

    #[tokio::test]
    async fn test_unpinned_put() {
        let dag = MemoryDagProvider::new();
        let options = PutOptions {
            pin: false,
            ..PutOptions::default()
        };
        dag.put(b"transient".to_vec(), options).await.unwrap();
        assert_eq!(dag.gc().unwrap(), 1);
        assert!(dag.is_empty().unwrap());
    }
}
