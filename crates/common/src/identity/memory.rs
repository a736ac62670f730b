use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::provider::IdentityProvider;
use super::Did;
use crate::linked_data::Link;
use crate::provider::ProviderError;

/// Shared table of root pointers, standing in for a name system
#[derive(Debug, Clone, Default)]
pub struct MemoryNameRegistry {
    records: Arc<RwLock<HashMap<Did, Link>>>,
}

impl MemoryNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up any identity's pointer
    pub fn lookup(&self, did: &Did) -> Result<Option<Link>, ProviderError> {
        let records = self.records.read().map_err(|e| {
            ProviderError::Default(anyhow::anyhow!("failed to acquire read lock: {}", e))
        })?;
        Ok(records.get(did).copied())
    }

    fn publish(&self, did: Did, link: Link) -> Result<(), ProviderError> {
        let mut records = self.records.write().map_err(|e| {
            ProviderError::Default(anyhow::anyhow!("failed to acquire write lock: {}", e))
        })?;
        records.insert(did, link);
        Ok(())
    }
}

/// In-memory identity provider backed by a [`MemoryNameRegistry`]
#[derive(Debug, Clone)]
pub struct MemoryIdentityProvider {
    did: Did,
    registry: MemoryNameRegistry,
    resolutions: Arc<AtomicUsize>,
}

impl MemoryIdentityProvider {
    pub fn new(did: Did, registry: MemoryNameRegistry) -> Self {
        Self {
            did,
            registry,
            resolutions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times `resolve` has reached the registry
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn id(&self) -> Did {
        self.did
    }

    async fn resolve(&self) -> Result<Option<Link>, ProviderError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        self.registry.lookup(&self.did)
    }

    async fn set(&self, link: &Link) -> Result<(), ProviderError> {
        self.registry.publish(self.did, *link)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::linked_data::JSON_CODEC;

    #[tokio::test]
    async fn test_resolve_and_set() {
        let registry = MemoryNameRegistry::new();
        let did = Did::from(SecretKey::from_seed("user a").public());
        let provider = MemoryIdentityProvider::new(did, registry.clone());

        assert_eq!(provider.resolve().await.unwrap(), None);

        let link = Link::for_bytes(JSON_CODEC, b"{}").unwrap();
        provider.set(&link).await.unwrap();

        assert_eq!(provider.resolve().await.unwrap(), Some(link));
        assert_eq!(registry.lookup(&did).unwrap(), Some(link));
        assert_eq!(provider.resolutions(), 2);
    }

    #[tokio::test]
    async fn test_pointers_are_per_identity() {
        let registry = MemoryNameRegistry::new();
        let a = MemoryIdentityProvider::new(
            Did::from(SecretKey::from_seed("a").public()),
            registry.clone(),
        );
        let b = MemoryIdentityProvider::new(Did::from(SecretKey::from_seed("b").public()), registry);

        a.set(&Link::for_bytes(JSON_CODEC, b"a").unwrap())
            .await
            .unwrap();
        assert_eq!(b.resolve().await.unwrap(), None);
    }
}
