use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use super::provider::{PubsubMessage, PubsubProvider};
use crate::identity::Did;
use crate::provider::ProviderError;

const INBOX_CAPACITY: usize = 1024;

/// Shared topic table all in-memory pubsub providers publish through
#[derive(Debug, Clone, Default)]
pub struct MemoryPubsubHub {
    inner: Arc<RwLock<MemoryPubsubHubInner>>,
}

#[derive(Debug, Default)]
struct MemoryPubsubHubInner {
    topics: HashMap<String, HashSet<Did>>,
    inboxes: HashMap<Did, broadcast::Sender<PubsubMessage>>,
}

fn poisoned(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Default(anyhow::anyhow!("pubsub hub lock poisoned: {}", e))
}

impl MemoryPubsubHub {
    pub fn new() -> Self {
        Self::default()
    }
}

/// In-memory pubsub provider
///
/// Messages are delivered to every other subscriber of the topic, never
/// back to the publisher.
#[derive(Debug, Clone)]
pub struct MemoryPubsubProvider {
    did: Did,
    hub: MemoryPubsubHub,
    inbox: broadcast::Sender<PubsubMessage>,
}

impl MemoryPubsubProvider {
    pub fn new(did: Did, hub: MemoryPubsubHub) -> Result<Self, ProviderError> {
        let (inbox, _) = broadcast::channel(INBOX_CAPACITY);
        hub.inner
            .write()
            .map_err(poisoned)?
            .inboxes
            .insert(did, inbox.clone());
        Ok(Self { did, hub, inbox })
    }
}

#[async_trait]
impl PubsubProvider for MemoryPubsubProvider {
    async fn stop(&self) -> Result<(), ProviderError> {
        let mut inner = self.hub.inner.write().map_err(poisoned)?;
        for subscribers in inner.topics.values_mut() {
            subscribers.remove(&self.did);
        }
        inner.topics.retain(|_, subscribers| !subscribers.is_empty());
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), ProviderError> {
        let inner = self.hub.inner.read().map_err(poisoned)?;
        let Some(subscribers) = inner.topics.get(topic) else {
            tracing::trace!("pubsub/memory: no subscribers on {}", topic);
            return Ok(());
        };
        let message = PubsubMessage {
            topic: topic.to_string(),
            from: self.did,
            data: Bytes::from(data),
        };
        for did in subscribers.iter().filter(|did| **did != self.did) {
            if let Some(inbox) = inner.inboxes.get(did) {
                // a node with no listeners just misses the message
                let _ = inbox.send(message.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ProviderError> {
        let mut inner = self.hub.inner.write().map_err(poisoned)?;
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(self.did);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ProviderError> {
        let mut inner = self.hub.inner.write().map_err(poisoned)?;
        if let Some(subscribers) = inner.topics.get_mut(topic) {
            subscribers.remove(&self.did);
            if subscribers.is_empty() {
                inner.topics.remove(topic);
            }
        }
        Ok(())
    }

    async fn subscriptions(&self) -> Result<Vec<String>, ProviderError> {
        let inner = self.hub.inner.read().map_err(poisoned)?;
        let mut topics: Vec<String> = inner
            .topics
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(&self.did))
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        Ok(topics)
    }

    async fn subscribers(&self, topic: &str) -> Result<Vec<Did>, ProviderError> {
        let inner = self.hub.inner.read().map_err(poisoned)?;
        Ok(inner
            .topics
            .get(topic)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|did| **did != self.did)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn messages(&self) -> broadcast::Receiver<PubsubMessage> {
        self.inbox.subscribe()
    }
}
