use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::identity::Did;
use crate::provider::{retry_until, ProviderError};

/// A message received on a subscribed topic, still encoded
#[derive(Debug, Clone)]
pub struct PubsubMessage {
    pub topic: String,
    pub from: Did,
    pub data: Bytes,
}

/// Topic-based broadcast messaging
///
/// Inbound messages on subscribed topics are delivered through
/// [`PubsubProvider::messages`]. Topics are plain UTF-8 strings.
#[async_trait]
pub trait PubsubProvider: Send + Sync + std::fmt::Debug + 'static {
    async fn start(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), ProviderError>;

    async fn subscribe(&self, topic: &str) -> Result<(), ProviderError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), ProviderError>;

    /// Topics this node is subscribed to
    async fn subscriptions(&self) -> Result<Vec<String>, ProviderError>;

    /// Remote peers currently subscribed to `topic`
    async fn subscribers(&self, topic: &str) -> Result<Vec<Did>, ProviderError>;

    /// Wait until at least one remote peer subscribes to `topic`, checking
    /// every `interval`
    ///
    /// Fails with [`ProviderError::Timeout`] once `timeout` has elapsed.
    async fn wait_for_subscriber(
        &self,
        topic: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), ProviderError> {
        retry_until(timeout, interval, || async {
            let subscribers = self.subscribers(topic).await?;
            Ok((!subscribers.is_empty()).then_some(()))
        })
        .await
    }

    /// Stream of inbound messages on all subscribed topics
    fn messages(&self) -> broadcast::Receiver<PubsubMessage>;
}
