//! Sync relay agent
//!
//! A relay listens on `sync/{its own did}` and serves three requests:
//! `sync-init` registers a peer and its pin list, `sync-put` stores a
//! payload for later delivery (encrypted to the relay, the sender and an
//! optional recipient) and `pin` pins a block on the sender's behalf.
//! Every request is answered with a [`SyncReply`] on the private channel
//! between the relay and the sender.

mod message;

pub use message::{
    sync_topic, SyncBody, SyncInit, SyncKind, SyncMessage, SyncPut, SyncReply,
    SYNC_REPLY_TYPE, SYNC_TOPIC_PREFIX,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::codec::{self, CodecError, EncryptOptions, Payload, WriteOptions};
use crate::config::SyncConfig;
use crate::crypto::KeyError;
use crate::dag::{DocumentGraph, GraphError};
use crate::identity::{Did, Identity};
use crate::linked_data::Link;
use crate::provider::{with_timeout, ProviderError};
use crate::pubsub::PubsubProvider;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("sync queue for {peer} is full ({limit} payloads)")]
    QueueFull { peer: Did, limit: usize },
    #[error("pin limit for {peer} reached ({limit} pins)")]
    PinLimit { peer: Did, limit: usize },
    #[error("sync-init from {from} claims to be {claimed}")]
    IdentityMismatch { from: Did, claimed: Did },
    #[error("malformed sync message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("channel key error: {0}")]
    Key(#[from] KeyError),
}

/// A peer that announced itself with `sync-init`
#[derive(Debug, Clone)]
pub struct SyncPeer {
    pub did: Did,
    pub pins: Vec<Link>,
    pub seen: Instant,
}

#[derive(Debug)]
struct SyncAgentInner {
    identity: Arc<Identity>,
    graph: DocumentGraph,
    pubsub: Arc<dyn PubsubProvider>,
    config: SyncConfig,
    timeout: Duration,
    peers: Mutex<HashMap<Did, SyncPeer>>,
    queues: Mutex<HashMap<Did, Vec<Link>>>,
    pins: Mutex<HashMap<Did, Vec<Link>>>,
}

#[derive(Debug, Clone)]
pub struct SyncAgent {
    inner: Arc<SyncAgentInner>,
}

impl SyncAgent {
    pub fn new(
        identity: Arc<Identity>,
        graph: DocumentGraph,
        pubsub: Arc<dyn PubsubProvider>,
        config: SyncConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SyncAgentInner {
                identity,
                graph,
                pubsub,
                config,
                timeout,
                peers: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                pins: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn topic(&self) -> String {
        sync_topic(&self.inner.identity.did())
    }

    pub async fn start(&self) -> Result<(), SyncError> {
        let topic = self.topic();
        with_timeout(self.inner.timeout, self.inner.pubsub.subscribe(&topic)).await?;
        tracing::info!("sync/start: relaying on {}", topic);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SyncError> {
        with_timeout(self.inner.timeout, self.inner.pubsub.unsubscribe(&self.topic())).await?;
        Ok(())
    }

    pub fn peer(&self, did: &Did) -> Option<SyncPeer> {
        self.inner.peers.lock().get(did).cloned()
    }

    /// Payloads held for `did`, oldest first
    pub fn queued(&self, did: &Did) -> Vec<Link> {
        self.inner.queues.lock().get(did).cloned().unwrap_or_default()
    }

    pub fn pinned(&self, did: &Did) -> Vec<Link> {
        self.inner.pins.lock().get(did).cloned().unwrap_or_default()
    }

    /// Hand over everything queued for `did` and release the relay's pins
    /// on it
    pub async fn drain(&self, did: &Did) -> Vec<Link> {
        let links = self.inner.queues.lock().remove(did).unwrap_or_default();
        for link in &links {
            if let Err(e) = self.inner.graph.dag().unpin(link).await {
                tracing::warn!("sync/drain: failed to release {}: {}", link, e);
            }
        }
        links
    }

    /// Serve one request from `from` and send the reply back
    ///
    /// Failures are reported to the requester in the reply, not returned.
    /// The reply is returned as well so callers can inspect it.
    pub async fn on_message(&self, from: Did, payload: Value) -> SyncReply {
        let reply = match serde_json::from_value::<SyncMessage>(payload) {
            Ok(message) => {
                let request = message.request.clone();
                match self.handle(from, &message).await {
                    Ok(cid) => SyncReply::ok(request, cid),
                    Err(e) => {
                        tracing::warn!("sync/{:?}: request from {} failed: {}", message.kind, from, e);
                        SyncReply::failed(request, e)
                    }
                }
            }
            Err(e) => {
                tracing::debug!("sync/message: dropping malformed request from {}: {}", from, e);
                SyncReply::failed(None, SyncError::from(e))
            }
        };

        if let Err(e) = self.reply(&from, &reply).await {
            tracing::warn!("sync/reply: failed to answer {}: {}", from, e);
        }
        reply
    }

    /// Apply a request, returning the link it stored or pinned, if any
    pub async fn handle(&self, from: Did, message: &SyncMessage) -> Result<Option<Link>, SyncError> {
        match message.body()? {
            SyncBody::Init(init) => {
                if init.did != from {
                    return Err(SyncError::IdentityMismatch {
                        from,
                        claimed: init.did,
                    });
                }
                tracing::info!("sync/init: {} registered {} pins", from, init.pins.len());
                self.inner.peers.lock().insert(
                    from,
                    SyncPeer {
                        did: init.did,
                        pins: init.pins,
                        seen: Instant::now(),
                    },
                );
                Ok(None)
            }
            SyncBody::Put(put) => self.put(from, put).await.map(Some),
            SyncBody::Pin(link) => self.pin(from, link).await.map(Some),
        }
    }

    async fn put(&self, from: Did, put: SyncPut) -> Result<Link, SyncError> {
        let limit = self.inner.config.queue_limit;
        if self.queued(&from).len() >= limit {
            return Err(SyncError::QueueFull { peer: from, limit });
        }

        let mut recipients = vec![from];
        recipients.extend(put.to);
        let options = WriteOptions::encrypted(EncryptOptions::to(recipients));
        let link = self
            .inner
            .graph
            .put(&Payload::Document(put.payload), &options)
            .await?;

        // another put may have filled the queue while storing
        let queued = {
            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(from).or_default();
            (queue.len() < limit).then(|| {
                queue.push(link);
                queue.len()
            })
        };
        let Some(queued) = queued else {
            if let Err(e) = self.inner.graph.dag().unpin(&link).await {
                tracing::warn!("sync/put: failed to release {}: {}", link, e);
            }
            return Err(SyncError::QueueFull { peer: from, limit });
        };
        tracing::debug!("sync/put: holding {} for {} ({} queued)", link, from, queued);
        Ok(link)
    }

    async fn pin(&self, from: Did, link: Link) -> Result<Link, SyncError> {
        let limit = self.inner.config.pin_limit;
        if self.pinned(&from).len() >= limit {
            return Err(SyncError::PinLimit { peer: from, limit });
        }
        with_timeout(self.inner.timeout, self.inner.graph.dag().pin(&link)).await?;
        self.inner.pins.lock().entry(from).or_default().push(link);
        tracing::debug!("sync/pin: pinned {} for {}", link, from);
        Ok(link)
    }

    async fn reply(&self, to: &Did, reply: &SyncReply) -> Result<(), SyncError> {
        let channel = self.inner.identity.channel_topic(to)?;
        let payload = Payload::Document(serde_json::to_value(reply)?);
        let bytes = codec::encode(&payload, &self.inner.identity, &WriteOptions::plain().signed())?;
        with_timeout(self.inner.timeout, self.inner.pubsub.publish(&channel, bytes)).await?;
        Ok(())
    }
}
