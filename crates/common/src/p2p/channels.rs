use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::provider::{P2pProvider, TransportEvent};
use super::P2pError;
use crate::codec::{self, Payload, WriteOptions};
use crate::events::{Event, EventBus};
use crate::identity::{Did, Identity};
use crate::provider::with_timeout;
use crate::pubsub::PubsubProvider;
use crate::sync::{sync_topic, SyncMessage};

/// Why a peer is in the interest set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Peer,
    /// A sync relay; it receives a `sync-init` once the channel is up
    Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Discovered,
    Connected,
    ChannelEstablished,
    /// Transport dropped, waiting out the grace window
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub did: Did,
    pub kind: PeerKind,
    pub state: PeerState,
    pub channel: Option<String>,
    pub last_seen: Instant,
    pub disconnected_at: Option<Instant>,
}

impl PeerRecord {
    fn new(did: Did, kind: PeerKind, state: PeerState) -> Self {
        Self {
            did,
            kind,
            state,
            channel: None,
            last_seen: Instant::now(),
            disconnected_at: None,
        }
    }
}

#[derive(Debug)]
struct ChannelManagerInner {
    identity: Arc<Identity>,
    p2p: Arc<dyn P2pProvider>,
    pubsub: Arc<dyn PubsubProvider>,
    events: EventBus,
    grace: Duration,
    timeout: Duration,
    interest: Mutex<HashMap<Did, PeerKind>>,
    peers: Mutex<HashMap<Did, PeerRecord>>,
    expiries: Mutex<HashMap<Did, JoinHandle<()>>>,
}

/// Tracks remote peers and the private pubsub channel to each of them
///
/// Transport events are fed in through [`ChannelManager::handle`]. The peer
/// table is only ever changed from here.
#[derive(Debug, Clone)]
pub struct ChannelManager {
    inner: Arc<ChannelManagerInner>,
}

impl ChannelManager {
    /// # Arguments
    /// * `grace` - how long a disconnected peer keeps its channel
    /// * `timeout` - deadline for each provider call
    pub fn new(
        identity: Arc<Identity>,
        p2p: Arc<dyn P2pProvider>,
        pubsub: Arc<dyn PubsubProvider>,
        events: EventBus,
        grace: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelManagerInner {
                identity,
                p2p,
                pubsub,
                events,
                grace,
                timeout,
                interest: Mutex::new(HashMap::new()),
                peers: Mutex::new(HashMap::new()),
                expiries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Add `did` to the interest set; it is dialed when discovered
    pub fn follow(&self, did: Did, kind: PeerKind) {
        self.inner.interest.lock().insert(did, kind);
    }

    pub fn unfollow(&self, did: &Did) {
        self.inner.interest.lock().remove(did);
    }

    pub fn is_followed(&self, did: &Did) -> bool {
        self.inner.interest.lock().contains_key(did)
    }

    pub fn peer(&self, did: &Did) -> Option<PeerRecord> {
        self.inner.peers.lock().get(did).cloned()
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.inner.peers.lock().values().cloned().collect()
    }

    pub fn channel(&self, did: &Did) -> Option<String> {
        self.inner
            .peers
            .lock()
            .get(did)
            .and_then(|record| record.channel.clone())
    }

    /// The peer whose private channel is `topic`
    pub fn peer_for_channel(&self, topic: &str) -> Option<Did> {
        self.inner
            .peers
            .lock()
            .values()
            .find(|record| record.channel.as_deref() == Some(topic))
            .map(|record| record.did)
    }

    /// Refresh a peer's last seen time
    pub fn touch(&self, did: &Did) {
        if let Some(record) = self.inner.peers.lock().get_mut(did) {
            record.last_seen = Instant::now();
        }
    }

    pub async fn handle(&self, event: TransportEvent) -> Result<(), P2pError> {
        match event {
            TransportEvent::Discovered(did) => self.on_discovered(did).await,
            TransportEvent::Connected(did) => self.on_connected(did).await,
            TransportEvent::Disconnected(did) => {
                self.on_disconnected(did);
                Ok(())
            }
            TransportEvent::Message { from, .. } => {
                self.touch(&from);
                Ok(())
            }
        }
    }

    /// Dial `did` and set up its channel
    pub async fn connect(&self, did: Did, kind: PeerKind) -> Result<(), P2pError> {
        self.follow(did, kind);
        with_timeout(self.inner.timeout, self.inner.p2p.connect(&did)).await?;
        self.on_connected(did).await
    }

    /// Tear down the connection and channel to `did` right away, without a
    /// grace window, and stop following it
    pub async fn disconnect(&self, did: &Did) -> Result<(), P2pError> {
        self.unfollow(did);
        if let Some(handle) = self.inner.expiries.lock().remove(did) {
            handle.abort();
        }
        let record = self.inner.peers.lock().remove(did);
        if let Err(e) = with_timeout(self.inner.timeout, self.inner.p2p.disconnect(did)).await {
            tracing::warn!("p2p/disconnect: transport disconnect from {} failed: {}", did, e);
        }
        if let Some(record) = record {
            if let Some(channel) = record.channel {
                with_timeout(self.inner.timeout, self.inner.pubsub.unsubscribe(&channel)).await?;
            }
            tracing::info!("p2p/disconnect: removed {}", did);
            self.inner.events.emit(Event::PeerRemoved(*did));
        }
        Ok(())
    }

    /// Publish already encoded bytes on the channel to `did`
    ///
    /// Returns `false` without waiting if there is no channel to `did` yet,
    /// or if publishing fails.
    pub async fn send(&self, did: &Did, data: Vec<u8>) -> bool {
        let Some(channel) = self.channel(did) else {
            tracing::warn!("p2p/send: no channel to {}, dropping message", did);
            return false;
        };
        match with_timeout(self.inner.timeout, self.inner.pubsub.publish(&channel, data)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("p2p/send: publish to {} failed: {}", did, e);
                false
            }
        }
    }

    /// Cancel pending grace timers
    pub fn stop(&self) {
        for (_, handle) in self.inner.expiries.lock().drain() {
            handle.abort();
        }
    }

    async fn on_discovered(&self, did: Did) -> Result<(), P2pError> {
        let kind = self.inner.interest.lock().get(&did).copied();
        self.inner
            .peers
            .lock()
            .entry(did)
            .or_insert_with(|| PeerRecord::new(did, kind.unwrap_or(PeerKind::Peer), PeerState::Discovered));

        let Some(kind) = kind else {
            tracing::debug!("p2p/discovered: {} is not followed", did);
            return Ok(());
        };
        tracing::debug!("p2p/discovered: dialing followed peer {}", did);
        if let Err(e) = self.connect(did, kind).await {
            tracing::warn!("p2p/discovered: failed to connect to {}: {}", did, e);
        }
        Ok(())
    }

    async fn on_connected(&self, did: Did) -> Result<(), P2pError> {
        let kind = self.inner.interest.lock().get(&did).copied();
        {
            let mut peers = self.inner.peers.lock();
            let record = peers
                .entry(did)
                .or_insert_with(|| PeerRecord::new(did, PeerKind::Peer, PeerState::Discovered));
            if let Some(kind) = kind {
                record.kind = kind;
            }
            record.last_seen = Instant::now();
            if matches!(record.state, PeerState::Connected | PeerState::ChannelEstablished) {
                return Ok(());
            }
            record.state = PeerState::Connected;
            record.disconnected_at = None;
        }

        let channel = self.inner.identity.channel_topic(&did)?;
        if let Err(e) = with_timeout(self.inner.timeout, self.inner.pubsub.subscribe(&channel)).await {
            if let Some(record) = self.inner.peers.lock().get_mut(&did) {
                record.state = PeerState::Discovered;
            }
            return Err(e.into());
        }

        let kind = {
            let mut peers = self.inner.peers.lock();
            let Some(record) = peers.get_mut(&did) else {
                // disconnected explicitly while subscribing
                return Ok(());
            };
            record.state = PeerState::ChannelEstablished;
            record.channel = Some(channel.clone());
            record.kind
        };
        tracing::info!("p2p/connected: {} on {}", did, channel);
        self.inner.events.emit(Event::PeerConnected(did));

        if kind == PeerKind::Node {
            self.sync_init(&did).await?;
        }
        Ok(())
    }

    async fn sync_init(&self, node: &Did) -> Result<(), P2pError> {
        let message = SyncMessage::init(self.inner.identity.did(), Vec::new())
            .map_err(codec::CodecError::from)?;
        let payload = Payload::Document(serde_json::to_value(&message).map_err(codec::CodecError::from)?);
        let bytes = codec::encode(&payload, &self.inner.identity, &WriteOptions::plain().signed())?;
        with_timeout(
            self.inner.timeout,
            self.inner.pubsub.publish(&sync_topic(node), bytes),
        )
        .await?;
        tracing::debug!("p2p/connected: sent sync-init to {}", node);
        Ok(())
    }

    fn on_disconnected(&self, did: Did) {
        let at = Instant::now();
        {
            let mut peers = self.inner.peers.lock();
            let Some(record) = peers.get_mut(&did) else {
                return;
            };
            record.state = PeerState::Disconnected;
            record.disconnected_at = Some(at);
        }
        tracing::info!("p2p/disconnected: {}, expiring in {:?}", did, self.inner.grace);
        self.inner.events.emit(Event::PeerDisconnected(did));

        let manager = self.clone();
        let grace = self.inner.grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            manager.expire(did, at).await;
        });
        if let Some(previous) = self.inner.expiries.lock().insert(did, handle) {
            previous.abort();
        }
    }

    async fn expire(&self, did: Did, disconnected_at: Instant) {
        let record = {
            let mut peers = self.inner.peers.lock();
            let still_gone = peers.get(&did).is_some_and(|record| {
                record.state == PeerState::Disconnected
                    && record.disconnected_at == Some(disconnected_at)
                    && record.last_seen <= disconnected_at
            });
            if !still_gone {
                return;
            }
            peers.remove(&did)
        };
        self.inner.expiries.lock().remove(&did);

        if let Some(channel) = record.and_then(|record| record.channel) {
            if let Err(e) = with_timeout(self.inner.timeout, self.inner.pubsub.unsubscribe(&channel)).await {
                tracing::warn!("p2p/expire: failed to leave {}: {}", channel, e);
            }
        }
        tracing::info!("p2p/expire: {} did not come back, removed", did);
        self.inner.events.emit(Event::PeerRemoved(did));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::p2p::{MemoryNetwork, MemoryP2pProvider};
    use crate::pubsub::{MemoryPubsubHub, MemoryPubsubProvider};

    const GRACE: Duration = Duration::from_secs(30);

    struct Node {
        identity: Arc<Identity>,
        manager: ChannelManager,
        p2p: Arc<MemoryP2pProvider>,
        pubsub: Arc<MemoryPubsubProvider>,
        events: EventBus,
    }

    fn node(seed: &str, network: &MemoryNetwork, hub: &MemoryPubsubHub) -> Node {
        let identity = Arc::new(Identity::from_seed(seed));
        let p2p = Arc::new(MemoryP2pProvider::new(identity.did(), network.clone()));
        let pubsub = Arc::new(MemoryPubsubProvider::new(identity.did(), hub.clone()).unwrap());
        let events = EventBus::default();
        let manager = ChannelManager::new(
            identity.clone(),
            p2p.clone(),
            pubsub.clone(),
            events.clone(),
            GRACE,
            Duration::from_secs(5),
        );
        Node {
            identity,
            manager,
            p2p,
            pubsub,
            events,
        }
    }

    async fn pair() -> (Node, Node, MemoryNetwork) {
        let network = MemoryNetwork::new();
        let hub = MemoryPubsubHub::new();
        let a = node("user a", &network, &hub);
        let b = node("user b", &network, &hub);
        a.p2p.start().await.unwrap();
        b.p2p.start().await.unwrap();
        (a, b, network)
    }

    #[tokio::test]
    async fn test_connect_establishes_shared_channel() {
        let (a, b, _) = pair().await;
        let mut b_transport = b.p2p.events();
        let mut b_pubsub = b.pubsub.messages();

        a.manager.connect(b.identity.did(), PeerKind::Peer).await.unwrap();
        let event = b_transport.recv().await.unwrap();
        b.manager.handle(event).await.unwrap();

        let channel = a.manager.channel(&b.identity.did()).unwrap();
        assert_eq!(b.manager.channel(&a.identity.did()), Some(channel.clone()));
        assert_eq!(
            a.manager.peer(&b.identity.did()).unwrap().state,
            PeerState::ChannelEstablished
        );
        assert_eq!(b.manager.peer_for_channel(&channel), Some(a.identity.did()));

        assert!(a.manager.send(&b.identity.did(), b"hi".to_vec()).await);
        let message = b_pubsub.recv().await.unwrap();
        assert_eq!(message.topic, channel);
        assert_eq!(message.data.as_ref(), b"hi");
    }

    #[tokio::test]
    async fn test_send_without_channel_returns_false() {
        let (a, b, _) = pair().await;
        assert!(!a.manager.send(&b.identity.did(), b"hi".to_vec()).await);
    }

    #[tokio::test]
    async fn test_discovery_dials_followed_peers() {
        let network = MemoryNetwork::new();
        let hub = MemoryPubsubHub::new();
        let a = node("user a", &network, &hub);
        let b = node("user b", &network, &hub);
        let c = node("user c", &network, &hub);
        a.manager.follow(b.identity.did(), PeerKind::Peer);

        let mut a_transport = a.p2p.events();
        a.p2p.start().await.unwrap();
        b.p2p.start().await.unwrap();
        c.p2p.start().await.unwrap();

        for _ in 0..2 {
            let event = a_transport.recv().await.unwrap();
            a.manager.handle(event).await.unwrap();
        }

        assert!(a.manager.channel(&b.identity.did()).is_some());
        assert_eq!(
            a.manager.peer(&c.identity.did()).unwrap().state,
            PeerState::Discovered
        );
        assert!(network.is_connected(&a.identity.did(), &b.identity.did()));
        assert!(!network.is_connected(&a.identity.did(), &c.identity.did()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_peer_expires_after_grace() {
        let (a, b, network) = pair().await;
        let mut a_transport = a.p2p.events();
        let mut events = a.events.subscribe();
        let b_did = b.identity.did();

        a.manager.connect(b_did, PeerKind::Peer).await.unwrap();
        let channel = a.manager.channel(&b_did).unwrap();
        assert!(network.sever(&a.identity.did(), &b_did));

        // Connected, then Disconnected
        for _ in 0..2 {
            let event = a_transport.recv().await.unwrap();
            a.manager.handle(event).await.unwrap();
        }
        assert_eq!(a.manager.peer(&b_did).unwrap().state, PeerState::Disconnected);

        tokio::time::sleep(GRACE / 2).await;
        assert!(a.manager.peer(&b_did).is_some());

        tokio::time::sleep(GRACE).await;
        assert!(a.manager.peer(&b_did).is_none());
        assert!(!a.pubsub.subscriptions().await.unwrap().contains(&channel));

        assert!(matches!(events.recv().await.unwrap(), Event::PeerConnected(d) if d == b_did));
        assert!(matches!(events.recv().await.unwrap(), Event::PeerDisconnected(d) if d == b_did));
        assert!(matches!(events.recv().await.unwrap(), Event::PeerRemoved(d) if d == b_did));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_keeps_peer() {
        let (a, b, network) = pair().await;
        let mut a_transport = a.p2p.events();
        let b_did = b.identity.did();

        a.manager.connect(b_did, PeerKind::Peer).await.unwrap();
        network.sever(&a.identity.did(), &b_did);
        for _ in 0..2 {
            let event = a_transport.recv().await.unwrap();
            a.manager.handle(event).await.unwrap();
        }

        tokio::time::sleep(GRACE / 3).await;
        a.manager.connect(b_did, PeerKind::Peer).await.unwrap();
        tokio::time::sleep(GRACE).await;

        let record = a.manager.peer(&b_did).unwrap();
        assert_eq!(record.state, PeerState::ChannelEstablished);
        assert!(record.channel.is_some());
    }

    #[tokio::test]
    async fn test_explicit_disconnect_removes_immediately() {
        let (a, b, network) = pair().await;
        let b_did = b.identity.did();
        a.manager.connect(b_did, PeerKind::Peer).await.unwrap();

        a.manager.disconnect(&b_did).await.unwrap();

        assert!(a.manager.peer(&b_did).is_none());
        assert!(!a.manager.is_followed(&b_did));
        assert!(!network.is_connected(&a.identity.did(), &b_did));
        assert!(a.pubsub.subscriptions().await.unwrap().is_empty());
    }
}
