use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::provider::{P2pProvider, PeerInfo, TransportEvent};
use crate::identity::Did;
use crate::provider::ProviderError;

const EVENT_CAPACITY: usize = 1024;

/// In-process stand-in for a swarm
///
/// Nodes join when their provider starts. Every running node discovers
/// every other; connections are symmetric and either side can drop them.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<RwLock<MemoryNetworkInner>>,
}

#[derive(Debug, Default)]
struct MemoryNetworkInner {
    nodes: HashMap<Did, NodeEntry>,
    links: HashSet<(Did, Did)>,
}

#[derive(Debug)]
struct NodeEntry {
    online: bool,
    events: broadcast::Sender<TransportEvent>,
}

fn link_key(a: Did, b: Did) -> (Did, Did) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl MemoryNetworkInner {
    fn notify(&self, to: &Did, event: TransportEvent) {
        if let Some(node) = self.nodes.get(to) {
            let _ = node.events.send(event);
        }
    }

    fn is_online(&self, did: &Did) -> bool {
        self.nodes.get(did).map(|node| node.online).unwrap_or(false)
    }

    fn drop_link(&mut self, a: Did, b: Did) -> bool {
        if !self.links.remove(&link_key(a, b)) {
            return false;
        }
        self.notify(&a, TransportEvent::Disconnected(b));
        self.notify(&b, TransportEvent::Disconnected(a));
        true
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self, a: &Did, b: &Did) -> bool {
        self.inner.read().links.contains(&link_key(*a, *b))
    }

    /// Drop the connection between `a` and `b` as if the network failed
    pub fn sever(&self, a: &Did, b: &Did) -> bool {
        self.inner.write().drop_link(*a, *b)
    }
}

#[derive(Debug)]
pub struct MemoryP2pProvider {
    did: Did,
    network: MemoryNetwork,
    events: broadcast::Sender<TransportEvent>,
    address_book: Mutex<HashMap<Did, Vec<String>>>,
}

impl MemoryP2pProvider {
    pub fn new(did: Did, network: MemoryNetwork) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        network.inner.write().nodes.insert(
            did,
            NodeEntry {
                online: false,
                events: events.clone(),
            },
        );
        Self {
            did,
            network,
            events,
            address_book: Mutex::new(HashMap::new()),
        }
    }

    pub fn did(&self) -> Did {
        self.did
    }
}

#[async_trait]
impl P2pProvider for MemoryP2pProvider {
    async fn start(&self) -> Result<(), ProviderError> {
        let mut inner = self.network.inner.write();
        if let Some(node) = inner.nodes.get_mut(&self.did) {
            node.online = true;
        }
        let others: Vec<Did> = inner
            .nodes
            .iter()
            .filter(|(did, node)| **did != self.did && node.online)
            .map(|(did, _)| *did)
            .collect();
        for other in others {
            inner.notify(&other, TransportEvent::Discovered(self.did));
            inner.notify(&self.did, TransportEvent::Discovered(other));
        }
        tracing::debug!("p2p/memory: {} joined the network", self.did);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        let mut inner = self.network.inner.write();
        let linked: Vec<(Did, Did)> = inner
            .links
            .iter()
            .filter(|(a, b)| *a == self.did || *b == self.did)
            .copied()
            .collect();
        for (a, b) in linked {
            inner.drop_link(a, b);
        }
        if let Some(node) = inner.nodes.get_mut(&self.did) {
            node.online = false;
        }
        Ok(())
    }

    fn listen_addresses(&self) -> Vec<String> {
        vec![format!("memory://{}", self.did.peer_id())]
    }

    async fn connect(&self, to: &Did) -> Result<(), ProviderError> {
        if *to == self.did {
            return Err(anyhow::anyhow!("cannot connect to self").into());
        }
        let mut inner = self.network.inner.write();
        if !inner.is_online(to) {
            return Err(ProviderError::Unavailable(format!("{} is not reachable", to)));
        }
        if inner.links.insert(link_key(self.did, *to)) {
            inner.notify(&self.did, TransportEvent::Connected(*to));
            inner.notify(to, TransportEvent::Connected(self.did));
        }
        Ok(())
    }

    async fn disconnect(&self, from: &Did) -> Result<(), ProviderError> {
        self.network.inner.write().drop_link(self.did, *from);
        Ok(())
    }

    async fn send(&self, to: &Did, data: Vec<u8>) -> Result<(), ProviderError> {
        let inner = self.network.inner.read();
        if !inner.links.contains(&link_key(self.did, *to)) {
            return Err(ProviderError::NotFound(format!("no connection to {}", to)));
        }
        inner.notify(
            to,
            TransportEvent::Message {
                from: self.did,
                data: Bytes::from(data),
            },
        );
        Ok(())
    }

    async fn add_peer(&self, peer: Did, addresses: Vec<String>) -> Result<(), ProviderError> {
        self.address_book
            .lock()
            .entry(peer)
            .or_default()
            .extend(addresses);
        Ok(())
    }

    async fn has_peer(&self, id: &Did) -> Result<bool, ProviderError> {
        Ok(self.address_book.lock().contains_key(id) || self.network.is_connected(&self.did, id))
    }

    async fn get_peer(&self, id: &Did) -> Result<Option<PeerInfo>, ProviderError> {
        let connected = self.network.is_connected(&self.did, id);
        let addresses = self.address_book.lock().get(id).cloned();
        if addresses.is_none() && !connected {
            return Ok(None);
        }
        Ok(Some(PeerInfo {
            did: *id,
            addresses: addresses.unwrap_or_default(),
            connected,
        }))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
