use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::codec::{self, CodecError, DecodedEnvelope, EncryptOptions, Payload, WriteOptions};
use crate::config::IridiumConfig;
use crate::dag::{DagProvider, DocumentGraph, GraphError, LoadOptions};
use crate::events::{Event, EventBus, Message, NamespaceEvent};
use crate::identity::{Did, Identity, IdentityProvider};
use crate::linked_data::Link;
use crate::namespace::{Namespace, NamespaceContext, NamespaceError, GRANTED_TYPE};
use crate::p2p::{ChannelManager, P2pError, P2pProvider, PeerKind, TransportEvent};
use crate::provider::{with_timeout, ProviderError};
use crate::pubsub::{PubsubMessage, PubsubProvider};
use crate::root::{IdentityRoot, RootError};
use crate::sync::{SyncAgent, SyncError};

#[derive(Debug, thiserror::Error)]
pub enum IridiumError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("root error: {0}")]
    Root(#[from] RootError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("p2p error: {0}")]
    P2p(#[from] P2pError),
    #[error("namespace error: {0}")]
    Namespace(#[from] NamespaceError),
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Default)]
pub struct IridiumBuilder {
    identity: Option<Identity>,
    config: Option<IridiumConfig>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    dag: Option<Arc<dyn DagProvider>>,
    p2p: Option<Arc<dyn P2pProvider>>,
    pubsub: Option<Arc<dyn PubsubProvider>>,
    /// serve sync requests on this node's sync topic
    relay: bool,
}

impl IridiumBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn seed(self, seed: impl AsRef<[u8]>) -> Self {
        self.identity(Identity::from_seed(seed))
    }

    pub fn config(mut self, config: IridiumConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    pub fn dag(mut self, provider: Arc<dyn DagProvider>) -> Self {
        self.dag = Some(provider);
        self
    }

    pub fn p2p(mut self, provider: Arc<dyn P2pProvider>) -> Self {
        self.p2p = Some(provider);
        self
    }

    pub fn pubsub(mut self, provider: Arc<dyn PubsubProvider>) -> Self {
        self.pubsub = Some(provider);
        self
    }

    pub fn relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    pub fn build(self) -> Result<Iridium, IridiumError> {
        let identity = Arc::new(self.identity.ok_or(IridiumError::Missing("identity"))?);
        let config = self.config.unwrap_or_default();
        let identity_provider = self
            .identity_provider
            .ok_or(IridiumError::Missing("identity provider"))?;
        let dag = self.dag.ok_or(IridiumError::Missing("dag provider"))?;
        let p2p = self.p2p.ok_or(IridiumError::Missing("p2p provider"))?;
        let pubsub = self.pubsub.ok_or(IridiumError::Missing("pubsub provider"))?;

        let timeout = config.provider_timeout();
        let events = EventBus::default();
        let graph = DocumentGraph::new(dag.clone(), identity.clone(), timeout);
        let root = Arc::new(IdentityRoot::new(
            identity_provider.clone(),
            graph.clone(),
            events.clone(),
            config.load_depth,
            timeout,
        ));
        let channels = ChannelManager::new(
            identity.clone(),
            p2p.clone(),
            pubsub.clone(),
            events.clone(),
            config.peer_grace(),
            timeout,
        );
        let agent = self.relay.then(|| {
            SyncAgent::new(
                identity.clone(),
                graph.clone(),
                pubsub.clone(),
                config.sync,
                timeout,
            )
        });

        Ok(Iridium {
            inner: Arc::new(IridiumInner {
                identity,
                config,
                identity_provider,
                dag,
                p2p,
                pubsub,
                graph,
                root,
                channels,
                events,
                agent,
                namespaces: tokio::sync::Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

#[derive(Debug)]
struct IridiumInner {
    identity: Arc<Identity>,
    config: IridiumConfig,
    identity_provider: Arc<dyn IdentityProvider>,
    dag: Arc<dyn DagProvider>,
    p2p: Arc<dyn P2pProvider>,
    pubsub: Arc<dyn PubsubProvider>,
    graph: DocumentGraph,
    root: Arc<IdentityRoot>,
    channels: ChannelManager,
    events: EventBus,
    agent: Option<SyncAgent>,
    /// keyed by topic, so a name can be joined for several owners
    namespaces: tokio::sync::Mutex<HashMap<String, Namespace>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A node: one identity, its root document, and its view of the network
///
/// Cheap to clone. The event pumps spawned by [`Iridium::start`] hold clones
/// until [`Iridium::stop`] is called.
#[derive(Debug, Clone)]
pub struct Iridium {
    inner: Arc<IridiumInner>,
}

impl Iridium {
    pub fn builder() -> IridiumBuilder {
        IridiumBuilder::new()
    }

    pub fn did(&self) -> Did {
        self.inner.identity.did()
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn config(&self) -> &IridiumConfig {
        &self.inner.config
    }

    pub fn graph(&self) -> &DocumentGraph {
        &self.inner.graph
    }

    pub fn root(&self) -> &IdentityRoot {
        &self.inner.root
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.inner.channels
    }

    pub fn sync_agent(&self) -> Option<&SyncAgent> {
        self.inner.agent.as_ref()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Events emitted from now on
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn listen_addresses(&self) -> Vec<String> {
        self.inner.p2p.listen_addresses()
    }

    /// Start the providers and the event pumps, then dial the interest set
    pub async fn start(&self) -> Result<(), IridiumError> {
        let inner = &self.inner;
        // subscribe before the providers start so no early event is missed
        let transport = inner.p2p.events();
        let messages = inner.pubsub.messages();

        inner.identity_provider.start().await?;
        inner.p2p.start().await?;
        inner.pubsub.start().await?;
        inner.dag.start().await?;
        if let Some(agent) = &inner.agent {
            agent.start().await?;
        }

        {
            let mut tasks = inner.tasks.lock();
            tasks.push(tokio::spawn(self.clone().transport_pump(transport)));
            tasks.push(tokio::spawn(self.clone().pubsub_pump(messages)));
        }

        let interest = inner
            .config
            .followed_peers
            .iter()
            .map(|did| (*did, PeerKind::Peer))
            .chain(
                inner
                    .config
                    .sync_nodes
                    .iter()
                    .map(|node| (node.did, PeerKind::Node)),
            )
            .collect::<Vec<_>>();
        for (did, kind) in interest {
            if let Err(e) = inner.channels.connect(did, kind).await {
                // dialed again when discovered
                tracing::debug!("iridium/start: {} not reachable yet: {}", did, e);
            }
        }

        tracing::info!("iridium/start: {} ready", self.did());
        inner.events.emit(Event::Ready);
        Ok(())
    }

    /// Stop the pumps and timers, then the providers in reverse start order
    ///
    /// Every provider is stopped even if an earlier one fails; the first
    /// failure is returned.
    pub async fn stop(&self) -> Result<(), IridiumError> {
        let inner = &self.inner;
        for task in inner.tasks.lock().drain(..) {
            task.abort();
        }
        inner.channels.stop();

        let mut first_error: Option<IridiumError> = None;
        let namespaces: Vec<Namespace> = inner.namespaces.lock().await.drain().map(|(_, ns)| ns).collect();
        for namespace in namespaces {
            if let Err(e) = namespace.stop().await {
                tracing::warn!("iridium/stop: namespace {}: {}", namespace.name(), e);
                first_error.get_or_insert(e.into());
            }
        }
        if let Some(agent) = &inner.agent {
            if let Err(e) = agent.stop().await {
                tracing::warn!("iridium/stop: sync agent: {}", e);
                first_error.get_or_insert(e.into());
            }
        }

        let results = [
            ("dag", inner.dag.stop().await),
            ("pubsub", inner.pubsub.stop().await),
            ("p2p", inner.p2p.stop().await),
            ("identity", inner.identity_provider.stop().await),
        ];
        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!("iridium/stop: {} provider: {}", name, e);
                first_error.get_or_insert(e.into());
            }
        }

        tracing::info!("iridium/stop: {} stopped", self.did());
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Store `payload` in the graph, encrypted to this identity unless
    /// `options` says otherwise
    pub async fn store(
        &self,
        payload: impl Into<Payload>,
        options: Option<WriteOptions>,
    ) -> Result<Link, IridiumError> {
        let options = options.unwrap_or_else(WriteOptions::encrypted_to_self);
        Ok(self.inner.graph.put(&payload.into(), &options).await?)
    }

    /// Load the document at `link`, expanding links to `depth` (the
    /// configured load depth when `None`)
    pub async fn load(&self, link: &Link, depth: Option<usize>) -> Result<Value, IridiumError> {
        let options = LoadOptions::depth(depth.unwrap_or(self.inner.config.load_depth));
        Ok(self.inner.graph.load(link, options).await?)
    }

    pub async fn get(&self, path: &str) -> Result<Option<Value>, IridiumError> {
        Ok(self.inner.root.get(path).await?)
    }

    /// Read `path`, resolving the root pointer again first when `nocache`
    pub async fn get_with(&self, path: &str, nocache: bool) -> Result<Option<Value>, IridiumError> {
        Ok(self.inner.root.get_with(path, nocache).await?)
    }

    pub async fn set(
        &self,
        path: &str,
        value: Value,
        options: Option<WriteOptions>,
    ) -> Result<Link, IridiumError> {
        Ok(self.inner.root.set(path, value, options).await?)
    }

    pub async fn document<T: DeserializeOwned>(&self) -> Result<T, IridiumError> {
        Ok(self.inner.root.document().await?)
    }

    /// Publish on `topic`, signed unless `options` says otherwise
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        options: Option<WriteOptions>,
    ) -> Result<(), IridiumError> {
        let options = options.unwrap_or_else(|| WriteOptions::plain().signed());
        let bytes = self.inner.graph.encode(&payload.into(), &options).await?;
        let timeout = options.timeout.unwrap_or(self.timeout());
        with_timeout(timeout, self.inner.pubsub.publish(topic, bytes)).await?;
        tracing::debug!("iridium/publish: published on {}", topic);
        Ok(())
    }

    /// Subscribe to `topic`, optionally waiting up to `wait` for a remote
    /// subscriber to show up
    pub async fn subscribe(&self, topic: &str, wait: Option<Duration>) -> Result<(), IridiumError> {
        let pubsub = &self.inner.pubsub;
        let subscribed = with_timeout(self.timeout(), pubsub.subscriptions()).await?;
        if !subscribed.iter().any(|t| t == topic) {
            with_timeout(self.timeout(), pubsub.subscribe(topic)).await?;
            tracing::debug!("iridium/subscribe: subscribed to {}", topic);
        }
        if let Some(wait) = wait {
            pubsub
                .wait_for_subscriber(topic, wait, self.inner.config.retry_interval())
                .await?;
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), IridiumError> {
        with_timeout(self.timeout(), self.inner.pubsub.unsubscribe(topic)).await?;
        Ok(())
    }

    /// Send `payload` to each of `to` over their private channels
    ///
    /// Without `options` each copy is signed and encrypted to its recipient.
    /// Encoding errors fail the whole call; delivery is reported per
    /// destination.
    pub async fn send(
        &self,
        to: &[Did],
        payload: impl Into<Payload>,
        options: Option<WriteOptions>,
    ) -> Result<Vec<(Did, bool)>, IridiumError> {
        let payload = payload.into();
        let shared = match &options {
            Some(options) => Some(self.inner.graph.encode(&payload, options).await?),
            None => None,
        };

        let mut outcomes = Vec::with_capacity(to.len());
        for did in to {
            let bytes = match &shared {
                Some(bytes) => bytes.clone(),
                None => {
                    let options =
                        WriteOptions::encrypted(EncryptOptions::to([*did])).signed();
                    self.inner.graph.encode(&payload, &options).await?
                }
            };
            outcomes.push((*did, self.inner.channels.send(did, bytes).await));
        }
        Ok(outcomes)
    }

    pub async fn connect(&self, did: Did, kind: PeerKind) -> Result<(), IridiumError> {
        Ok(self.inner.channels.connect(did, kind).await?)
    }

    pub async fn disconnect(&self, did: &Did) -> Result<(), IridiumError> {
        Ok(self.inner.channels.disconnect(did).await?)
    }

    /// This node's namespace `name`, created and initialised on first use
    pub async fn namespace(&self, name: &str) -> Result<Namespace, IridiumError> {
        self.open_namespace(name, None).await
    }

    /// Namespace `name` owned by `owner`, usually after a grant
    pub async fn join_namespace(&self, name: &str, owner: Did) -> Result<Namespace, IridiumError> {
        self.open_namespace(name, Some(owner)).await
    }

    async fn open_namespace(&self, name: &str, owner: Option<Did>) -> Result<Namespace, IridiumError> {
        let inner = &self.inner;
        let owner = owner.unwrap_or_else(|| self.did());
        let topic = crate::namespace::namespace_topic(name, &owner)?;

        let mut namespaces = inner.namespaces.lock().await;
        if let Some(namespace) = namespaces.get(&topic) {
            return Ok(namespace.clone());
        }
        let ctx = NamespaceContext {
            identity: inner.identity.clone(),
            root: inner.root.clone(),
            pubsub: inner.pubsub.clone(),
            channels: inner.channels.clone(),
            events: inner.events.clone(),
            debounce: inner.config.namespace_debounce(),
            timeout: self.timeout(),
        };
        let namespace = Namespace::new(name, Some(owner), ctx)?;
        namespace.init().await?;
        namespaces.insert(topic, namespace.clone());
        Ok(namespace)
    }

    fn timeout(&self) -> Duration {
        self.inner.config.provider_timeout()
    }

    async fn transport_pump(self, mut rx: broadcast::Receiver<TransportEvent>) {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("iridium/transport: dropped {} transport events", n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if let TransportEvent::Message { from, data } = &event {
                self.on_direct_message(*from, data).await;
            }
            if let Err(e) = self.inner.channels.handle(event).await {
                tracing::warn!("iridium/transport: {}", e);
            }
        }
    }

    async fn pubsub_pump(self, mut rx: broadcast::Receiver<PubsubMessage>) {
        loop {
            match rx.recv().await {
                Ok(message) => self.on_pubsub_message(message).await,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("iridium/pubsub: dropped {} messages", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn on_direct_message(&self, from: Did, data: &Bytes) {
        let Some(payload) = self.open_inbound(from, data).await else {
            return;
        };
        self.emit_message(Message {
            topic: None,
            from,
            payload,
        });
    }

    async fn on_pubsub_message(&self, message: PubsubMessage) {
        let PubsubMessage { topic, from, data } = message;
        let Some(payload) = self.open_inbound(from, &data).await else {
            return;
        };

        if let Some(agent) = &self.inner.agent {
            if topic == agent.topic() {
                let Some(sender) = payload.signer else {
                    tracing::debug!("iridium/pubsub: ignoring unsigned sync request from {}", from);
                    return;
                };
                match payload.payload {
                    Payload::Document(request) => {
                        agent.on_message(sender, request).await;
                    }
                    Payload::Bytes(_) => {
                        tracing::debug!("iridium/pubsub: non-document sync request from {}", sender);
                    }
                }
                return;
            }
        }

        if let Some(peer) = self.inner.channels.peer_for_channel(&topic) {
            self.inner.channels.touch(&peer);
        }

        let message = Message {
            topic: Some(topic.clone()),
            from,
            payload,
        };

        let namespace = self.inner.namespaces.lock().await.get(&topic).cloned();
        if let Some(namespace) = namespace {
            namespace.on_message(message);
            return;
        }
        self.emit_message(message);
    }

    fn emit_message(&self, message: Message) {
        if message.kind() == Some(GRANTED_TYPE) {
            if let Some(granted) = granted(&message) {
                self.inner.events.emit(Event::Namespace(granted));
            }
        }
        self.inner.events.emit(Event::Message(message));
    }

    /// Decode an inbound envelope, following a link into the graph
    ///
    /// Anything this node can't open is dropped.
    async fn open_inbound(&self, from: Did, data: &[u8]) -> Option<DecodedEnvelope> {
        let decoded = match codec::decode(data, Some(&self.inner.identity)) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!("iridium/inbound: dropping message from {}: {}", from, e);
                return None;
            }
        };
        let Some(link) = decoded.link else {
            return Some(decoded);
        };
        match self.inner.graph.get(&link, LoadOptions::default()).await {
            Ok(mut linked) => {
                linked.link = Some(link);
                Some(linked)
            }
            Err(e) => {
                tracing::debug!("iridium/inbound: dropping linked message {} from {}: {}", link, from, e);
                None
            }
        }
    }
}

fn granted(message: &Message) -> Option<NamespaceEvent> {
    let document = message.payload.payload.as_document()?;
    let namespace = document.get("namespace")?.as_str()?.to_string();
    let owner = document.get("owner")?.as_str()?.parse().ok()?;
    Some(NamespaceEvent::Granted { namespace, owner })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::MemoryDagProvider;
    use crate::identity::{MemoryIdentityProvider, MemoryNameRegistry};
    use crate::p2p::{MemoryNetwork, MemoryP2pProvider};
    use crate::pubsub::{MemoryPubsubHub, MemoryPubsubProvider};
    use serde_json::json;

    fn node(seed: &str) -> Iridium {
        let identity = Identity::from_seed(seed);
        let did = identity.did();
        Iridium::builder()
            .identity(identity)
            .identity_provider(Arc::new(MemoryIdentityProvider::new(
                did,
                MemoryNameRegistry::new(),
            )))
            .dag(Arc::new(MemoryDagProvider::new()))
            .p2p(Arc::new(MemoryP2pProvider::new(did, MemoryNetwork::new())))
            .pubsub(Arc::new(
                MemoryPubsubProvider::new(did, MemoryPubsubHub::new()).unwrap(),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_providers() {
        let err = Iridium::builder().seed("user a").build().unwrap_err();
        assert!(matches!(err, IridiumError::Missing("identity provider")));
        assert!(matches!(
            Iridium::builder().build().unwrap_err(),
            IridiumError::Missing("identity")
        ));
    }

    #[tokio::test]
    async fn test_start_emits_ready() {
        let iridium = node("user a");
        let mut events = iridium.events();
        iridium.start().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), Event::Ready));
        iridium.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_defaults_to_encrypted() {
        let iridium = node("user a");
        let link = iridium.store(json!({"a": 1}), None).await.unwrap();

        assert_eq!(iridium.load(&link, None).await.unwrap(), json!({"a": 1}));
        let bytes = iridium.graph().dag().get(&link).await.unwrap();
        assert!(codec::decode(&bytes, None).is_err());
    }

    #[tokio::test]
    async fn test_empty_recipients_fail_fast() {
        let iridium = node("user a");
        let options = WriteOptions::encrypted(EncryptOptions::only(Vec::<Did>::new()));
        let err = iridium.store(json!({}), Some(options)).await.unwrap_err();
        assert!(matches!(
            err,
            IridiumError::Graph(GraphError::Codec(CodecError::EmptyRecipients))
        ));
    }

    #[tokio::test]
    async fn test_namespace_is_created_once() {
        let iridium = node("user a");
        let first = iridium.namespace("chat").await.unwrap();
        let second = iridium.namespace("chat").await.unwrap();
        assert_eq!(first.topic(), second.topic());

        first.set("/x", json!(1), None).await.unwrap();
        assert_eq!(iridium.get("/chat/x").await.unwrap(), Some(json!(1)));
    }
}
