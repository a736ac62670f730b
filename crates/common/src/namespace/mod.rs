//! Namespaces: named, membership-controlled sub-trees of the root document
//!
//! A namespace `chat` lives at `/chat` in its owner's root document and has a
//! pubsub topic derived from its name and owner. Membership edits are
//! debounced into a single header update, which re-encrypts the sub-tree to
//! the current members and announces the new snapshot on the topic.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::codec::{self, CodecError, EncryptOptions, Payload, WriteOptions};
use crate::dag::{DocumentGraph, GraphError};
use crate::events::{Event, EventBus, Message, NamespaceEvent};
use crate::identity::{Did, Identity};
use crate::linked_data::Link;
use crate::p2p::ChannelManager;
use crate::provider::{with_timeout, ProviderError};
use crate::pubsub::PubsubProvider;
use crate::root::{IdentityRoot, RootError};

/// `type` of the direct message telling a peer it was added to a namespace
pub const GRANTED_TYPE: &str = "namespace/granted";
/// `type` of the snapshot announcement published on the namespace topic
pub const HEADER_TYPE: &str = "namespace/header";

#[derive(Debug, thiserror::Error)]
pub enum NamespaceError {
    #[error("root error: {0}")]
    Root(#[from] RootError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("namespace {0} is locked")]
    LockContention(String),
}

/// Topic for namespace `name` owned by `owner`
///
/// Base58 of the SHA-256 of `{"id": name, "owner": owner}` serialized with
/// sorted keys.
pub fn namespace_topic(name: &str, owner: &Did) -> Result<String, CodecError> {
    let canonical = serde_json::to_vec(&json!({ "id": name, "owner": owner }))?;
    Ok(bs58::encode(Sha256::digest(&canonical)).into_string())
}

/// Everything a namespace needs from the node it belongs to
#[derive(Debug, Clone)]
pub struct NamespaceContext {
    pub identity: Arc<Identity>,
    pub root: Arc<IdentityRoot>,
    pub pubsub: Arc<dyn PubsubProvider>,
    pub channels: ChannelManager,
    pub events: EventBus,
    pub debounce: Duration,
    pub timeout: Duration,
}

#[derive(Debug)]
struct NamespaceInner {
    name: String,
    owner: Did,
    topic: String,
    ctx: NamespaceContext,
    members: Mutex<Vec<Did>>,
    header: Mutex<Option<Link>>,
    lock: tokio::sync::Mutex<()>,
    /// Bumped by every schedule and by stop; a sleeping update only runs
    /// if it is still the latest
    generation: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct Namespace {
    inner: Arc<NamespaceInner>,
}

impl Namespace {
    /// A namespace owned by `owner`, or by this node when `None`
    ///
    /// Call [`Namespace::init`] before using it.
    pub fn new(
        name: impl Into<String>,
        owner: Option<Did>,
        ctx: NamespaceContext,
    ) -> Result<Self, NamespaceError> {
        let name = name.into();
        let owner = owner.unwrap_or_else(|| ctx.identity.did());
        let topic = namespace_topic(&name, &owner)?;
        let mut members = vec![owner];
        if owner != ctx.identity.did() {
            members.push(ctx.identity.did());
        }
        Ok(Self {
            inner: Arc::new(NamespaceInner {
                name,
                owner,
                topic,
                ctx,
                members: Mutex::new(members),
                header: Mutex::new(None),
                lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        })
    }

    pub async fn init(&self) -> Result<(), NamespaceError> {
        let ctx = &self.inner.ctx;
        with_timeout(ctx.timeout, ctx.pubsub.subscribe(&self.inner.topic)).await?;
        tracing::debug!(
            "namespace/init: {} listening on {}",
            self.inner.name,
            self.inner.topic
        );
        Ok(())
    }

    /// Cancel a pending header update and leave the topic
    pub async fn stop(&self) -> Result<(), NamespaceError> {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let ctx = &self.inner.ctx;
        with_timeout(ctx.timeout, ctx.pubsub.unsubscribe(&self.inner.topic)).await?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn owner(&self) -> Did {
        self.inner.owner
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn members(&self) -> Vec<Did> {
        self.inner.members.lock().clone()
    }

    pub fn is_member(&self, did: &Did) -> bool {
        self.inner.members.lock().contains(did)
    }

    /// Link of the last encrypted snapshot, if headers were ever updated
    pub fn header(&self) -> Option<Link> {
        *self.inner.header.lock()
    }

    /// Absolute root path for `path` within this namespace
    pub fn path(&self, path: &str) -> String {
        format!("/{}{}", self.inner.name, path)
    }

    pub async fn get(&self, path: &str) -> Result<Option<Value>, NamespaceError> {
        Ok(self.inner.ctx.root.get(&self.path(path)).await?)
    }

    pub async fn set(
        &self,
        path: &str,
        value: Value,
        options: Option<WriteOptions>,
    ) -> Result<Link, NamespaceError> {
        let link = self
            .inner
            .ctx
            .root
            .set(&self.path(path), value.clone(), options)
            .await?;
        self.emit(NamespaceEvent::Changed {
            namespace: self.inner.name.clone(),
            path: path.to_string(),
            value,
            link,
        });
        Ok(link)
    }

    /// Add `did` and tell it about the grant
    ///
    /// Returns `false`, without sending anything, if `did` is already a
    /// member.
    pub async fn add_member(&self, did: Did) -> Result<bool, NamespaceError> {
        {
            let mut members = self.inner.members.lock();
            if members.contains(&did) {
                tracing::debug!("namespace/add_member: {} already in {}", did, self.inner.name);
                return Ok(false);
            }
            members.push(did);
        }

        let grant = json!({
            "type": GRANTED_TYPE,
            "namespace": self.inner.name,
            "owner": self.inner.owner,
        });
        let ctx = &self.inner.ctx;
        let bytes = codec::encode(
            &Payload::Document(grant),
            &ctx.identity,
            &WriteOptions::plain().signed(),
        )?;
        if !ctx.channels.send(&did, bytes).await {
            tracing::warn!(
                "namespace/add_member: could not notify {} of access to {}",
                did,
                self.inner.name
            );
        }

        self.schedule_header_update();
        self.emit(NamespaceEvent::MemberAdded {
            namespace: self.inner.name.clone(),
            member: did,
        });
        Ok(true)
    }

    /// Remove `did`
    ///
    /// Returns `false` if `did` is not a member. The owner can't be removed.
    pub fn remove_member(&self, did: &Did) -> bool {
        if *did == self.inner.owner {
            tracing::warn!("namespace/remove_member: refusing to remove owner of {}", self.inner.name);
            return false;
        }
        {
            let mut members = self.inner.members.lock();
            let before = members.len();
            members.retain(|member| member != did);
            if members.len() == before {
                return false;
            }
        }
        self.schedule_header_update();
        self.emit(NamespaceEvent::MemberRemoved {
            namespace: self.inner.name.clone(),
            member: *did,
        });
        true
    }

    /// Run `f` with exclusive access to this namespace
    ///
    /// Callers queue behind the current holder. Not re-entrant: calling
    /// `lock` or [`Namespace::update_headers`] from inside `f` deadlocks.
    pub async fn lock<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.lock.lock().await;
        f().await
    }

    /// Like [`Namespace::lock`] but fails with
    /// [`NamespaceError::LockContention`] instead of waiting
    pub async fn try_lock<F, Fut, T>(&self, f: F) -> Result<T, NamespaceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self
            .inner
            .lock
            .try_lock()
            .map_err(|_| NamespaceError::LockContention(self.inner.name.clone()))?;
        Ok(f().await)
    }

    /// Run [`Namespace::update_headers`] once the debounce window passes
    /// without another call
    ///
    /// A later call only supersedes an update that is still waiting out the
    /// window. One that has already started runs to completion.
    pub fn schedule_header_update(&self) {
        let namespace = self.clone();
        let debounce = self.inner.ctx.debounce;
        let ticket = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if namespace.inner.generation.load(Ordering::SeqCst) != ticket {
                tracing::trace!("namespace/headers: update of {} superseded", namespace.inner.name);
                return;
            }
            if let Err(e) = namespace.update_headers().await {
                tracing::warn!(
                    "namespace/headers: update of {} failed: {}",
                    namespace.inner.name,
                    e
                );
            }
        });
    }

    /// Re-encrypt the namespace sub-tree to the current members
    ///
    /// The new snapshot is pinned, the previous one released, and the
    /// snapshot link announced on the namespace topic.
    pub async fn update_headers(&self) -> Result<Link, NamespaceError> {
        let _guard = self.inner.lock.lock().await;
        let ctx = &self.inner.ctx;

        let subtree = ctx
            .root
            .get(&self.path(""))
            .await?
            .unwrap_or_else(|| json!({}));
        let members = self.members();
        let options = WriteOptions::encrypted(EncryptOptions::to(members.iter().copied()));
        let graph: &DocumentGraph = ctx.root.graph();
        let link = graph.put(&Payload::Document(subtree), &options).await?;

        let previous = self.inner.header.lock().replace(link);
        if let Some(previous) = previous.filter(|previous| *previous != link) {
            if let Err(e) = graph.dag().unpin(&previous).await {
                tracing::warn!("namespace/headers: failed to release {}: {}", previous, e);
            }
        }

        let announcement = json!({
            "type": HEADER_TYPE,
            "namespace": self.inner.name,
            "cid": link,
            "members": members,
        });
        let bytes = codec::encode(
            &Payload::Document(announcement),
            &ctx.identity,
            &WriteOptions::plain().signed(),
        )?;
        with_timeout(ctx.timeout, ctx.pubsub.publish(&self.inner.topic, bytes)).await?;

        tracing::info!(
            "namespace/headers: {} re-encrypted for {} members as {}",
            self.inner.name,
            members.len(),
            link
        );
        self.emit(NamespaceEvent::HeadersUpdated {
            namespace: self.inner.name.clone(),
            link,
            members,
        });
        Ok(link)
    }

    /// Publish `payload` on the namespace topic, signed unless `options`
    /// says otherwise
    pub async fn send(&self, payload: Value, options: Option<WriteOptions>) -> Result<(), NamespaceError> {
        let options = options.unwrap_or_else(|| WriteOptions::plain().signed());
        let ctx = &self.inner.ctx;
        let bytes = ctx
            .root
            .graph()
            .encode(&Payload::Document(payload), &options)
            .await?;
        with_timeout(ctx.timeout, ctx.pubsub.publish(&self.inner.topic, bytes)).await?;
        Ok(())
    }

    /// Deliver a decoded message that arrived on the namespace topic
    pub fn on_message(&self, message: Message) {
        self.emit(NamespaceEvent::Message {
            namespace: self.inner.name.clone(),
            message,
        });
    }

    fn emit(&self, event: NamespaceEvent) {
        self.inner.ctx.events.emit(Event::Namespace(event));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::{DagProvider, MemoryDagProvider};
    use crate::identity::{MemoryIdentityProvider, MemoryNameRegistry};
    use crate::p2p::{MemoryNetwork, MemoryP2pProvider};
    use crate::pubsub::{MemoryPubsubHub, MemoryPubsubProvider};

    const DEBOUNCE: Duration = Duration::from_secs(1);

    struct Harness {
        namespace: Namespace,
        dag: MemoryDagProvider,
        events: EventBus,
    }

    fn harness(name: &str) -> Harness {
        let identity = Arc::new(Identity::from_seed("user a"));
        let did = identity.did();
        let timeout = Duration::from_secs(5);
        let dag = MemoryDagProvider::new();
        let events = EventBus::default();
        let graph = DocumentGraph::new(Arc::new(dag.clone()), identity.clone(), timeout);
        let root = Arc::new(IdentityRoot::new(
            Arc::new(MemoryIdentityProvider::new(did, MemoryNameRegistry::new())),
            graph,
            events.clone(),
            2,
            timeout,
        ));
        let pubsub: Arc<dyn PubsubProvider> =
            Arc::new(MemoryPubsubProvider::new(did, MemoryPubsubHub::new()).unwrap());
        let channels = ChannelManager::new(
            identity.clone(),
            Arc::new(MemoryP2pProvider::new(did, MemoryNetwork::new())),
            pubsub.clone(),
            events.clone(),
            Duration::from_secs(30),
            timeout,
        );
        let ctx = NamespaceContext {
            identity,
            root,
            pubsub,
            channels,
            events: events.clone(),
            debounce: DEBOUNCE,
            timeout,
        };
        Harness {
            namespace: Namespace::new(name, None, ctx).unwrap(),
            dag,
            events,
        }
    }

    fn header_updates(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Link> {
        let mut links = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Namespace(NamespaceEvent::HeadersUpdated { link, .. }) = event {
                links.push(link);
            }
        }
        links
    }

    #[test]
    fn test_topic_depends_on_name_and_owner() {
        let a = Identity::from_seed("user a").did();
        let b = Identity::from_seed("user b").did();

        let topic = namespace_topic("chat", &a).unwrap();
        assert_eq!(topic, namespace_topic("chat", &a).unwrap());
        assert_ne!(topic, namespace_topic("chat", &b).unwrap());
        assert_ne!(topic, namespace_topic("files", &a).unwrap());
    }

    #[tokio::test]
    async fn test_set_get_under_prefix() {
        let h = harness("chat");
        let mut events = h.events.subscribe();
        h.namespace.init().await.unwrap();

        h.namespace
            .set("/rooms/general", json!({"topic": "hi"}), None)
            .await
            .unwrap();

        assert_eq!(
            h.namespace.get("/rooms/general/topic").await.unwrap(),
            Some(json!("hi"))
        );
        let root = h.namespace.inner.ctx.root.get("/").await.unwrap().unwrap();
        assert_eq!(root["chat"]["rooms"]["general"]["topic"], json!("hi"));

        let mut saw_change = false;
        while let Ok(event) = events.try_recv() {
            if let Event::Namespace(NamespaceEvent::Changed { namespace, path, .. }) = event {
                assert_eq!(namespace, "chat");
                assert_eq!(path, "/rooms/general");
                saw_change = true;
            }
        }
        assert!(saw_change);
    }

    #[tokio::test]
    async fn test_membership_is_idempotent() {
        let h = harness("chat");
        let owner = h.namespace.owner();
        let b = Identity::from_seed("user b").did();

        assert_eq!(h.namespace.members(), vec![owner]);
        assert!(h.namespace.add_member(b).await.unwrap());
        assert!(!h.namespace.add_member(b).await.unwrap());
        assert_eq!(h.namespace.members(), vec![owner, b]);

        assert!(h.namespace.remove_member(&b));
        assert!(!h.namespace.remove_member(&b));
        assert!(!h.namespace.remove_member(&owner));
        assert_eq!(h.namespace.members(), vec![owner]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_updates_are_debounced() {
        let h = harness("chat");
        let mut events = h.events.subscribe();
        h.namespace.set("/secret", json!("shh"), None).await.unwrap();

        let b = Identity::from_seed("user b");
        let c = Identity::from_seed("user c");
        h.namespace.add_member(b.did()).await.unwrap();
        tokio::time::sleep(DEBOUNCE / 2).await;
        h.namespace.add_member(c.did()).await.unwrap();
        tokio::time::sleep(DEBOUNCE / 2).await;
        assert!(header_updates(&mut events).is_empty());

        tokio::time::sleep(DEBOUNCE).await;
        let updates = header_updates(&mut events);
        assert_eq!(updates.len(), 1);
        assert_eq!(h.namespace.header(), Some(updates[0]));

        // members can read the snapshot
        let bytes = h.dag.get(&updates[0]).await.unwrap();
        let decoded = codec::decode(&bytes, Some(&c)).unwrap();
        assert_eq!(decoded.payload.as_document().unwrap()["secret"], json!("shh"));
    }

    #[tokio::test]
    async fn test_new_header_releases_previous() {
        let h = harness("chat");
        h.namespace.set("/n", json!(1), None).await.unwrap();
        let first = h.namespace.update_headers().await.unwrap();
        h.namespace.set("/n", json!(2), None).await.unwrap();
        let second = h.namespace.update_headers().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(h.dag.pin_count(&first).await.unwrap(), 0);
        assert_eq!(h.dag.pin_count(&second).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_header_update_is_not_cancelled() {
        let h = harness("chat");
        let mut events = h.events.subscribe();
        let b = Identity::from_seed("user b").did();
        let c = Identity::from_seed("user c").did();

        // hold the lock so the first update stalls once its window passes
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
        let namespace = h.namespace.clone();
        let holder = tokio::spawn(async move {
            namespace
                .lock(|| async move {
                    let _ = held_tx.send(());
                    let _ = release_rx.await;
                })
                .await
        });
        held_rx.await.unwrap();

        h.namespace.add_member(b).await.unwrap();
        tokio::time::sleep(DEBOUNCE + DEBOUNCE / 10).await;
        h.namespace.add_member(c).await.unwrap();

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;

        let updates = header_updates(&mut events);
        assert_eq!(updates.len(), 2);
        assert_eq!(h.namespace.header(), Some(updates[1]));
        assert_eq!(h.dag.pin_count(&updates[0]).await.unwrap(), 0);
        assert_eq!(h.dag.pin_count(&updates[1]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lock_runs_callers_one_at_a_time() {
        let h = harness("chat");
        let counter = Arc::new(AtomicU64::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for id in 0..2 {
            let namespace = h.namespace.clone();
            let counter = counter.clone();
            let log = log.clone();
            tasks.push(tokio::spawn(async move {
                namespace
                    .lock(|| async move {
                        log.lock().push(("start", id));
                        let read = counter.load(Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        counter.store(read + 1, Ordering::SeqCst);
                        log.lock().push(("end", id));
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let log = log.lock().clone();
        assert_eq!(log.len(), 4);
        let (first, second) = (log[0].1, log[2].1);
        assert_ne!(first, second);
        assert_eq!(
            log,
            vec![("start", first), ("end", first), ("start", second), ("end", second)]
        );
    }

    #[tokio::test]
    async fn test_try_lock_reports_contention() {
        let h = harness("chat");
        let namespace = h.namespace.clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = tokio::spawn(async move {
            namespace
                .lock(|| async move {
                    let _ = held_tx.send(());
                    let _ = rx.await;
                })
                .await
        });
        held_rx.await.unwrap();

        let err = h.namespace.try_lock(|| async {}).await.unwrap_err();
        assert!(matches!(err, NamespaceError::LockContention(name) if name == "chat"));

        tx.send(()).unwrap();
        holder.await.unwrap();
        assert_eq!(h.namespace.try_lock(|| async { 7 }).await.unwrap(), 7);
    }
}
