//! The identity's mutable root document
//!
//! The root pointer maps this identity to the link of its latest document.
//! [`IdentityRoot`] resolves that pointer through the [`IdentityProvider`],
//! loads the document through the [`DocumentGraph`] and keeps the resolved
//! document cached. All reads and writes go through one async mutex, so a
//! `set` never observes a half-swapped cache and concurrent `set` calls are
//! applied one after the other.
//!
//! There is no arbitration between processes publishing for the same
//! identity: the last publish wins.

mod path;

pub use path::{deep_get, deep_set, segments, PathError};

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::codec::{Payload, WriteOptions};
use crate::dag::{DocumentGraph, GraphError, LoadOptions};
use crate::events::{Event, EventBus};
use crate::identity::{Did, IdentityProvider};
use crate::linked_data::Link;
use crate::provider::{with_timeout, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum RootError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("root document does not match the requested type: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("invalid path: {0}")]
    Path(#[from] PathError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootState {
    #[default]
    Unresolved,
    Resolving,
    Cached,
    /// Invalidated, the next read resolves again
    Stale,
}

#[derive(Debug, Default)]
struct RootInner {
    state: RootState,
    link: Option<Link>,
    document: Option<Value>,
}

impl RootInner {
    fn clear(&mut self, state: RootState) {
        self.state = state;
        self.link = None;
        self.document = None;
    }
}

#[derive(Debug)]
pub struct IdentityRoot {
    identity: Arc<dyn IdentityProvider>,
    graph: DocumentGraph,
    events: EventBus,
    depth: usize,
    timeout: Duration,
    inner: Mutex<RootInner>,
}

impl IdentityRoot {
    /// # Arguments
    /// * `depth` - link expansion depth used when loading the root
    /// * `timeout` - deadline for each identity provider call
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        graph: DocumentGraph,
        events: EventBus,
        depth: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            identity,
            graph,
            events,
            depth,
            timeout,
            inner: Mutex::new(RootInner::default()),
        }
    }

    pub fn graph(&self) -> &DocumentGraph {
        &self.graph
    }

    pub fn did(&self) -> Did {
        self.identity.id()
    }

    pub async fn state(&self) -> RootState {
        self.inner.lock().await.state
    }

    /// Link of the cached root, without resolving
    pub async fn link(&self) -> Option<Link> {
        self.inner.lock().await.link
    }

    /// Resolve the root pointer and load the document behind it
    ///
    /// Returns immediately from cache unless `force` is set. `None` means
    /// nothing has been published for this identity yet; the root then
    /// reads as an empty document.
    pub async fn resolve(&self, force: bool) -> Result<Option<Link>, RootError> {
        let mut inner = self.inner.lock().await;
        self.resolve_locked(&mut inner, force).await?;
        Ok(inner.link)
    }

    /// Drop the cache, the next read resolves from the provider
    pub async fn invalidate(&self) {
        self.inner.lock().await.clear(RootState::Stale);
    }

    pub async fn get(&self, path: &str) -> Result<Option<Value>, RootError> {
        self.get_with(path, false).await
    }

    /// Read `path`, re-resolving first when `nocache` is set
    pub async fn get_with(&self, path: &str, nocache: bool) -> Result<Option<Value>, RootError> {
        let mut inner = self.inner.lock().await;
        self.resolve_locked(&mut inner, nocache).await?;
        Ok(inner
            .document
            .as_ref()
            .and_then(|document| deep_get(document, path))
            .cloned())
    }

    /// The whole root document as `T`
    pub async fn document<T: DeserializeOwned>(&self) -> Result<T, RootError> {
        let document = self.get("/").await?.unwrap_or_else(|| json!({}));
        Ok(serde_json::from_value(document)?)
    }

    /// Write `value` at `path` and publish the new root
    ///
    /// `options` defaults to encrypting to this identity only. The previous
    /// root's pin is released after a successful publish; failing to
    /// release it is logged and ignored.
    pub async fn set(
        &self,
        path: &str,
        value: Value,
        options: Option<WriteOptions>,
    ) -> Result<Link, RootError> {
        let mut inner = self.inner.lock().await;
        self.resolve_locked(&mut inner, false).await?;

        let mut next = inner.document.clone().unwrap_or_else(|| json!({}));
        deep_set(&mut next, path, value)?;

        let options = options.unwrap_or_else(WriteOptions::encrypted_to_self);
        let link = self
            .graph
            .put(&Payload::Document(next.clone()), &options)
            .await?;

        if let Err(e) = with_timeout(self.timeout, self.identity.set(&link)).await {
            if options.pin {
                self.release(&link).await;
            }
            return Err(e.into());
        }
        tracing::info!("root/set: published {} for {}", link, self.identity.id());

        if let Some(previous) = inner.link {
            self.release(&previous).await;
        }

        inner.link = Some(link);
        inner.document = Some(next.clone());
        inner.state = RootState::Cached;

        self.events.emit(Event::Changed {
            path: path.to_string(),
            value: next,
        });
        Ok(link)
    }

    async fn release(&self, link: &Link) {
        if let Err(e) = self.graph.dag().unpin(link).await {
            tracing::warn!("root/set: failed to release pin on {}: {}", link, e);
        }
    }

    async fn resolve_locked(&self, inner: &mut RootInner, force: bool) -> Result<(), RootError> {
        if inner.state == RootState::Cached && !force {
            return Ok(());
        }

        inner.state = RootState::Resolving;
        match self.fetch().await {
            Ok((link, document)) => {
                inner.link = link;
                inner.document = Some(document);
                inner.state = RootState::Cached;
                Ok(())
            }
            Err(e) => {
                inner.clear(RootState::Unresolved);
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<(Option<Link>, Value), RootError> {
        let Some(link) = with_timeout(self.timeout, self.identity.resolve()).await? else {
            tracing::debug!("root/resolve: no root published for {}", self.identity.id());
            return Ok((None, json!({})));
        };
        tracing::debug!("root/resolve: {} resolved to {}", self.identity.id(), link);

        // hold a lease so a concurrent release can't collect the root mid-read
        let dag = self.graph.dag();
        let leased = match dag.pin(&link).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("root/resolve: no lease on {}: {}", link, e);
                false
            }
        };

        let loaded = self
            .graph
            .load(
                &link,
                LoadOptions {
                    depth: self.depth,
                    timeout: Some(self.timeout),
                },
            )
            .await;

        if leased {
            if let Err(e) = dag.unpin(&link).await {
                tracing::warn!("root/resolve: failed to drop lease on {}: {}", link, e);
            }
        }
        Ok((Some(link), loaded?))
    }
}
