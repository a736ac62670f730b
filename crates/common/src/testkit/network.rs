use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::IridiumConfig;
use crate::dag::MemoryDagProvider;
use crate::identity::{Identity, MemoryIdentityProvider, MemoryNameRegistry};
use crate::iridium::Iridium;
use crate::p2p::{MemoryNetwork, MemoryP2pProvider, PeerKind};
use crate::pubsub::{MemoryPubsubHub, MemoryPubsubProvider};

/// A set of in-memory nodes sharing one swarm, one pubsub mesh, one block
/// store and one name registry
pub struct TestNetwork {
    config: IridiumConfig,
    registry: MemoryNameRegistry,
    dag: MemoryDagProvider,
    network: MemoryNetwork,
    hub: MemoryPubsubHub,
    nodes: HashMap<String, Iridium>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(IridiumConfig::default())
    }

    /// Every node added afterwards starts with `config`
    pub fn with_config(config: IridiumConfig) -> Self {
        Self {
            config,
            registry: MemoryNameRegistry::new(),
            dag: MemoryDagProvider::new(),
            network: MemoryNetwork::new(),
            hub: MemoryPubsubHub::new(),
            nodes: HashMap::new(),
        }
    }

    /// Add and start a node whose identity is derived from `name`
    pub async fn add_node(&mut self, name: &str) -> Result<Iridium> {
        self.spawn(name, false, self.config.clone()).await
    }

    /// Add and start a node that serves sync requests
    pub async fn add_relay(&mut self, name: &str) -> Result<Iridium> {
        self.spawn(name, true, self.config.clone()).await
    }

    /// Add and start a node with its own config
    pub async fn add_node_with(&mut self, name: &str, config: IridiumConfig) -> Result<Iridium> {
        self.spawn(name, false, config).await
    }

    async fn spawn(&mut self, name: &str, relay: bool, config: IridiumConfig) -> Result<Iridium> {
        if self.nodes.contains_key(name) {
            return Err(anyhow::anyhow!("node '{}' already exists", name));
        }
        let identity = Identity::from_seed(name);
        let did = identity.did();
        let node = Iridium::builder()
            .identity(identity)
            .config(config)
            .identity_provider(Arc::new(MemoryIdentityProvider::new(
                did,
                self.registry.clone(),
            )))
            .dag(Arc::new(self.dag.clone()))
            .p2p(Arc::new(MemoryP2pProvider::new(did, self.network.clone())))
            .pubsub(Arc::new(MemoryPubsubProvider::new(did, self.hub.clone())?))
            .relay(relay)
            .build()?;
        node.start().await?;
        tracing::debug!("testkit: started {} as {}", name, did);
        self.nodes.insert(name.to_string(), node.clone());
        Ok(node)
    }

    pub fn node(&self, name: &str) -> Option<&Iridium> {
        self.nodes.get(name)
    }

    pub fn dag(&self) -> &MemoryDagProvider {
        &self.dag
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Connect `a` to `b` and wait until both ends have their channel
    pub async fn connect(&self, a: &str, b: &str, kind: PeerKind) -> Result<()> {
        let (node_a, node_b) = match (self.node(a), self.node(b)) {
            (Some(node_a), Some(node_b)) => (node_a.clone(), node_b.clone()),
            _ => return Err(anyhow::anyhow!("unknown node {} or {}", a, b)),
        };
        node_a.connect(node_b.did(), kind).await?;
        self.eventually(Duration::from_secs(5), || {
            let node_b = node_b.clone();
            let a_did = node_a.did();
            async move { Ok(node_b.channels().channel(&a_did).is_some()) }
        })
        .await
    }

    pub async fn remove_node(&mut self, name: &str) -> Result<()> {
        if let Some(node) = self.nodes.remove(name) {
            node.stop().await?;
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        for (name, node) in self.nodes.drain() {
            if let Err(e) = node.stop().await {
                tracing::error!("testkit: error stopping {}: {}", name, e);
            }
        }
        Ok(())
    }

    /// Poll `condition` until it returns `Ok(true)` or `timeout` passes
    ///
    /// Errors from `condition` are treated as "not yet".
    pub async fn eventually<F, Fut>(&self, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let start = tokio::time::Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            match condition().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::debug!("testkit: condition not met yet: {}", e),
            }
            if start.elapsed() > timeout {
                return Err(anyhow::anyhow!("condition not met within {:?}", timeout));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
