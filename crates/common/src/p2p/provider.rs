use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::identity::Did;
use crate::provider::ProviderError;

/// What the transport tells us about remote peers
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Discovered(Did),
    Connected(Did),
    Disconnected(Did),
    /// A direct message sent with [`P2pProvider::send`]
    Message { from: Did, data: Bytes },
}

/// Address book entry for a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub did: Did,
    pub addresses: Vec<String>,
    pub connected: bool,
}

/// Transport-level peer management
#[async_trait]
pub trait P2pProvider: Send + Sync + std::fmt::Debug + 'static {
    async fn start(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn listen_addresses(&self) -> Vec<String>;

    /// Dial `to`. A [`TransportEvent::Connected`] follows on success.
    async fn connect(&self, to: &Did) -> Result<(), ProviderError>;

    async fn disconnect(&self, from: &Did) -> Result<(), ProviderError>;

    /// Send bytes to a connected peer
    async fn send(&self, to: &Did, data: Vec<u8>) -> Result<(), ProviderError>;

    /// Record addresses for `peer` so it can be dialed later
    async fn add_peer(&self, peer: Did, addresses: Vec<String>) -> Result<(), ProviderError>;

    async fn has_peer(&self, id: &Did) -> Result<bool, ProviderError>;

    async fn get_peer(&self, id: &Did) -> Result<Option<PeerInfo>, ProviderError>;

    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}
