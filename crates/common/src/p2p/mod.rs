//! Peer lifecycle and private peer channels
//!
//! [`P2pProvider`] is the transport contract. [`ChannelManager`] sits on top
//! of it: when a transport connection comes up it derives the channel topic
//! both ends share (see [`Identity::channel_topic`](crate::identity::Identity::channel_topic)),
//! subscribes to it and from then on addresses the peer through that topic.
//! A dropped connection keeps the channel for a grace window so network
//! flaps don't churn subscriptions.

mod channels;
mod memory;
mod provider;

pub use channels::{ChannelManager, PeerKind, PeerRecord, PeerState};
pub use memory::{MemoryNetwork, MemoryP2pProvider};
pub use provider::{P2pProvider, PeerInfo, TransportEvent};

use crate::codec::CodecError;
use crate::crypto::KeyError;
use crate::provider::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum P2pError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("channel key error: {0}")]
    Key(#[from] KeyError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
