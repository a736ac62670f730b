//! Typed event bus
//!
//! Components never reach into shared state to notify each other. The
//! orchestrator owns one [`EventBus`] and hands clones of it to the root,
//! namespaces and the channel manager, which emit onto it. Consumers call
//! [`EventBus::subscribe`] and receive every event emitted after that point.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::codec::DecodedEnvelope;
use crate::identity::Did;
use crate::linked_data::Link;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// An inbound message, already decoded and verified
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic it arrived on, `None` for direct transport messages
    pub topic: Option<String>,
    pub from: Did,
    pub payload: DecodedEnvelope,
}

impl Message {
    /// `type` field of a document payload, if there is one
    pub fn kind(&self) -> Option<&str> {
        self.payload
            .payload
            .as_document()
            .and_then(|doc| doc.get("type"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub enum NamespaceEvent {
    Changed {
        namespace: String,
        path: String,
        value: Value,
        link: Link,
    },
    MemberAdded {
        namespace: String,
        member: Did,
    },
    MemberRemoved {
        namespace: String,
        member: Did,
    },
    HeadersUpdated {
        namespace: String,
        link: Link,
        members: Vec<Did>,
    },
    /// Another identity granted us access to one of its namespaces
    Granted {
        namespace: String,
        owner: Did,
    },
    Message {
        namespace: String,
        message: Message,
    },
}

impl NamespaceEvent {
    pub fn namespace(&self) -> &str {
        match self {
            NamespaceEvent::Changed { namespace, .. }
            | NamespaceEvent::MemberAdded { namespace, .. }
            | NamespaceEvent::MemberRemoved { namespace, .. }
            | NamespaceEvent::HeadersUpdated { namespace, .. }
            | NamespaceEvent::Granted { namespace, .. }
            | NamespaceEvent::Message { namespace, .. } => namespace,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// Providers are started and the event pumps are running
    Ready,
    /// The root document was replaced; `value` is the whole new document
    Changed { path: String, value: Value },
    Message(Message),
    PeerConnected(Did),
    /// Transport dropped; the peer is kept for the grace window
    PeerDisconnected(Did),
    /// Grace window elapsed or the peer was disconnected explicitly
    PeerRemoved(Did),
    Namespace(NamespaceEvent),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: Event) {
        // no subscribers is not an error
        if self.sender.send(event).is_err() {
            tracing::trace!("events: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}
