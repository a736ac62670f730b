use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::Did;
use crate::linked_data::Link;

/// Topic prefix a relay node listens on, followed by its own DID
pub const SYNC_TOPIC_PREFIX: &str = "sync/";
/// `type` of the replies a relay sends back
pub const SYNC_REPLY_TYPE: &str = "sync-reply";

pub fn sync_topic(did: &Did) -> String {
    format!("{}{}", SYNC_TOPIC_PREFIX, did)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncKind {
    SyncInit,
    SyncPut,
    Pin,
}

/// Request on a relay's sync topic
///
/// `data` is interpreted according to `type`, see [`SyncMessage::body`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: SyncKind,
    pub data: Value,
    /// Correlation id, echoed in the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncInit {
    pub did: Did,
    #[serde(default)]
    pub pins: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPut {
    pub payload: Value,
    /// Additional recipient of the stored copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Did>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncBody {
    Init(SyncInit),
    Put(SyncPut),
    Pin(Link),
}

impl SyncMessage {
    fn new(kind: SyncKind, data: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            data: serde_json::to_value(data)?,
            request: None,
        })
    }

    pub fn init(did: Did, pins: Vec<Link>) -> Result<Self, serde_json::Error> {
        Self::new(SyncKind::SyncInit, SyncInit { did, pins })
    }

    pub fn put(payload: Value, to: Option<Did>) -> Result<Self, serde_json::Error> {
        Self::new(SyncKind::SyncPut, SyncPut { payload, to })
    }

    pub fn pin(link: Link) -> Result<Self, serde_json::Error> {
        Self::new(SyncKind::Pin, link)
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    pub fn body(&self) -> Result<SyncBody, serde_json::Error> {
        let data = self.data.clone();
        Ok(match self.kind {
            SyncKind::SyncInit => SyncBody::Init(serde_json::from_value(data)?),
            SyncKind::SyncPut => SyncBody::Put(serde_json::from_value(data)?),
            SyncKind::Pin => SyncBody::Pin(serde_json::from_value(data)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReply {
    pub fn ok(request: Option<String>, cid: Option<Link>) -> Self {
        Self {
            kind: SYNC_REPLY_TYPE.to_string(),
            success: true,
            request,
            cid,
            error: None,
        }
    }

    pub fn failed(request: Option<String>, error: impl ToString) -> Self {
        Self {
            kind: SYNC_REPLY_TYPE.to_string(),
            success: false,
            request,
            cid: None,
            error: Some(error.to_string()),
        }
    }
}
