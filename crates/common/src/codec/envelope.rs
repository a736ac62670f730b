use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::jwe::Jwe;
use super::jws::Jws;
use super::CodecError;
use crate::linked_data::Link;

/// Tags this codec knows how to open
pub const ENVELOPE_TAGS: [&str; 5] = ["raw", "json", "jws", "jwe", "dag"];

/// Wire form of every stored block and every message
///
/// Serialized as JSON `{"type": <tag>, "body": <body>}`. Signed and encrypted
/// envelopes carry another envelope inside them, so a payload that is both
/// signed and encrypted is a `jwe` whose plaintext is a `jws`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "lowercase")]
pub enum Envelope {
    Raw(#[serde(with = "hex_bytes")] Vec<u8>),
    Json(Value),
    Jws(Jws),
    Jwe(Jwe),
    /// Payload lives in the document graph under this link
    Dag(Link),
}

impl Envelope {
    pub fn tag(&self) -> &'static str {
        match self {
            Envelope::Raw(_) => "raw",
            Envelope::Json(_) => "json",
            Envelope::Jws(_) => "jws",
            Envelope::Jwe(_) => "jwe",
            Envelope::Dag(_) => "dag",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Parse an envelope, rejecting unknown tags before looking at the body
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("(unknown)");
        if !ENVELOPE_TAGS.contains(&tag) {
            return Err(CodecError::UnsupportedEncoding(tag.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
