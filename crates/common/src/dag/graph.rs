use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};

use super::provider::{DagProvider, PutOptions};
use crate::codec::{self, CodecError, DecodedEnvelope, Payload, WriteOptions};
use crate::identity::Identity;
use crate::linked_data::{Link, JSON_CODEC};
use crate::provider::{with_timeout, ProviderError};

/// Reserved document field mapping local keys to child links
pub const LINKS_FIELD: &str = "links";

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Levels of `links` to expand, zero returns the document shallow
    pub depth: usize,
    /// Overrides the graph's provider timeout
    pub timeout: Option<Duration>,
}

impl LoadOptions {
    pub fn depth(depth: usize) -> Self {
        Self {
            depth,
            timeout: None,
        }
    }
}

/// Content-addressed documents on top of a [`DagProvider`]
///
/// Every block is an encoded envelope. Reads decrypt and verify as this
/// node's identity.
#[derive(Debug, Clone)]
pub struct DocumentGraph {
    dag: Arc<dyn DagProvider>,
    identity: Arc<Identity>,
    timeout: Duration,
}

impl DocumentGraph {
    pub fn new(dag: Arc<dyn DagProvider>, identity: Arc<Identity>, timeout: Duration) -> Self {
        Self {
            dag,
            identity,
            timeout,
        }
    }

    pub fn dag(&self) -> &Arc<dyn DagProvider> {
        &self.dag
    }

    /// Encode `payload` and store it, returning its link
    pub async fn put(&self, payload: &Payload, options: &WriteOptions) -> Result<Link, GraphError> {
        let bytes = codec::encode(payload, &self.identity, options)?;
        let put = PutOptions {
            pin: options.pin,
            codec: JSON_CODEC,
        };
        let timeout = options.timeout.unwrap_or(self.timeout);
        let link = with_timeout(timeout, self.dag.put(bytes, put)).await?;
        tracing::debug!(
            "graph/put: stored {} (encrypted: {}, signed: {}, pinned: {})",
            link,
            options.encrypt.is_some(),
            options.sign,
            options.pin
        );
        Ok(link)
    }

    /// Encode `payload` for the wire
    ///
    /// With `options.link` the payload is stored in the graph first and only
    /// its link is sent.
    pub async fn encode(&self, payload: &Payload, options: &WriteOptions) -> Result<Vec<u8>, GraphError> {
        if options.link {
            let link = self.put(payload, options).await?;
            return Ok(codec::encode_link(&link)?);
        }
        Ok(codec::encode(payload, &self.identity, options)?)
    }

    /// Load and decode the block at `link`
    ///
    /// A missing block loads as an empty document. Decryption and signature
    /// failures are returned as errors. A `dag` envelope is followed once;
    /// one that points at another `dag` envelope is rejected. If
    /// `options.depth > 0` the document's `links` are expanded, see
    /// [`DocumentGraph::expand`].
    pub async fn get(&self, link: &Link, options: LoadOptions) -> Result<DecodedEnvelope, GraphError> {
        self.get_boxed(*link, options, true).await
    }

    /// Convenience over [`DocumentGraph::get`] that returns just the document
    ///
    /// Raw payloads come back as a JSON string of their hex encoding.
    pub async fn load(&self, link: &Link, options: LoadOptions) -> Result<Value, GraphError> {
        Ok(match self.get(link, options).await?.payload {
            Payload::Document(value) => value,
            Payload::Bytes(bytes) => Value::String(hex::encode(bytes)),
        })
    }

    fn get_boxed(
        &self,
        link: Link,
        options: LoadOptions,
        follow_link: bool,
    ) -> BoxFuture<'_, Result<DecodedEnvelope, GraphError>> {
        async move {
            let timeout = options.timeout.unwrap_or(self.timeout);
            let bytes = match with_timeout(timeout, self.dag.get(&link)).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => {
                    tracing::debug!("graph/get: {} not found, loading as empty document", link);
                    return Ok(DecodedEnvelope::empty());
                }
                Err(e) => return Err(e.into()),
            };

            let mut decoded = codec::decode(&bytes, Some(&self.identity))?;

            // a stored link envelope points at the real payload
            if let Some(target) = decoded.link {
                if !follow_link {
                    return Err(CodecError::UnsupportedEncoding(format!(
                        "dag envelope {} points at another dag envelope",
                        link
                    ))
                    .into());
                }
                tracing::debug!("graph/get: {} links to {}", link, target);
                return self.get_boxed(target, options, false).await;
            }

            if options.depth > 0 {
                if let Payload::Document(document) = decoded.payload {
                    decoded.payload = Payload::Document(self.expand(document, options).await);
                }
            }
            Ok(decoded)
        }
        .boxed()
    }

    /// Replace each entry of the document's `links` map with the loaded
    /// child, itself expanded one level less, then drop the `links` field.
    ///
    /// Links that fail to parse or load are logged and skipped. Depth only
    /// ever decreases, so cyclic links terminate.
    pub fn expand(&self, document: Value, options: LoadOptions) -> BoxFuture<'_, Value> {
        async move {
            let Value::Object(mut object) = document else {
                return document;
            };
            if options.depth == 0 {
                return Value::Object(object);
            }
            let Some(Value::Object(links)) = object.remove(LINKS_FIELD) else {
                return Value::Object(object);
            };

            let child_options = LoadOptions {
                depth: options.depth - 1,
                ..options
            };
            for (key, target) in links {
                let Some(link) = target.as_str().and_then(|s| s.parse::<Link>().ok()) else {
                    tracing::warn!("graph/expand: skipping link {}, not a valid link: {}", key, target);
                    continue;
                };
                match self.get_boxed(link, child_options, true).await {
                    Ok(child) => match child.payload {
                        Payload::Document(value) => {
                            object.insert(key, value);
                        }
                        Payload::Bytes(_) => {
                            tracing::warn!("graph/expand: skipping link {}, {} is not a document", key, link);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("graph/expand: skipping link {} to {}: {}", key, link, e);
                    }
                }
            }
            Value::Object(object)
        }
        .boxed()
    }
}

/// Build a document whose `links` point at `children`
pub fn with_links(mut document: Map<String, Value>, children: &[(&str, Link)]) -> Value {
    let links: Map<String, Value> = children
        .iter()
        .map(|(key, link)| (key.to_string(), Value::String(link.to_string())))
        .collect();
    document.insert(LINKS_FIELD.to_string(), Value::Object(links));
    Value::Object(document)
}
