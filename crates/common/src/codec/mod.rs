//! Payload envelopes
//!
//! Everything written to the document graph or sent over the wire is an
//! [`Envelope`]: plaintext (`raw`/`json`), signed (`jws`), encrypted (`jwe`)
//! or a link to a payload stored in the graph (`dag`).
//!
//! [`encode`] applies signing first and encryption second, so a signed and
//! encrypted payload hides its signer from everyone but the recipients.
//! [`decode`] always verifies signatures and always needs the reader's keys
//! for encrypted envelopes; there is no way to peek at either without them.

mod envelope;
mod jwe;
mod jws;
mod options;

pub use envelope::{Envelope, ENVELOPE_TAGS};
pub use jwe::{Jwe, JweHeader, JweRecipient, JWE_ALG, JWE_ENC};
pub use jws::{Jws, JwsHeader, JWS_ALG};
pub use options::{EncryptOptions, WriteOptions};

use serde_json::Value;

use crate::crypto::{SecretError, SecretShareError};
use crate::identity::{Did, Identity};
use crate::linked_data::Link;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("encrypted payload must have at least one recipient")]
    EmptyRecipients,
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("share error: {0}")]
    Share(#[from] SecretShareError),
}

/// Plaintext body of an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Document(Value),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn as_document(&self) -> Option<&Value> {
        match self {
            Payload::Document(value) => Some(value),
            Payload::Bytes(_) => None,
        }
    }

    pub fn into_document(self) -> Option<Value> {
        match self {
            Payload::Document(value) => Some(value),
            Payload::Bytes(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Document(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(bytes.to_vec())
    }
}

/// Outermost protection an envelope arrived with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Json,
    Jws,
    Jwe,
    Dag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEnvelope {
    pub encoding: Encoding,
    pub payload: Payload,
    /// Verified signer, if the payload was signed
    pub signer: Option<Did>,
    /// Set for `dag` envelopes; the payload then lives in the graph and
    /// `payload` only carries the link as a string
    pub link: Option<Link>,
}

impl DecodedEnvelope {
    fn plain(encoding: Encoding, payload: Payload) -> Self {
        Self {
            encoding,
            payload,
            signer: None,
            link: None,
        }
    }

    /// Empty JSON document, what a missing block loads as
    pub fn empty() -> Self {
        Self::plain(Encoding::Json, Payload::Document(Value::Object(Default::default())))
    }
}

/// Wrap `payload` according to `options`
///
/// `options.link` is not handled here; linking needs the document graph,
/// see [`DocumentGraph::encode`](crate::dag::DocumentGraph::encode).
pub fn seal(
    payload: &Payload,
    writer: &Identity,
    options: &WriteOptions,
) -> Result<Envelope, CodecError> {
    let mut envelope = match payload {
        Payload::Document(value) => Envelope::Json(value.clone()),
        Payload::Bytes(bytes) => Envelope::Raw(bytes.clone()),
    };

    if options.sign {
        envelope = Envelope::Jws(Jws::sign(writer, serde_json::to_value(&envelope)?)?);
    }

    if let Some(encrypt) = &options.encrypt {
        let recipients = encrypt.resolve(writer.did())?;
        envelope = Envelope::Jwe(Jwe::encrypt(
            &envelope.to_bytes()?,
            envelope.tag(),
            &recipients,
        )?);
    }

    Ok(envelope)
}

pub fn encode(
    payload: &Payload,
    writer: &Identity,
    options: &WriteOptions,
) -> Result<Vec<u8>, CodecError> {
    seal(payload, writer, options)?.to_bytes()
}

/// Envelope pointing at a payload stored in the graph
pub fn encode_link(link: &Link) -> Result<Vec<u8>, CodecError> {
    Envelope::Dag(*link).to_bytes()
}

pub fn decode(bytes: &[u8], reader: Option<&Identity>) -> Result<DecodedEnvelope, CodecError> {
    open(Envelope::from_bytes(bytes)?, reader)
}

pub fn open(envelope: Envelope, reader: Option<&Identity>) -> Result<DecodedEnvelope, CodecError> {
    match envelope {
        Envelope::Raw(bytes) => Ok(DecodedEnvelope::plain(Encoding::Raw, Payload::Bytes(bytes))),
        Envelope::Json(value) => Ok(DecodedEnvelope::plain(
            Encoding::Json,
            Payload::Document(value),
        )),
        Envelope::Dag(link) => Ok(DecodedEnvelope {
            encoding: Encoding::Dag,
            payload: Payload::Document(Value::String(link.to_string())),
            signer: None,
            link: Some(link),
        }),
        Envelope::Jws(jws) => {
            let inner = Envelope::from_value(jws.verify()?.clone())?;
            if !matches!(inner, Envelope::Raw(_) | Envelope::Json(_)) {
                return Err(CodecError::UnsupportedEncoding(format!(
                    "{} inside jws",
                    inner.tag()
                )));
            }
            let decoded = open(inner, reader)?;
            Ok(DecodedEnvelope {
                encoding: Encoding::Jws,
                payload: decoded.payload,
                signer: Some(jws.signer()),
                link: None,
            })
        }
        Envelope::Jwe(jwe) => {
            let reader = reader
                .ok_or_else(|| CodecError::DecryptionFailed("no reader identity".to_string()))?;
            let inner = Envelope::from_bytes(&jwe.decrypt(reader)?)?;
            if matches!(inner, Envelope::Jwe(_) | Envelope::Dag(_)) {
                return Err(CodecError::UnsupportedEncoding(format!(
                    "{} inside jwe",
                    inner.tag()
                )));
            }
            let decoded = open(inner, Some(reader))?;
            Ok(DecodedEnvelope {
                encoding: Encoding::Jwe,
                payload: decoded.payload,
                signer: decoded.signer,
                link: None,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn profile() -> Payload {
        Payload::Document(json!({
            "name": "John Doe",
            "friends": ["did:key:z6MkAlice", "did:key:z6MkBob"],
        }))
    }

    #[test]
    fn test_plain_roundtrip() {
        let alice = Identity::from_seed("user a");

        let bytes = encode(&profile(), &alice, &WriteOptions::plain()).unwrap();
        let decoded = decode(&bytes, None).unwrap();
        assert_eq!(decoded.encoding, Encoding::Json);
        assert_eq!(decoded.payload, profile());

        let raw = Payload::Bytes(b"\x00\x01binary".to_vec());
        let decoded = decode(&encode(&raw, &alice, &WriteOptions::plain()).unwrap(), None).unwrap();
        assert_eq!(decoded.encoding, Encoding::Raw);
        assert_eq!(decoded.payload, raw);
    }

    #[test]
    fn test_signed_roundtrip() {
        let alice = Identity::from_seed("user a");
        let bytes = encode(&profile(), &alice, &WriteOptions::plain().signed()).unwrap();

        let decoded = decode(&bytes, None).unwrap();
        assert_eq!(decoded.encoding, Encoding::Jws);
        assert_eq!(decoded.signer, Some(alice.did()));
        assert_eq!(decoded.payload, profile());
    }

    #[test]
    fn test_encrypted_roundtrip_and_isolation() {
        let alice = Identity::from_seed("user a");
        let bob = Identity::from_seed("user b");
        let bytes = encode(&profile(), &alice, &WriteOptions::encrypted_to_self()).unwrap();

        let decoded = decode(&bytes, Some(&alice)).unwrap();
        assert_eq!(decoded.encoding, Encoding::Jwe);
        assert_eq!(decoded.payload, profile());

        assert!(matches!(
            decode(&bytes, Some(&bob)),
            Err(CodecError::DecryptionFailed(_))
        ));
        assert!(matches!(
            decode(&bytes, None),
            Err(CodecError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_signed_and_encrypted() {
        let alice = Identity::from_seed("user a");
        let bob = Identity::from_seed("user b");
        let options = WriteOptions::encrypted(EncryptOptions::to([bob.did()])).signed();
        let bytes = encode(&profile(), &alice, &options).unwrap();

        let decoded = decode(&bytes, Some(&bob)).unwrap();
        assert_eq!(decoded.encoding, Encoding::Jwe);
        assert_eq!(decoded.signer, Some(alice.did()));
        assert_eq!(decoded.payload, profile());
    }

    #[test]
    fn test_forged_signature_is_distinguishable() {
        let alice = Identity::from_seed("user a");
        let envelope = seal(&profile(), &alice, &WriteOptions::plain().signed()).unwrap();
        let Envelope::Jws(mut jws) = envelope else {
            panic!("expected jws");
        };
        jws.payload = json!({"type": "json", "body": {"name": "Mallory"}});

        let bytes = Envelope::Jws(jws).to_bytes().unwrap();
        assert!(matches!(
            decode(&bytes, Some(&alice)),
            Err(CodecError::InvalidSignature)
        ));
    }

    #[test]
    fn test_explicitly_empty_recipients() {
        let alice = Identity::from_seed("user a");
        let options = WriteOptions::encrypted(EncryptOptions::only([]));
        assert!(matches!(
            encode(&profile(), &alice, &options),
            Err(CodecError::EmptyRecipients)
        ));
    }

    #[test]
    fn test_link_envelope() {
        let link = Link::for_bytes(crate::linked_data::JSON_CODEC, b"{}").unwrap();
        let decoded = decode(&encode_link(&link).unwrap(), None).unwrap();
        assert_eq!(decoded.encoding, Encoding::Dag);
        assert_eq!(decoded.link, Some(link));
    }
}
