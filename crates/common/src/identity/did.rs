use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, PUBLIC_KEY_SIZE};

/// Method prefix for key-derived identifiers
pub const DID_KEY_PREFIX: &str = "did:key:z";
/// Multicodec varint for an Ed25519 public key
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

#[derive(Debug, thiserror::Error)]
pub enum DidError {
    #[error("unsupported did method: {0}")]
    UnsupportedMethod(String),
    #[error("invalid base58 in did: {0}")]
    Base58(#[from] bs58::decode::Error),
    #[error("did does not carry an ed25519 public key")]
    InvalidKey,
}

/// Self-certifying identifier derived from an Ed25519 public key
///
/// Renders as `did:key:z<base58btc(0xed 0x01 || public_key)>`. Since the
/// public key is recoverable from the identifier, a `Did` is enough to verify
/// a signature from, or encrypt to, its holder.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(PublicKey);

impl Did {
    pub fn public_key(&self) -> &PublicKey {
        &self.0
    }

    /// Transport-level peer identifier, the base58 encoding of the raw key
    pub fn peer_id(&self) -> String {
        bs58::encode(self.0.to_bytes()).into_string()
    }
}

impl From<PublicKey> for Did {
    fn from(key: PublicKey) -> Self {
        Did(key)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = Vec::with_capacity(ED25519_MULTICODEC.len() + PUBLIC_KEY_SIZE);
        bytes.extend_from_slice(&ED25519_MULTICODEC);
        bytes.extend_from_slice(&self.0.to_bytes());
        write!(f, "{}{}", DID_KEY_PREFIX, bs58::encode(bytes).into_string())
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self)
    }
}

impl FromStr for Did {
    type Err = DidError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // tolerate a key fragment, e.g. `did:key:z6Mk...#z6Mk...`
        let s = s.split('#').next().unwrap_or(s);
        let encoded = s
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or_else(|| DidError::UnsupportedMethod(s.to_string()))?;
        let bytes = bs58::decode(encoded).into_vec()?;
        let key = bytes
            .strip_prefix(&ED25519_MULTICODEC[..])
            .ok_or(DidError::InvalidKey)?;
        let key = PublicKey::try_from(key).map_err(|_| DidError::InvalidKey)?;
        Ok(Did(key))
    }
}

impl TryFrom<String> for Did {
    type Error = DidError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.to_string()
    }
}
