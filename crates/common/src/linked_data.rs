//! Content addressing
//!
//! Every stored block is addressed by a [`Link`]: a CIDv1 whose multihash is
//! the BLAKE3 digest of the encoded block. BLAKE3 is also what iroh-blobs
//! hashes with, so a `Link` converts losslessly to and from an
//! [`iroh_blobs::Hash`] and the same bytes get the same address on every DAG
//! backend.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use iroh_blobs::Hash;
use multihash::Multihash;
use serde::{Deserialize, Serialize};

pub use cid::Cid;

/// Multihash code for BLAKE3-256
pub const BLAKE3_HASH_CODE: u64 = 0x1e;
/// Multicodec code for JSON blocks (all envelopes are JSON)
pub const JSON_CODEC: u64 = 0x0200;
/// Multicodec code for raw blocks
pub const RAW_CODEC: u64 = 0x55;

const HASH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum LinkedDataError {
    #[error("cid error: {0}")]
    Cid(#[from] cid::Error),
    #[error("multihash error: {0}")]
    Multihash(#[from] multihash::Error),
    #[error("unsupported multihash code {0:#x}, expected blake3")]
    UnsupportedHash(u64),
}

/// Content address of a block
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link(Cid);

impl Deref for Link {
    type Target = Cid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Link> for Cid {
    fn from(link: Link) -> Self {
        link.0
    }
}

impl TryFrom<Cid> for Link {
    type Error = LinkedDataError;
    fn try_from(cid: Cid) -> Result<Self, Self::Error> {
        let code = cid.hash().code();
        if code != BLAKE3_HASH_CODE || cid.hash().digest().len() != HASH_SIZE {
            return Err(LinkedDataError::UnsupportedHash(code));
        }
        Ok(Link(cid))
    }
}

impl Link {
    /// Address a blob already hashed by iroh-blobs
    pub fn new(codec: u64, hash: Hash) -> Result<Self, LinkedDataError> {
        let mh = Multihash::<64>::wrap(BLAKE3_HASH_CODE, hash.as_bytes())?;
        Ok(Link(Cid::new_v1(codec, mh)))
    }

    /// Hash `data` and address it under `codec`
    pub fn for_bytes(codec: u64, data: &[u8]) -> Result<Self, LinkedDataError> {
        Self::new(codec, Hash::new(data))
    }

    pub fn codec(&self) -> u64 {
        self.0.codec()
    }

    /// The iroh-blobs hash this link addresses
    pub fn hash(&self) -> Hash {
        let mut bytes = [0u8; HASH_SIZE];
        // length is checked on every constructor
        bytes.copy_from_slice(self.0.hash().digest());
        Hash::from_bytes(bytes)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({})", self.0)
    }
}

impl FromStr for Link {
    type Err = LinkedDataError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Link::try_from(Cid::try_from(s)?)
    }
}

impl Serialize for Link {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Link::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_link_matches_blobs_hash() {
        let data = b"{\"type\":\"json\",\"body\":{}}";
        let link = Link::for_bytes(JSON_CODEC, data).unwrap();

        assert_eq!(link.hash(), Hash::new(data));
        assert_eq!(link.codec(), JSON_CODEC);
        assert_eq!(link.hash().as_bytes(), blake3::hash(data).as_bytes());
    }

    #[test]
    fn test_link_string_roundtrip() {
        let link = Link::for_bytes(RAW_CODEC, b"hello").unwrap();
        let parsed: Link = link.to_string().parse().unwrap();
        assert_eq!(link, parsed);

        let json = serde_json::to_string(&link).unwrap();
        assert_eq!(json, format!("\"{}\"", link));
        assert_eq!(serde_json::from_str::<Link>(&json).unwrap(), link);
    }

    #[test]
    fn test_rejects_other_hashes() {
        let sha = Multihash::<64>::wrap(0x12, &[7u8; 32]).unwrap();
        let cid = Cid::new_v1(JSON_CODEC, sha);
        assert!(matches!(
            Link::try_from(cid),
            Err(LinkedDataError::UnsupportedHash(0x12))
        ));
        assert!("not a cid".parse::<Link>().is_err());
    }
}
