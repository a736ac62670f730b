//! Node identity
//!
//! An [`Identity`] is an Ed25519 keypair plus the [`Did`] derived from its
//! public half. It is created once at startup, usually from seed material,
//! and shared read-only by every component for the life of the process.

mod did;
mod memory;
mod provider;

pub use did::{Did, DidError, DID_KEY_PREFIX};
pub use memory::{MemoryIdentityProvider, MemoryNameRegistry};
pub use provider::IdentityProvider;

use crate::crypto::{KeyError, PublicKey, SecretKey, Signature};

/// Topic prefix for private peer-to-peer channels
pub const CHANNEL_TOPIC_PREFIX: &str = "peer/";

#[derive(Debug, Clone)]
pub struct Identity {
    secret_key: SecretKey,
    did: Did,
}

impl From<SecretKey> for Identity {
    fn from(secret_key: SecretKey) -> Self {
        let did = Did::from(secret_key.public());
        Self { secret_key, did }
    }
}

impl Identity {
    /// Derive an identity from seed material (SHA-256 of the seed bytes)
    pub fn from_seed(seed: impl AsRef<[u8]>) -> Self {
        Self::from(SecretKey::from_seed(seed))
    }

    pub fn generate() -> Self {
        Self::from(SecretKey::generate())
    }

    pub fn did(&self) -> Did {
        self.did
    }

    pub fn public_key(&self) -> PublicKey {
        *self.did.public_key()
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.secret_key.sign(msg)
    }

    /// Name of the private channel between this identity and `remote`
    ///
    /// The ECDH secret of the two identity keys seeds a keypair whose public
    /// key, base58 encoded, names the topic. Both sides compute the same name
    /// and nobody else can. The name is static for a given pair.
    pub fn channel_topic(&self, remote: &Did) -> Result<String, KeyError> {
        let key = self.secret_key.channel_key(remote.public_key())?;
        Ok(format!(
            "{}{}",
            CHANNEL_TOPIC_PREFIX,
            bs58::encode(key.to_bytes()).into_string()
        ))
    }
}
