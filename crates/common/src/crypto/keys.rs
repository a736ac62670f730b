use std::ops::Deref;

use curve25519_dalek::edwards::CompressedEdwardsY;
use iroh::{PublicKey as PPublicKey, SecretKey as SSecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Size of Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of an X25519 shared secret in bytes
pub const SHARED_SECRET_SIZE: usize = 32;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Public half of an identity keypair
///
/// Wraps Iroh's `PublicKey` (Ed25519). The same key verifies signed envelopes,
/// receives wrapped content keys, and names the peer on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Copy)]
pub struct PublicKey(PPublicKey);

impl Deref for PublicKey {
    type Target = PPublicKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<PPublicKey> for PublicKey {
    fn from(key: PPublicKey) -> Self {
        PublicKey(key)
    }
}

impl From<PublicKey> for PPublicKey {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}

impl TryFrom<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Result<Self, Self::Error> {
        let key = PPublicKey::from_bytes(&bytes)
            .map_err(|_| anyhow::anyhow!("public key is not a valid ed25519 point"))?;
        Ok(PublicKey(key))
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Self::try_from(buff)
    }
}

impl PublicKey {
    /// Parse a public key from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        Self::try_from(buff)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Map the Edwards point onto the Montgomery curve for X25519
    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_x25519(&self) -> Result<X25519PublicKey, KeyError> {
        let edwards_bytes = self.to_bytes();
        let edwards_point = CompressedEdwardsY::from_slice(&edwards_bytes)
            .map_err(|_| anyhow::anyhow!("public key invalid edwards point"))?
            .decompress()
            .ok_or_else(|| anyhow::anyhow!("public key failed to decompress edwards point"))?;

        Ok(X25519PublicKey::from(edwards_point.to_montgomery().to_bytes()))
    }

    /// Verify a detached Ed25519 signature over `msg`
    pub fn verify(
        &self,
        msg: &[u8],
        signature: &ed25519_dalek::Signature,
    ) -> Result<(), ed25519_dalek::SignatureError> {
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&self.to_bytes())?;
        verifying_key.verify_strict(msg, signature)
    }
}

/// Private half of an identity keypair
///
/// Identities are derived once at startup, usually from seed material
/// ([`SecretKey::from_seed`]), and never change for the life of the process.
#[derive(Debug, Clone)]
pub struct SecretKey(pub SSecretKey);

impl From<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    fn from(secret: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self(SSecretKey::from_bytes(&secret))
    }
}

impl Deref for SecretKey {
    type Target = SSecretKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SecretKey {
    /// Derive a keypair deterministically from seed material.
    ///
    /// The SHA-256 digest of the seed is used as the Ed25519 secret, so the
    /// same seed always yields the same identity.
    pub fn from_seed(seed: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(seed.as_ref());
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        bytes.copy_from_slice(&digest);
        Self::from(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("private key hex decode error"))?;
        Ok(Self::from(buff))
    }

    /// Generate a random secret key from the system RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
        Self::from(bytes)
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public())
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// The Ed25519 scalar doubles as the X25519 private key
    pub(crate) fn to_x25519(&self) -> StaticSecret {
        StaticSecret::from(self.0.secret().to_scalar_bytes())
    }

    /// Raw X25519 shared secret between this key and a remote public key.
    ///
    /// Symmetric: `a.shared_secret(&b.public()) == b.shared_secret(&a.public())`.
    pub fn shared_secret(&self, remote: &PublicKey) -> Result<[u8; SHARED_SECRET_SIZE], KeyError> {
        let shared = self.to_x25519().diffie_hellman(&remote.to_x25519()?);
        Ok(*shared.as_bytes())
    }

    /// Public key of the keypair seeded by the ECDH secret shared with `remote`.
    ///
    /// Both parties arrive at the same key without exchanging anything, so it
    /// can name a private channel between them.
    pub fn channel_key(&self, remote: &PublicKey) -> Result<PublicKey, KeyError> {
        let shared = self.shared_secret(remote)?;
        Ok(SecretKey::from(shared).public())
    }

    pub fn sign(&self, msg: &[u8]) -> ed25519_dalek::Signature {
        // iroh pins its own ed25519_dalek; the 64 byte encoding is shared
        let sig = self.0.sign(msg);
        ed25519_dalek::Signature::from_bytes(&sig.to_bytes())
    }
}
