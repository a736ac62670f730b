//! Per-recipient key wrapping using ECDH + AES Key Wrap
//!
//! An encrypted envelope carries one [`SecretShare`] per recipient. Each share
//! wraps the envelope's content [`Secret`] so that only the holder of the
//! recipient's private key can unwrap it.
//!
//! To wrap a secret for a recipient:
//! 1. Generate an ephemeral Ed25519 keypair
//! 2. Convert both keys to X25519 and compute the shared secret
//! 3. Wrap the content secret with AES-KW, using the shared secret as the KEK
//! 4. Package the ephemeral public key and the wrapped secret together
//!
//! The recipient reverses this with their private key and the ephemeral public
//! key read out of the share. AES-KW authenticates the wrapped key, so a share
//! addressed to someone else fails to unwrap instead of yielding garbage.

use std::convert::TryFrom;
use std::fmt;

use aes_kw::KekAes256 as Kek;
use serde::{Deserialize, Serialize};

use super::keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SecretError, SECRET_SIZE};

/// Size of the AES Key Wrap integrity block in bytes
pub const KW_NONCE_SIZE: usize = 8;
/// Total size of a share in bytes
///
/// Layout: ephemeral_pubkey (32) || wrapped_secret (40) = 72 bytes
pub const SECRET_SHARE_SIZE: usize = PUBLIC_KEY_SIZE + SECRET_SIZE + KW_NONCE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum SecretShareError {
    #[error("share error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

/// A content secret wrapped for exactly one recipient
///
/// # Wire Format
///
/// ```text
/// [ ephemeral_pubkey: 32 bytes ][ wrapped_secret: 40 bytes ]
/// ```
///
/// Serialized as a hex string, since shares live inside JSON envelopes.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct SecretShare(pub(crate) [u8; SECRET_SHARE_SIZE]);

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretShare({})", self.to_hex())
    }
}

impl Serialize for SecretShare {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SecretShare {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        SecretShare::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

impl Default for SecretShare {
    fn default() -> Self {
        SecretShare([0; SECRET_SHARE_SIZE])
    }
}

impl From<[u8; SECRET_SHARE_SIZE]> for SecretShare {
    fn from(bytes: [u8; SECRET_SHARE_SIZE]) -> Self {
        SecretShare(bytes)
    }
}

impl TryFrom<&[u8]> for SecretShare {
    type Error = SecretShareError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != SECRET_SHARE_SIZE {
            return Err(anyhow::anyhow!(
                "invalid share size, expected {}, got {}",
                SECRET_SHARE_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut share = SecretShare::default();
        share.0.copy_from_slice(bytes);
        Ok(share)
    }
}

impl SecretShare {
    /// Parse a share from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, SecretShareError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; SECRET_SHARE_SIZE];
        hex::decode_to_slice(hex, &mut buff).map_err(|_| anyhow::anyhow!("hex decode error"))?;
        Ok(SecretShare::from(buff))
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Wrap `secret` so that only `recipient` can recover it
    pub fn new(secret: &Secret, recipient: &PublicKey) -> Result<Self, SecretShareError> {
        let ephemeral_private = SecretKey::generate();
        let ephemeral_public = ephemeral_private.public();

        let shared_secret = ephemeral_private
            .to_x25519()
            .diffie_hellman(&recipient.to_x25519()?);

        let kek = Kek::from(*shared_secret.as_bytes());
        let wrapped = kek
            .wrap_vec(secret.bytes())
            .map_err(|_| anyhow::anyhow!("AES-KW wrap error"))?;

        let ephemeral_bytes = ephemeral_public.to_bytes();
        if ephemeral_bytes.len() + wrapped.len() != SECRET_SHARE_SIZE {
            return Err(anyhow::anyhow!("expected share size is incorrect").into());
        };

        let mut share = SecretShare::default();
        share.0[..PUBLIC_KEY_SIZE].copy_from_slice(&ephemeral_bytes);
        share.0[PUBLIC_KEY_SIZE..].copy_from_slice(&wrapped);

        Ok(share)
    }

    /// Recover the wrapped secret using the recipient's private key
    ///
    /// Fails if the share was made for a different recipient or has been
    /// tampered with.
    pub fn recover(&self, recipient_secret: &SecretKey) -> Result<Secret, SecretShareError> {
        let ephemeral_public = PublicKey::try_from(&self.0[..PUBLIC_KEY_SIZE])?;

        let shared_secret = recipient_secret
            .to_x25519()
            .diffie_hellman(&ephemeral_public.to_x25519()?);

        let kek = Kek::from(*shared_secret.as_bytes());
        let unwrapped = kek
            .unwrap_vec(&self.0[PUBLIC_KEY_SIZE..])
            .map_err(|_| anyhow::anyhow!("AES-KW unwrap error"))?;

        Ok(Secret::from_slice(&unwrapped)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_share_secret() {
        let secret = Secret::from_slice(&[42u8; SECRET_SIZE]).unwrap();
        let private_key = SecretKey::generate();
        let share = SecretShare::new(&secret, &private_key.public()).unwrap();
        assert_eq!(secret, share.recover(&private_key).unwrap());
    }

    #[test]
    fn test_share_different_keys() {
        let secret = Secret::generate();
        let alice = SecretKey::from_seed("alice");
        let bob = SecretKey::from_seed("bob");

        let share = SecretShare::new(&secret, &alice.public()).unwrap();
        assert_eq!(secret, share.recover(&alice).unwrap());
        assert!(share.recover(&bob).is_err());
    }

    #[test]
    fn test_share_serde_json_roundtrip() {
        let secret = Secret::generate();
        let private_key = SecretKey::generate();
        let share = SecretShare::new(&secret, &private_key.public()).unwrap();

        let json = serde_json::to_string(&share).unwrap();
        assert_eq!(json, format!("\"{}\"", share.to_hex()));

        let recovered_share: SecretShare = serde_json::from_str(&json).unwrap();
        assert_eq!(share, recovered_share);
        assert_eq!(secret, recovered_share.recover(&private_key).unwrap());
    }

    #[test]
    fn test_share_deserialize_invalid_length() {
        let short = format!("\"{}\"", hex::encode([0u8; SECRET_SHARE_SIZE - 1]));
        assert!(serde_json::from_str::<SecretShare>(&short).is_err());

        let long = format!("\"{}\"", hex::encode([0u8; SECRET_SHARE_SIZE + 1]));
        assert!(serde_json::from_str::<SecretShare>(&long).is_err());
    }

    #[test]
    fn test_share_tampered() {
        let secret = Secret::generate();
        let private_key = SecretKey::generate();
        let mut share = SecretShare::new(&secret, &private_key.public()).unwrap();
        share.0[SECRET_SHARE_SIZE - 1] ^= 0x01;
        assert!(share.recover(&private_key).is_err());
    }
}
