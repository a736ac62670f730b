//! Content encryption using ChaCha20-Poly1305
//!
//! Every encrypted envelope gets its own freshly generated [`Secret`]. The
//! secret itself never travels in the clear; it is wrapped once per recipient
//! with a [`SecretShare`](super::SecretShare).

use std::ops::Deref;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    /// Authentication failed: wrong key, wrong associated data, or tampering
    #[error("ciphertext failed authentication")]
    Authentication,
}

/// A 256-bit symmetric content key
///
/// Ciphertext layout is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
/// Associated data passed to [`Secret::encrypt`] must be supplied unchanged to
/// [`Secret::decrypt`]; the envelope uses it to bind the recipient list.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Secret([u8; SECRET_SIZE]);

impl Deref for Secret {
    type Target = [u8; SECRET_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    pub fn generate() -> Self {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.bytes()))
    }

    /// Encrypt `data` under a random nonce, authenticating `aad` alongside it
    pub fn encrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| anyhow::anyhow!("failed to generate nonce: {}", e))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, Payload { msg: data, aad })
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_ref());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(anyhow::anyhow!("ciphertext too short").into());
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| SecretError::Authentication)
    }
}
