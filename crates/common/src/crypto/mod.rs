//! Cryptographic primitives for Iridium
//!
//! - **Identity**: Ed25519 keypairs (`SecretKey`/`PublicKey`), derived from seed
//!   material at startup
//! - **Encryption**: ChaCha20-Poly1305 content keys, one fresh `Secret` per
//!   encrypted envelope
//! - **Key Sharing**: ECDH over the identity keys (converted to X25519) plus
//!   AES-KW, packaged as one `SecretShare` per recipient
//!
//! The same ECDH construction, run directly between two identity keys, names
//! the private pubsub channel between two peers (see [`SecretKey::channel_key`]).

mod keys;
mod secret;
mod secret_share;

pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
pub use secret::{Secret, SecretError};
pub use secret_share::{SecretShare, SecretShareError};
