/**
 * Payload envelopes.
 *  - Plaintext, signed, encrypted and linked
 *  - Encode and decode against an identity
 */
pub mod codec;
/**
 * Node configuration, loaded from TOML.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - Key-to-key key sharing
 */
pub mod crypto;
/**
 * Content-addressed document storage.
 *  Block store contract, its in-memory and
 *  iroh-blobs backends, and the document graph
 *  with depth-bounded link expansion.
 */
pub mod dag;
pub mod events;
/**
 * Identities, DIDs and the root pointer
 *  provider contract.
 */
pub mod identity;
/**
 * The node façade composing everything below
 *  behind one handle.
 */
pub mod iridium;
/**
 * Content identifiers over BLAKE3, shared
 *  with iroh-blobs hashes.
 */
pub mod linked_data;
pub mod namespace;
/**
 * Transport contract and the manager for
 *  private peer channels.
 */
pub mod p2p;
pub mod provider;
pub mod pubsub;
/**
 * The identity's mutable root document.
 */
pub mod root;
pub mod sync;
pub mod testkit;

pub mod prelude {
    pub use crate::codec::{EncryptOptions, Payload, WriteOptions};
    pub use crate::config::IridiumConfig;
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::events::{Event, NamespaceEvent};
    pub use crate::identity::{Did, Identity};
    pub use crate::iridium::{Iridium, IridiumBuilder, IridiumError};
    pub use crate::linked_data::{Cid, Link};
    pub use crate::namespace::Namespace;
    pub use crate::p2p::PeerKind;
}
