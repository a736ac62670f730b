//! Topic-based broadcast messaging contract and its in-memory implementation

mod memory;
mod provider;

pub use memory::{MemoryPubsubHub, MemoryPubsubProvider};
pub use provider::{PubsubMessage, PubsubProvider};
