//! Content-addressed document storage
//!
//! [`DagProvider`] is the raw block store contract, implemented in memory
//! ([`MemoryDagProvider`]) and over iroh-blobs ([`BlobsDagProvider`]).
//! [`DocumentGraph`] layers envelopes and link expansion on top of it.

mod blobs;
mod graph;
mod memory;
mod provider;

pub use blobs::{BlobsDagProvider, BlobsStore, BlobsStoreError};
pub use graph::{with_links, DocumentGraph, GraphError, LoadOptions, LINKS_FIELD};
pub use memory::MemoryDagProvider;
pub use provider::{DagProvider, PutOptions};
