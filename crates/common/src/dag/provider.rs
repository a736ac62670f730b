use async_trait::async_trait;
use bytes::Bytes;

use crate::linked_data::{Link, JSON_CODEC};
use crate::provider::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Take a pin on the stored block
    pub pin: bool,
    /// Multicodec recorded in the returned link
    pub codec: u64,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            pin: true,
            codec: JSON_CODEC,
        }
    }
}

/// Content-addressed block storage
///
/// Pins are reference counted per link: every `pin` (including the one
/// taken by `put` with `pin: true`) must be matched by an `unpin` before the
/// block becomes eligible for garbage collection. A reader can therefore
/// hold its own pin on a block while a writer releases another.
#[async_trait]
pub trait DagProvider: Send + Sync + std::fmt::Debug + 'static {
    async fn start(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Fetch a block
    ///
    /// Fails with [`ProviderError::NotFound`] if the block is not available.
    async fn get(&self, link: &Link) -> Result<Bytes, ProviderError>;

    /// Store a block and return its link
    async fn put(&self, data: Vec<u8>, options: PutOptions) -> Result<Link, ProviderError>;

    async fn has(&self, link: &Link) -> Result<bool, ProviderError>;

    /// Add a reference to `link`
    async fn pin(&self, link: &Link) -> Result<(), ProviderError>;

    /// Drop a reference to `link`
    ///
    /// Fails with [`ProviderError::NotFound`] if `link` holds no pins.
    async fn unpin(&self, link: &Link) -> Result<(), ProviderError>;

    /// Number of outstanding pins on `link`
    async fn pin_count(&self, link: &Link) -> Result<usize, ProviderError>;
}
