use async_trait::async_trait;

use super::Did;
use crate::linked_data::Link;
use crate::provider::ProviderError;

/// Where root pointers live
///
/// Maps this node's identity to the [`Link`] of its latest root document,
/// e.g. a mutable name record on the network. Implementations only publish
/// and resolve the pointer; releasing the previous root's pin is left to the
/// caller since it owns the DAG.
#[async_trait]
pub trait IdentityProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Identity whose pointer this provider manages
    fn id(&self) -> Did;

    async fn start(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Current root pointer
    ///
    /// # Returns
    /// * `Ok(Some(link))` - The latest published root
    /// * `Ok(None)` - Nothing has been published for this identity yet
    async fn resolve(&self) -> Result<Option<Link>, ProviderError>;

    /// Publish `link` as the new root pointer, superseding the last one
    async fn set(&self, link: &Link) -> Result<(), ProviderError>;
}
