//! IPFS image reference

use super::destination::IpfsImageDestination;
use super::source::IpfsImageSource;
use super::{IPFS_TRANSPORT_NAME, ImageDestination, ImageReference, ImageSource};
use crate::cas::{ContentId, ContentStore};
use crate::error::{GantryError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Location of an image in content-addressed storage.
///
/// Holds a root identifier when pulling; holds none when pushing, in which
/// case the identifier is assigned by the push.
#[derive(Clone)]
pub struct IpfsReference {
    store: Arc<dyn ContentStore>,
    id: Option<ContentId>,
}

impl IpfsReference {
    /// Reference to an existing image, for pulling
    pub fn existing(store: Arc<dyn ContentStore>, id: ContentId) -> Self {
        Self { store, id: Some(id) }
    }

    /// Reference for a new image, for pushing
    pub fn new_image(store: Arc<dyn ContentStore>) -> Self {
        Self { store, id: None }
    }

    pub fn id(&self) -> Option<&ContentId> {
        self.id.as_ref()
    }
}

impl std::fmt::Debug for IpfsReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpfsReference").field("id", &self.id).finish()
    }
}

#[async_trait]
impl ImageReference for IpfsReference {
    fn transport_name(&self) -> &'static str {
        IPFS_TRANSPORT_NAME
    }

    fn string_within_transport(&self) -> String {
        self.id.as_ref().map(ContentId::to_string).unwrap_or_default()
    }

    // Content addressing carries no repository names to match policy against
    fn policy_configuration_identity(&self) -> String {
        String::new()
    }

    fn policy_configuration_namespaces(&self) -> Vec<String> {
        Vec::new()
    }

    async fn new_image_source(&self) -> Result<Box<dyn ImageSource>> {
        debug!("Initializing IPFS source");
        let id = self.id.clone().ok_or_else(|| {
            GantryError::Validation("IPFS source needs a content identifier".to_string())
        })?;
        let source = IpfsImageSource::open(self.store.clone(), id).await?;
        Ok(Box::new(source))
    }

    async fn new_image_destination(&self) -> Result<Box<dyn ImageDestination>> {
        debug!("Initializing IPFS destination");
        Ok(Box::new(IpfsImageDestination::new(self.store.clone())))
    }

    async fn delete_image(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::MemoryContentStore;
    use bytes::Bytes;

    #[test]
    fn test_policy_identity_is_empty() {
        let reference = IpfsReference::new_image(Arc::new(MemoryContentStore::new()));
        assert_eq!(reference.transport_name(), "ipfs");
        assert_eq!(reference.policy_configuration_identity(), "");
        assert!(reference.policy_configuration_namespaces().is_empty());
        assert_eq!(reference.string_within_transport(), "");
    }

    #[tokio::test]
    async fn test_source_fetches_manifest_eagerly() {
        let store = Arc::new(MemoryContentStore::new());
        let missing = IpfsReference::existing(store.clone(), ContentId::parse("sha256-nothing").unwrap());
        assert!(missing.new_image_source().await.is_err());

        let manifest = Bytes::from_static(br#"{"schemaVersion":2}"#);
        let id = store.put(manifest.clone()).await.unwrap();
        let reference = IpfsReference::existing(store, id.clone());
        assert_eq!(reference.string_within_transport(), id.to_string());

        let source = reference.new_image_source().await.unwrap();
        let (bytes, _) = source.get_manifest(None).await.unwrap();
        assert_eq!(bytes, manifest);
    }

    #[tokio::test]
    async fn test_push_reference_cannot_be_read() {
        let reference = IpfsReference::new_image(Arc::new(MemoryContentStore::new()));
        assert!(reference.new_image_source().await.is_err());
        assert!(reference.new_image_destination().await.is_ok());
        assert!(reference.delete_image().await.is_ok());
    }
}
