//! IPFS image source

use super::ImageSource;
use crate::blob::BlobStream;
use crate::cas::{ContentId, ContentStore};
use crate::error::{GantryError, Result};
use crate::manifest::{Descriptor, guess_media_type};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Read-only view of an image stored in IPFS.
///
/// The manifest is fetched once when the source is opened; blobs are fetched
/// on every request using the content identifier recorded in their descriptor.
pub struct IpfsImageSource {
    store: Arc<dyn ContentStore>,
    root: ContentId,
    manifest: Bytes,
    manifest_type: String,
}

impl IpfsImageSource {
    pub async fn open(store: Arc<dyn ContentStore>, root: ContentId) -> Result<Self> {
        let manifest = store.get(&root).await?.into_bytes().await?;
        let manifest_type = guess_media_type(&manifest);
        debug!(cid = %root, media_type = %manifest_type, "Fetched manifest");

        Ok(Self {
            store,
            root,
            manifest,
            manifest_type,
        })
    }

    pub fn root(&self) -> &ContentId {
        &self.root
    }
}

#[async_trait]
impl ImageSource for IpfsImageSource {
    fn reference(&self) -> String {
        format!("ipfs:{}", self.root)
    }

    async fn get_manifest(&self, instance: Option<&str>) -> Result<(Bytes, String)> {
        if let Some(instance) = instance {
            return Err(GantryError::UnsupportedInstance(instance.to_string()));
        }
        Ok((self.manifest.clone(), self.manifest_type.clone()))
    }

    async fn get_blob(&self, info: &Descriptor) -> Result<BlobStream> {
        let raw = info.urls.first().ok_or_else(|| GantryError::MissingLocation {
            digest: info.digest.clone(),
        })?;
        let id = ContentId::parse(raw)?;

        debug!("Fetching blob for {}", info.digest);
        self.store.get(&id).await
    }

    fn has_thread_safe_get_blob(&self) -> bool {
        true
    }

    async fn get_signatures(&self, instance: Option<&str>) -> Result<Vec<Vec<u8>>> {
        if let Some(instance) = instance {
            return Err(GantryError::UnsupportedInstance(instance.to_string()));
        }
        Ok(Vec::new())
    }

    async fn layer_infos_for_copy(&self) -> Result<Option<Vec<Descriptor>>> {
        Ok(None)
    }
}
