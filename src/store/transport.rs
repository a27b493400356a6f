//! Local store as an image source and destination

use super::{LocalStore, StoredImage};
use crate::blob::BlobStream;
use crate::digest::DigestUtils;
use crate::error::{GantryError, Result};
use crate::manifest::{
    DOCKER_V2_SCHEMA2_MEDIA_TYPE, Descriptor, ImageManifest, OCI_MANIFEST_MEDIA_TYPE, guess_media_type,
};
use crate::transport::{ImageDestination, ImageSource, LayerCompression};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Reads a committed image out of the local store
pub struct StoreImageSource {
    store: LocalStore,
    image: StoredImage,
    manifest: Bytes,
    manifest_type: String,
}

impl StoreImageSource {
    pub fn open(store: LocalStore, image: StoredImage) -> Result<Self> {
        let manifest = Bytes::from(store.read_manifest(&image)?);
        let manifest_type = guess_media_type(&manifest);
        Ok(Self {
            store,
            image,
            manifest,
            manifest_type,
        })
    }

    pub fn image(&self) -> &StoredImage {
        &self.image
    }
}

#[async_trait]
impl ImageSource for StoreImageSource {
    fn reference(&self) -> String {
        match self.image.names.first() {
            Some(name) => format!("{} ({})", name, self.image.short_id()),
            None => self.image.short_id().to_string(),
        }
    }

    async fn get_manifest(&self, instance: Option<&str>) -> Result<(Bytes, String)> {
        if let Some(instance) = instance {
            return Err(GantryError::UnsupportedInstance(instance.to_string()));
        }
        Ok((self.manifest.clone(), self.manifest_type.clone()))
    }

    async fn get_blob(&self, info: &Descriptor) -> Result<BlobStream> {
        let data = self.store.read_blob(&info.digest)?;
        Ok(BlobStream::from_bytes(Bytes::from(data)))
    }

    fn has_thread_safe_get_blob(&self) -> bool {
        true
    }

    async fn get_signatures(&self, _instance: Option<&str>) -> Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    async fn layer_infos_for_copy(&self) -> Result<Option<Vec<Descriptor>>> {
        Ok(None)
    }
}

/// Writes an image into the local store; the image becomes visible on commit
pub struct StoreImageDestination {
    store: LocalStore,
    name: Option<String>,
    manifest: Option<Vec<u8>>,
    committed: Option<StoredImage>,
}

impl StoreImageDestination {
    pub fn new(store: LocalStore, name: Option<String>) -> Self {
        Self {
            store,
            name,
            manifest: None,
            committed: None,
        }
    }

    pub fn committed(&self) -> Option<&StoredImage> {
        self.committed.as_ref()
    }

    fn stored_descriptor(mut info: Descriptor, size: u64) -> Descriptor {
        info.size = size;
        if !info.is_foreign_layer() {
            info.urls.clear();
        }
        info
    }
}

#[async_trait]
impl ImageDestination for StoreImageDestination {
    fn reference(&self) -> String {
        self.name.clone().unwrap_or_default()
    }

    fn supported_manifest_mime_types(&self) -> Vec<String> {
        vec![
            DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string(),
            OCI_MANIFEST_MEDIA_TYPE.to_string(),
        ]
    }

    fn supports_signatures(&self) -> Result<()> {
        Err(GantryError::Unsupported(
            "the local store does not keep signatures".to_string(),
        ))
    }

    fn desired_layer_compression(&self) -> LayerCompression {
        LayerCompression::PreserveOriginal
    }

    fn accepts_foreign_layer_urls(&self) -> bool {
        false
    }

    fn must_match_runtime_os(&self) -> bool {
        true
    }

    fn ignores_embedded_docker_reference(&self) -> bool {
        true
    }

    fn has_thread_safe_put_blob(&self) -> bool {
        true
    }

    async fn put_blob(&mut self, stream: BlobStream, info: Descriptor, _is_config: bool) -> Result<Descriptor> {
        let data = stream.into_bytes().await?;
        let digest = if info.digest.is_empty() {
            DigestUtils::compute_docker_digest(&data)
        } else {
            info.digest.clone()
        };
        self.store.write_blob(&digest, &data)?;
        debug!("Stored blob {}", DigestUtils::format_digest_short(&digest));

        let size = data.len() as u64;
        Ok(Self::stored_descriptor(Descriptor { digest, ..info }, size))
    }

    async fn try_reusing_blob(&mut self, info: &Descriptor) -> Result<Option<Descriptor>> {
        match self.store.blob_size(&info.digest) {
            Some(size) if info.size == 0 || size == info.size => {
                Ok(Some(Self::stored_descriptor(info.clone(), size)))
            }
            _ => Ok(None),
        }
    }

    async fn put_manifest(&mut self, manifest: &[u8]) -> Result<()> {
        ImageManifest::from_bytes(manifest)?;
        self.manifest = Some(manifest.to_vec());
        Ok(())
    }

    async fn put_signatures(&mut self, signatures: &[Vec<u8>]) -> Result<()> {
        if signatures.is_empty() {
            return Ok(());
        }
        self.supports_signatures()
    }

    async fn commit(&mut self) -> Result<()> {
        let manifest = self
            .manifest
            .as_deref()
            .ok_or_else(|| GantryError::Validation("commit called before a manifest was written".to_string()))?;
        let image = self.store.commit_image(self.name.as_deref(), manifest)?;
        self.committed = Some(image);
        Ok(())
    }

    fn published_reference(&self) -> Option<String> {
        self.committed.as_ref().map(|image| image.id.clone())
    }
}
