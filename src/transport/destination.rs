//! IPFS image destination
//!
//! Blobs are uploaded as they arrive. The blob flagged as config is remembered
//! in a per-destination [`ConfigSlot`]; when the manifest arrives its config
//! descriptor is pointed at that upload before the manifest itself is uploaded.
//! The manifest's identifier is the root identifier of the pushed image.

use super::config_slot::ConfigSlot;
use super::{ImageDestination, LayerCompression};
use crate::blob::BlobStream;
use crate::cas::{ContentId, ContentStore};
use crate::error::{GantryError, Result};
use crate::manifest::{Descriptor, ImageManifest, SINGLE_IMAGE_MANIFEST_MIME_TYPES};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Where a push stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPhase {
    NotStarted,
    BlobsUploading,
    ConfigRecorded,
    /// Manifest points at the config upload but is not itself uploaded yet
    ManifestRewritten,
    Published,
}

/// Write view of IPFS for one push
pub struct IpfsImageDestination {
    store: Arc<dyn ContentStore>,
    config: ConfigSlot,
    phase: PushPhase,
    root: Option<ContentId>,
}

impl IpfsImageDestination {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            config: ConfigSlot::new(),
            phase: PushPhase::NotStarted,
            root: None,
        }
    }

    pub fn phase(&self) -> PushPhase {
        self.phase
    }

    /// Root identifier of the published manifest
    pub fn root(&self) -> Option<&ContentId> {
        self.root.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.root {
            Some(root) => Err(GantryError::AlreadyPublished(root.to_string())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ImageDestination for IpfsImageDestination {
    fn reference(&self) -> String {
        match &self.root {
            Some(root) => format!("ipfs:{}", root),
            None => "ipfs:".to_string(),
        }
    }

    fn supported_manifest_mime_types(&self) -> Vec<String> {
        SINGLE_IMAGE_MANIFEST_MIME_TYPES
            .iter()
            .map(|mt| mt.to_string())
            .collect()
    }

    fn supports_signatures(&self) -> Result<()> {
        Err(GantryError::Unsupported(
            "signatures are not stored in IPFS".to_string(),
        ))
    }

    fn desired_layer_compression(&self) -> LayerCompression {
        LayerCompression::PreserveOriginal
    }

    fn accepts_foreign_layer_urls(&self) -> bool {
        true
    }

    fn must_match_runtime_os(&self) -> bool {
        false
    }

    fn ignores_embedded_docker_reference(&self) -> bool {
        false
    }

    // The config slot is shared by every blob of the push
    fn has_thread_safe_put_blob(&self) -> bool {
        false
    }

    async fn put_blob(&mut self, stream: BlobStream, mut info: Descriptor, is_config: bool) -> Result<Descriptor> {
        self.ensure_open()?;
        if self.phase == PushPhase::NotStarted {
            self.phase = PushPhase::BlobsUploading;
        }

        let data = stream.into_bytes().await?;
        let size = data.len() as u64;
        let addr = self.store.put(data).await?;

        if is_config {
            debug!("Setting config cid {} for {}", addr, info.digest);
            self.config.record(addr.clone(), &info.digest);
            self.phase = PushPhase::ConfigRecorded;
        }

        if info.size == 0 {
            info.size = size;
        }
        info.urls = vec![addr.to_string()];
        Ok(info)
    }

    async fn put_manifest(&mut self, manifest: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let mut parsed = ImageManifest::from_bytes(manifest)?;
        let config_addr = self.config.resolve_for(&parsed.config.digest)?;
        parsed.config.urls = vec![config_addr.to_string()];
        let rewritten = parsed.to_bytes()?;
        self.phase = PushPhase::ManifestRewritten;

        let root = self.store.put(Bytes::from(rewritten)).await?;
        debug!(cid = %root, "Published manifest");
        self.root = Some(root);
        self.phase = PushPhase::Published;
        Ok(())
    }

    async fn put_signatures(&mut self, signatures: &[Vec<u8>]) -> Result<()> {
        if signatures.is_empty() {
            return Ok(());
        }
        self.supports_signatures()
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn published_reference(&self) -> Option<String> {
        self.root.as_ref().map(ContentId::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::MemoryContentStore;
    use crate::digest::DigestUtils;
    use crate::manifest::{
        DOCKER_V2_LIST_MEDIA_TYPE, DOCKER_V2_SCHEMA1_MEDIA_TYPE, DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE,
        DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE, DOCKER_V2_SCHEMA2_MEDIA_TYPE, OCI_INDEX_MEDIA_TYPE,
        OCI_MANIFEST_MEDIA_TYPE,
    };
    use async_trait::async_trait;

    /// Accepts blobs but refuses anything that looks like a manifest
    struct RefusingManifests(MemoryContentStore);

    #[async_trait]
    impl ContentStore for RefusingManifests {
        async fn put(&self, data: Bytes) -> Result<ContentId> {
            if ImageManifest::from_bytes(&data).is_ok() {
                return Err(GantryError::Storage("node went away".to_string()));
            }
            self.0.put(data).await
        }
        async fn get(&self, id: &ContentId) -> Result<BlobStream> {
            self.0.get(id).await
        }
        async fn resolve_name(&self, name: &str) -> Result<ContentId> {
            self.0.resolve_name(name).await
        }
    }

    struct Blob {
        data: Bytes,
        info: Descriptor,
    }

    fn blob(data: &'static [u8], media_type: &str) -> Blob {
        let data = Bytes::from_static(data);
        let info = Descriptor::new(media_type, data.len() as u64, DigestUtils::compute_docker_digest(&data));
        Blob { data, info }
    }

    fn manifest_for(config: &Blob, layers: &[&Blob]) -> Vec<u8> {
        ImageManifest::schema2(
            config.info.clone(),
            layers.iter().map(|l| l.info.clone()).collect(),
        )
        .to_bytes()
        .unwrap()
    }

    async fn put(dst: &mut IpfsImageDestination, blob: &Blob, is_config: bool) -> Descriptor {
        dst.put_blob(BlobStream::from_bytes(blob.data.clone()), blob.info.clone(), is_config)
            .await
            .unwrap()
    }

    async fn published_manifest(store: &MemoryContentStore, dst: &IpfsImageDestination) -> ImageManifest {
        let root = dst.root().unwrap();
        let bytes = store.get(root).await.unwrap().into_bytes().await.unwrap();
        ImageManifest::from_bytes(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_put_blob_sets_location_hint() {
        let store = Arc::new(MemoryContentStore::new());
        let mut dst = IpfsImageDestination::new(store.clone());
        let layer = blob(b"layer-one", DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE);

        let info = put(&mut dst, &layer, false).await;
        assert_eq!(info.digest, layer.info.digest);
        assert_eq!(info.urls, vec![MemoryContentStore::id_for(&layer.data).to_string()]);
        assert_eq!(dst.phase(), PushPhase::BlobsUploading);
    }

    #[tokio::test]
    async fn test_manifest_points_at_config_regardless_of_order() {
        let store = Arc::new(MemoryContentStore::new());
        let mut dst = IpfsImageDestination::new(store.clone());
        let config = blob(b"{\"os\":\"linux\"}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);
        let first = blob(b"layer-one", DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE);
        let second = blob(b"layer-two", DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE);

        // Config arrives between the layers
        put(&mut dst, &first, false).await;
        let config_info = put(&mut dst, &config, true).await;
        assert_eq!(dst.phase(), PushPhase::ConfigRecorded);
        put(&mut dst, &second, false).await;

        dst.put_manifest(&manifest_for(&config, &[&first, &second])).await.unwrap();
        assert_eq!(dst.phase(), PushPhase::Published);
        assert_eq!(store.put_count(), 4);

        let manifest = published_manifest(&store, &dst).await;
        assert_eq!(manifest.config.urls, config_info.urls);
        assert_eq!(manifest.config.digest, config.info.digest);
        assert_eq!(dst.published_reference(), dst.root().map(|r| r.to_string()));
    }

    #[tokio::test]
    async fn test_manifest_without_config_blob_fails() {
        let store = Arc::new(MemoryContentStore::new());
        let mut dst = IpfsImageDestination::new(store.clone());
        let config = blob(b"{}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);
        let layer = blob(b"layer-one", DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE);
        put(&mut dst, &layer, false).await;

        let err = dst.put_manifest(&manifest_for(&config, &[&layer])).await.unwrap_err();
        assert!(matches!(err, GantryError::ConfigNotRecorded));
        assert!(dst.root().is_none());
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_manifest_with_two_config_blobs_fails() {
        let store = Arc::new(MemoryContentStore::new());
        let mut dst = IpfsImageDestination::new(store);
        let config = blob(b"{}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);
        let other = blob(b"{\"a\":1}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);
        put(&mut dst, &config, true).await;
        put(&mut dst, &other, true).await;

        let err = dst.put_manifest(&manifest_for(&config, &[])).await.unwrap_err();
        assert!(matches!(err, GantryError::MultipleConfigBlobs { count: 2 }));
    }

    #[tokio::test]
    async fn test_unparseable_manifest_fails() {
        let store = Arc::new(MemoryContentStore::new());
        let mut dst = IpfsImageDestination::new(store);
        let config = blob(b"{}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);
        put(&mut dst, &config, true).await;

        let err = dst.put_manifest(b"{\"schemaVersion\":1}").await.unwrap_err();
        assert!(matches!(err, GantryError::Parse(_)));
    }

    #[tokio::test]
    async fn test_destinations_do_not_share_config() {
        let store = Arc::new(MemoryContentStore::new());
        let mut first = IpfsImageDestination::new(store.clone());
        let mut second = IpfsImageDestination::new(store.clone());
        let config_a = blob(b"{\"image\":\"a\"}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);
        let config_b = blob(b"{\"image\":\"b\"}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);

        let a = put(&mut first, &config_a, true).await;
        let b = put(&mut second, &config_b, true).await;
        first.put_manifest(&manifest_for(&config_a, &[])).await.unwrap();
        second.put_manifest(&manifest_for(&config_b, &[])).await.unwrap();

        assert_eq!(published_manifest(&store, &first).await.config.urls, a.urls);
        assert_eq!(published_manifest(&store, &second).await.config.urls, b.urls);
    }

    #[tokio::test]
    async fn test_published_destination_rejects_more_writes() {
        let store = Arc::new(MemoryContentStore::new());
        let mut dst = IpfsImageDestination::new(store);
        let config = blob(b"{}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);
        put(&mut dst, &config, true).await;
        dst.put_manifest(&manifest_for(&config, &[])).await.unwrap();

        let again = dst
            .put_blob(BlobStream::from_bytes(config.data.clone()), config.info.clone(), true)
            .await;
        assert!(matches!(again, Err(GantryError::AlreadyPublished(_))));
    }

    #[tokio::test]
    async fn test_static_capabilities() {
        let mut dst = IpfsImageDestination::new(Arc::new(MemoryContentStore::new()));
        assert!(dst.supports_signatures().is_err());
        assert!(dst.put_signatures(&[]).await.is_ok());
        assert!(dst.put_signatures(&[b"sig".to_vec()]).await.is_err());
        assert_eq!(dst.desired_layer_compression(), LayerCompression::PreserveOriginal);
        assert!(dst.accepts_foreign_layer_urls());
        assert!(!dst.must_match_runtime_os());
        assert!(!dst.ignores_embedded_docker_reference());
        assert!(!dst.has_thread_safe_put_blob());
        assert!(dst.commit().await.is_ok());
        assert!(dst.published_reference().is_none());

        let types = dst.supported_manifest_mime_types();
        assert!(types.contains(&DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string()));
        assert!(types.contains(&OCI_MANIFEST_MEDIA_TYPE.to_string()));
        for unsupported in [DOCKER_V2_SCHEMA1_MEDIA_TYPE, DOCKER_V2_LIST_MEDIA_TYPE, OCI_INDEX_MEDIA_TYPE] {
            assert!(!types.contains(&unsupported.to_string()));
        }
    }

    #[tokio::test]
    async fn test_failed_manifest_upload_stops_after_rewrite() {
        let store = Arc::new(RefusingManifests(MemoryContentStore::new()));
        let mut dst = IpfsImageDestination::new(store);
        let config = blob(b"{}", DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE);
        put(&mut dst, &config, true).await;

        let err = dst.put_manifest(&manifest_for(&config, &[])).await.unwrap_err();
        assert!(matches!(err, GantryError::Storage(_)));
        assert_eq!(dst.phase(), PushPhase::ManifestRewritten);
        assert!(dst.root().is_none());
    }
}
