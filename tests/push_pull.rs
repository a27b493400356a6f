//! End-to-end push and pull between local stores through an in-memory content store

use bytes::Bytes;
use gantry::cas::{ContentId, ContentStore, MemoryContentStore};
use gantry::context::Context;
use gantry::copy::runtime_os;
use gantry::digest::DigestUtils;
use gantry::error::GantryError;
use gantry::image::{ImageManager, PullSource};
use gantry::logging::Logger;
use gantry::manifest::{
    DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE, DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE, Descriptor, ImageManifest,
};
use gantry::store::LocalStore;
use std::sync::Arc;
use tempfile::TempDir;

const LAYERS: [&[u8]; 2] = [b"first layer contents", b"second layer contents"];

struct Harness {
    _dir: TempDir,
    cas: Arc<MemoryContentStore>,
    origin: ImageManager,
    target: ImageManager,
    config: Vec<u8>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cas = Arc::new(MemoryContentStore::new());
        let origin_store = LocalStore::open(dir.path().join("origin")).unwrap();
        let target_store = LocalStore::open(dir.path().join("target")).unwrap();

        let config = format!(
            r#"{{"architecture":"amd64","os":"{}","rootfs":{{"type":"layers"}}}}"#,
            runtime_os()
        )
        .into_bytes();
        seed_image(&origin_store, "busybox:latest", &config);

        Self {
            origin: ImageManager::new(origin_store, cas.clone(), Logger::new_quiet()),
            target: ImageManager::new(target_store, cas.clone(), Logger::new_quiet()),
            cas,
            config,
            _dir: dir,
        }
    }

    async fn root_manifest(&self, root: &ContentId) -> ImageManifest {
        let bytes = self.cas.get(root).await.unwrap().into_bytes().await.unwrap();
        ImageManifest::from_bytes(&bytes).unwrap()
    }
}

fn seed_image(store: &LocalStore, name: &str, config: &[u8]) {
    let config_digest = DigestUtils::compute_docker_digest(config);
    store.write_blob(&config_digest, config).unwrap();

    let layers = LAYERS
        .iter()
        .map(|data| {
            let digest = DigestUtils::compute_docker_digest(data);
            store.write_blob(&digest, data).unwrap();
            Descriptor::new(DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE, data.len() as u64, digest)
        })
        .collect();
    let manifest = ImageManifest::schema2(
        Descriptor::new(DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE, config.len() as u64, config_digest),
        layers,
    );
    store.commit_image(Some(name), &manifest.to_bytes().unwrap()).unwrap();
}

#[tokio::test]
async fn push_uploads_three_blobs_then_the_manifest() {
    let harness = Harness::new();
    let root = harness.origin.push(&Context::background(), "busybox").await.unwrap();

    assert_eq!(harness.cas.put_count(), 4);
    assert_eq!(harness.cas.len().await, 4);

    let manifest = harness.root_manifest(&root).await;
    let config_cid = MemoryContentStore::id_for(&harness.config);
    assert_eq!(manifest.config.urls, vec![config_cid.to_string()]);
    assert_eq!(manifest.config.digest, DigestUtils::compute_docker_digest(&harness.config));
    for (layer, data) in manifest.layers.iter().zip(LAYERS) {
        assert_eq!(layer.urls, vec![MemoryContentStore::id_for(data).to_string()]);
    }
}

#[tokio::test]
async fn push_of_unchanged_image_gives_same_root() {
    let harness = Harness::new();
    let ctx = Context::background();
    let first = harness.origin.push(&ctx, "busybox:latest").await.unwrap();
    let second = harness.origin.push(&ctx, "busybox:latest").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn pull_by_cid_round_trips_the_image() {
    let harness = Harness::new();
    let ctx = Context::background();
    let root = harness.origin.push(&ctx, "busybox:latest").await.unwrap();

    let image = harness
        .target
        .pull(&ctx, PullSource::Cid(root), "restored/busybox:v1")
        .await
        .unwrap();
    assert_eq!(image.id, DigestUtils::compute_sha256(&harness.config));
    assert_eq!(image.names, vec!["restored/busybox:v1"]);

    let store = harness.target.store();
    let found = store.find_image("restored/busybox:v1").unwrap();
    assert_eq!(found.image_id(), Some(image.id.as_str()));
    assert_eq!(
        store.read_blob(&image.config_digest).unwrap(),
        harness.config
    );
    let manifest = ImageManifest::from_bytes(&store.read_manifest(&image).unwrap()).unwrap();
    assert_eq!(manifest.layers.len(), LAYERS.len());
    for (layer, data) in manifest.layers.iter().zip(LAYERS) {
        assert!(layer.urls.is_empty());
        assert_eq!(store.read_blob(&layer.digest).unwrap(), data);
    }
}

#[tokio::test]
async fn pull_by_name_resolves_first() {
    let harness = Harness::new();
    let ctx = Context::background();
    let root = harness.origin.push(&ctx, "busybox:latest").await.unwrap();
    harness.cas.publish_name("k51busybox", root).await;

    let source = PullSource::from_flags(Some("QmIgnored"), Some("/ipns/k51busybox")).unwrap();
    let image = harness.target.pull(&ctx, source, "busybox").await.unwrap();
    assert_eq!(image.names, vec!["busybox:latest"]);
    assert!(!image.id.is_empty());
}

#[tokio::test]
async fn pull_of_unknown_name_commits_nothing() {
    let harness = Harness::new();
    let ctx = Context::background();

    let err = harness
        .target
        .pull(&ctx, PullSource::Name("k51missing".to_string()), "busybox")
        .await
        .unwrap_err();
    assert!(matches!(err, GantryError::NotFound(_)));
    assert!(harness.target.images().unwrap().is_empty());
}

#[tokio::test]
async fn pull_of_descriptor_without_location_fails() {
    let harness = Harness::new();
    let ctx = Context::background();

    // A manifest whose layers were never uploaded through the transport
    let config_digest = DigestUtils::compute_docker_digest(&harness.config);
    let mut config = Descriptor::new(DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE, harness.config.len() as u64, config_digest);
    config.urls = vec![harness.cas.put(Bytes::from(harness.config.clone())).await.unwrap().to_string()];
    let layer = Descriptor::new(
        DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE,
        LAYERS[0].len() as u64,
        DigestUtils::compute_docker_digest(LAYERS[0]),
    );
    let manifest = ImageManifest::schema2(config, vec![layer]).to_bytes().unwrap();
    let root = harness.cas.put(Bytes::from(manifest)).await.unwrap();

    let err = harness
        .target
        .pull(&ctx, PullSource::Cid(root), "broken")
        .await
        .unwrap_err();
    assert!(matches!(err, GantryError::MissingLocation { .. }));
    assert!(harness.target.images().unwrap().is_empty());
}

#[tokio::test]
async fn pull_of_layer_with_absurd_size_fails_cleanly() {
    let harness = Harness::new();
    let ctx = Context::background();
    let root = harness.origin.push(&ctx, "busybox:latest").await.unwrap();

    let mut manifest = harness.root_manifest(&root).await;
    manifest.layers[0].size = u64::MAX;
    let root = harness
        .cas
        .put(Bytes::from(manifest.to_bytes().unwrap()))
        .await
        .unwrap();

    let err = harness
        .target
        .pull(&ctx, PullSource::Cid(root), "oversized")
        .await
        .unwrap_err();
    assert!(matches!(err, GantryError::Validation(_)));
    assert!(harness.target.images().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_push_fails_without_a_root() {
    let harness = Harness::new();
    let (ctx, cancel) = Context::with_cancel();
    cancel.cancel();

    let err = harness.origin.push(&ctx, "busybox").await.unwrap_err();
    assert!(matches!(err, GantryError::Cancelled));
    assert_eq!(harness.cas.put_count(), 0);
}

#[test]
fn pull_requires_a_cid_or_name() {
    assert!(matches!(
        PullSource::from_flags(None, None),
        Err(GantryError::MissingPullSource)
    ));
}
