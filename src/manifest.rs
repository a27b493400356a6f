//! Image manifest model and media type detection
//!
//! Covers the single-image manifest shapes this crate moves around: Docker
//! schema 2 and the OCI image manifest. Both name one config descriptor and an
//! ordered list of layer descriptors.

use crate::digest::DigestUtils;
use crate::error::{GantryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DOCKER_V2_SCHEMA1_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_V2_SCHEMA2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_V2_LIST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const DOCKER_V2_SCHEMA2_LAYER_UNCOMPRESSED_MEDIA_TYPE: &str =
    "application/vnd.docker.image.rootfs.diff.tar";
pub const DOCKER_V2_SCHEMA2_FOREIGN_LAYER_MEDIA_TYPE: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar";
pub const DOCKER_V2_SCHEMA2_FOREIGN_LAYER_GZIP_MEDIA_TYPE: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_NONDISTRIBUTABLE_LAYER_PREFIX: &str = "application/vnd.oci.image.layer.nondistributable";

/// Manifest types that describe a single image, the only kinds [`ImageManifest`] parses
pub const SINGLE_IMAGE_MANIFEST_MIME_TYPES: &[&str] = &[DOCKER_V2_SCHEMA2_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE];

/// Blob descriptor: digest, size, media type and location hints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, size: u64, digest: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            size,
            digest: digest.into(),
            urls: Vec::new(),
            annotations: None,
        }
    }

    /// Layers that registries are not expected to serve themselves
    pub fn is_foreign_layer(&self) -> bool {
        self.media_type == DOCKER_V2_SCHEMA2_FOREIGN_LAYER_MEDIA_TYPE
            || self.media_type == DOCKER_V2_SCHEMA2_FOREIGN_LAYER_GZIP_MEDIA_TYPE
            || self.media_type.starts_with(OCI_NONDISTRIBUTABLE_LAYER_PREFIX)
    }
}

/// A single-image manifest (Docker schema 2 or OCI image manifest)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageManifest {
    /// Build a schema 2 manifest from its parts
    pub fn schema2(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string()),
            config,
            layers,
            annotations: None,
        }
    }

    /// Parse bytes as a schema 2 or OCI image manifest.
    ///
    /// Manifest lists, indices and schema 1 documents are rejected.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let media_type = guess_media_type(data);
        match media_type.as_str() {
            DOCKER_V2_SCHEMA2_MEDIA_TYPE | OCI_MANIFEST_MEDIA_TYPE => {}
            "" => {
                return Err(GantryError::Parse(
                    "manifest is not a recognized image manifest".to_string(),
                ));
            }
            other => {
                return Err(GantryError::Parse(format!(
                    "unsupported manifest type {}, expected {} or {}",
                    other, DOCKER_V2_SCHEMA2_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE
                )));
            }
        }

        let manifest: ImageManifest = serde_json::from_slice(data)
            .map_err(|e| GantryError::Parse(format!("invalid image manifest: {}", e)))?;
        if manifest.schema_version != 2 {
            return Err(GantryError::Parse(format!(
                "unsupported schema version {}",
                manifest.schema_version
            )));
        }
        Ok(manifest)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| GantryError::Serialize(e.to_string()))
    }

    /// All blobs the manifest references, layers first then config
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        self.layers.iter().chain(std::iter::once(&self.config))
    }
}

/// Digest of a serialized manifest
pub fn manifest_digest(data: &[u8]) -> String {
    DigestUtils::compute_docker_digest(data)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestShape {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    signatures: Option<serde_json::Value>,
    #[serde(default)]
    config: Option<ConfigShape>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigShape {
    #[serde(default)]
    media_type: Option<String>,
}

/// Detect the manifest format of raw bytes.
///
/// Returns an empty string when the bytes are not a manifest at all.
pub fn guess_media_type(data: &[u8]) -> String {
    let shape: ManifestShape = match serde_json::from_slice(data) {
        Ok(shape) => shape,
        Err(_) => return String::new(),
    };

    if let Some(mt) = shape.media_type.filter(|mt| !mt.is_empty()) {
        // Schema 1 documents declare the unsigned type even when signed
        if mt == DOCKER_V2_SCHEMA1_MEDIA_TYPE && shape.signatures.is_some() {
            return DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE.to_string();
        }
        return mt;
    }

    match shape.schema_version {
        Some(1) if shape.signatures.is_some() => DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE.to_string(),
        Some(1) => DOCKER_V2_SCHEMA1_MEDIA_TYPE.to_string(),
        Some(2) => match shape.config {
            Some(config) => match config.media_type.as_deref() {
                Some(DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE) => DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string(),
                _ => OCI_MANIFEST_MEDIA_TYPE.to_string(),
            },
            None if shape.manifests.is_some() => OCI_INDEX_MEDIA_TYPE.to_string(),
            None => String::new(),
        },
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_DIGEST: &str =
        "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7";
    const LAYER_DIGEST: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn sample_manifest() -> ImageManifest {
        ImageManifest::schema2(
            Descriptor::new(DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE, 7023, CONFIG_DIGEST),
            vec![Descriptor::new(DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE, 32654, LAYER_DIGEST)],
        )
    }

    #[test]
    fn test_schema2_parses_and_keeps_urls() {
        let raw = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_V2_SCHEMA2_MEDIA_TYPE,
            "config": {"mediaType": DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE, "size": 7023, "digest": CONFIG_DIGEST},
            "layers": [{
                "mediaType": DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE,
                "size": 32654,
                "digest": LAYER_DIGEST,
                "urls": ["QmLayer"]
            }]
        });
        let manifest = ImageManifest::from_bytes(&serde_json::to_vec(&raw).unwrap()).unwrap();
        assert_eq!(manifest.config.digest, CONFIG_DIGEST);
        assert!(manifest.config.urls.is_empty());
        assert_eq!(manifest.layers[0].urls, vec!["QmLayer".to_string()]);
        assert_eq!(manifest.media_type.as_deref(), Some(DOCKER_V2_SCHEMA2_MEDIA_TYPE));
    }

    #[test]
    fn test_empty_urls_are_not_serialized() {
        let bytes = sample_manifest().to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("urls"));
    }

    #[test]
    fn test_index_is_rejected() {
        let raw = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_INDEX_MEDIA_TYPE,
            "manifests": []
        });
        let err = ImageManifest::from_bytes(&serde_json::to_vec(&raw).unwrap()).unwrap_err();
        assert!(matches!(err, GantryError::Parse(_)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            ImageManifest::from_bytes(b"not json"),
            Err(GantryError::Parse(_))
        ));
    }

    #[test]
    fn test_guess_media_type() {
        let oci = serde_json::json!({
            "schemaVersion": 2,
            "config": {"mediaType": OCI_CONFIG_MEDIA_TYPE, "size": 1, "digest": CONFIG_DIGEST},
            "layers": []
        });
        assert_eq!(guess_media_type(&serde_json::to_vec(&oci).unwrap()), OCI_MANIFEST_MEDIA_TYPE);

        let schema2 = serde_json::json!({
            "schemaVersion": 2,
            "config": {"mediaType": DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE, "size": 1, "digest": CONFIG_DIGEST},
            "layers": []
        });
        assert_eq!(
            guess_media_type(&serde_json::to_vec(&schema2).unwrap()),
            DOCKER_V2_SCHEMA2_MEDIA_TYPE
        );

        let signed = serde_json::json!({"schemaVersion": 1, "signatures": []});
        assert_eq!(
            guess_media_type(&serde_json::to_vec(&signed).unwrap()),
            DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE
        );
        assert_eq!(guess_media_type(b"{}"), "");
    }

    #[test]
    fn test_foreign_layers() {
        let mut layer = Descriptor::new(DOCKER_V2_SCHEMA2_FOREIGN_LAYER_GZIP_MEDIA_TYPE, 1, LAYER_DIGEST);
        assert!(layer.is_foreign_layer());
        layer.media_type = DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE.to_string();
        assert!(!layer.is_foreign_layer());
    }
}
