//! Local image store
//!
//! Directory-backed store laid out like a registry cache:
//!
//! ```text
//! <root>/
//!   blobs/sha256/<hex>   // blobs and manifests
//!   tmp/                 // staging area for atomic writes
//!   index.json           // images by id
//! ```
//!
//! An image's id is the hex of its config digest. Names are normalized to
//! `repository:tag`; a name belongs to at most one image.

pub mod archive;
pub mod reference;
pub mod transport;

pub use archive::import_archive;
pub use reference::{StoreReference, normalize_name};
pub use transport::{StoreImageDestination, StoreImageSource};

use crate::config::StoreConfig;
use crate::digest::DigestUtils;
use crate::error::{GantryError, Result};
use crate::manifest::{ImageManifest, manifest_digest};
use crate::transport::ImageReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

pub const BLOBS_DIR: &str = "blobs";
pub const SHA256_DIR: &str = "sha256";
pub const TMP_DIR: &str = "tmp";
pub const INDEX_FILE: &str = "index.json";

/// An image recorded in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub id: String,
    pub names: Vec<String>,
    pub manifest_digest: String,
    pub config_digest: String,
}

impl StoredImage {
    /// First twelve characters of the id
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: BTreeMap<String, StoredImage>,
}

impl StoreIndex {
    fn by_name(&self, name: &str) -> Option<&StoredImage> {
        self.images.values().find(|img| img.names.iter().any(|n| n == name))
    }
}

/// Handle to a local store. Clones share the same index.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    index: Arc<Mutex<StoreIndex>>,
}

impl LocalStore {
    /// Open the store at `root`, creating its directories if needed
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOBS_DIR).join(SHA256_DIR))?;
        fs::create_dir_all(root.join(TMP_DIR))?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let contents = fs::read(&index_path)?;
            serde_json::from_slice(&contents).map_err(|e| {
                GantryError::store(format!("Failed to parse store index: {}", e), Some(index_path.clone()))
            })?
        } else {
            StoreIndex::default()
        };

        debug!(root = %root.display(), "Opened local store");
        Ok(Self {
            root,
            index: Arc::new(Mutex::new(index)),
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::open(&config.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_index(&self) -> Result<MutexGuard<'_, StoreIndex>> {
        self.index
            .lock()
            .map_err(|_| GantryError::store("store index lock poisoned", None))
    }

    fn save_index(&self, index: &StoreIndex) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)
            .map_err(|e| GantryError::Serialize(format!("Failed to serialize store index: {}", e)))?;
        self.write_atomic(&self.root.join(INDEX_FILE), &data)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let staging = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        fs::write(&staging, data)?;
        if let Err(e) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(GantryError::store(
                format!("Failed to move blob into place: {}", e),
                Some(path.to_path_buf()),
            ));
        }
        Ok(())
    }

    /// Path of the blob with the given `sha256:` digest
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let hex = DigestUtils::extract_hex_part(digest)?;
        Ok(self.root.join(BLOBS_DIR).join(SHA256_DIR).join(hex))
    }

    pub fn has_blob(&self, digest: &str) -> bool {
        self.blob_path(digest).is_ok_and(|path| path.is_file())
    }

    pub fn blob_size(&self, digest: &str) -> Option<u64> {
        let path = self.blob_path(digest).ok()?;
        fs::metadata(path).ok().map(|m| m.len())
    }

    /// Store a blob after checking it against its digest
    pub fn write_blob(&self, digest: &str, data: &[u8]) -> Result<PathBuf> {
        DigestUtils::verify_data_integrity(data, digest)?;
        let path = self.blob_path(digest)?;

        if path.is_file() && fs::metadata(&path)?.len() == data.len() as u64 {
            return Ok(path);
        }

        self.write_atomic(&path, data)?;
        Ok(path)
    }

    pub fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        if !path.is_file() {
            return Err(GantryError::NotFound(format!("blob {} not in local store", digest)));
        }
        Ok(fs::read(path)?)
    }

    /// Reference to a name without checking that it exists
    pub fn parse_store_reference(&self, name: &str) -> Result<StoreReference> {
        Ok(StoreReference::new(self.clone(), Some(normalize_name(name)?), None))
    }

    /// Look an image up by name, full id or unique id prefix
    pub fn find_image(&self, name: &str) -> Result<StoreReference> {
        let index = self.lock_index()?;

        if let Ok(normalized) = normalize_name(name) {
            if let Some(image) = index.by_name(&normalized) {
                return Ok(StoreReference::new(
                    self.clone(),
                    Some(normalized),
                    Some(image.id.clone()),
                ));
            }
        }

        let prefix = name.trim().trim_start_matches("sha256:");
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            let mut matches = index.images.keys().filter(|id| id.starts_with(prefix));
            match (matches.next(), matches.next()) {
                (Some(id), None) => {
                    return Ok(StoreReference::new(self.clone(), None, Some(id.clone())));
                }
                (Some(_), Some(_)) => {
                    return Err(GantryError::Validation(format!(
                        "image id prefix {} is ambiguous",
                        prefix
                    )));
                }
                _ => {}
            }
        }

        Err(GantryError::NotFound(format!("image {} not in local store", name)))
    }

    /// The stored image a reference points at
    pub fn get_store_image(&self, reference: &StoreReference) -> Result<StoredImage> {
        let index = self.lock_index()?;
        let image = match (reference.image_id(), reference.name()) {
            (Some(id), _) => index.images.get(id),
            (None, Some(name)) => index.by_name(name),
            (None, None) => None,
        };
        image
            .cloned()
            .ok_or_else(|| GantryError::NotFound(format!("image {} not in local store", reference.string_within_transport())))
    }

    pub fn list_images(&self) -> Result<Vec<StoredImage>> {
        Ok(self.lock_index()?.images.values().cloned().collect())
    }

    pub fn read_manifest(&self, image: &StoredImage) -> Result<Vec<u8>> {
        self.read_blob(&image.manifest_digest)
    }

    /// Record an image whose blobs are all present, tagging it with `name`
    pub fn commit_image(&self, name: Option<&str>, manifest: &[u8]) -> Result<StoredImage> {
        let parsed = ImageManifest::from_bytes(manifest)?;
        for blob in parsed.blobs() {
            if blob.is_foreign_layer() && !blob.urls.is_empty() {
                continue;
            }
            if !self.has_blob(&blob.digest) {
                return Err(GantryError::store(
                    format!("blob {} is missing, cannot commit image", blob.digest),
                    self.blob_path(&blob.digest).ok(),
                ));
            }
        }

        let manifest_digest = manifest_digest(manifest);
        self.write_blob(&manifest_digest, manifest)?;

        let id = DigestUtils::extract_hex_part(&parsed.config.digest)?.to_string();
        let mut index = self.lock_index()?;
        let image = index.images.entry(id.clone()).or_insert_with(|| StoredImage {
            id: id.clone(),
            names: Vec::new(),
            manifest_digest: manifest_digest.clone(),
            config_digest: parsed.config.digest.clone(),
        });
        image.manifest_digest = manifest_digest;

        if let Some(name) = name {
            Self::move_name(&mut index, &id, &normalize_name(name)?);
        }
        self.save_index(&index)?;

        let image = index
            .images
            .get(&id)
            .cloned()
            .ok_or_else(|| GantryError::NotFound(format!("image {} vanished", id)))?;
        debug!(id = %image.id, names = ?image.names, "Committed image");
        Ok(image)
    }

    /// Add a name to an existing image, taking it off any other image
    pub fn tag_image(&self, id: &str, name: &str) -> Result<StoredImage> {
        let name = normalize_name(name)?;
        let mut index = self.lock_index()?;
        if !index.images.contains_key(id) {
            return Err(GantryError::NotFound(format!("image {} not in local store", id)));
        }
        Self::move_name(&mut index, id, &name);
        self.save_index(&index)?;
        index
            .images
            .get(id)
            .cloned()
            .ok_or_else(|| GantryError::NotFound(format!("image {} vanished", id)))
    }

    fn move_name(index: &mut StoreIndex, id: &str, name: &str) {
        for image in index.images.values_mut() {
            if image.id != id {
                image.names.retain(|n| n != name);
            }
        }
        if let Some(image) = index.images.get_mut(id) {
            if !image.names.iter().any(|n| n == name) {
                image.names.push(name.to_string());
            }
        }
    }

    /// Forget an image. Blobs stay on disk.
    pub fn delete_image(&self, id: &str) -> Result<()> {
        let mut index = self.lock_index()?;
        if index.images.remove(id).is_none() {
            return Err(GantryError::NotFound(format!("image {} not in local store", id)));
        }
        self.save_index(&index)
    }
}
