//! `docker save` archive import

use super::{LocalStore, StoredImage};
use crate::digest::DigestUtils;
use crate::error::{GantryError, Result};
use crate::manifest::{
    DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE, DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE,
    DOCKER_V2_SCHEMA2_LAYER_UNCOMPRESSED_MEDIA_TYPE, Descriptor, ImageManifest,
};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tar::Archive;
use tracing::debug;

const ARCHIVE_MANIFEST: &str = "manifest.json";

/// One image listed in an archive's `manifest.json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ArchiveEntry {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

struct ArchivedBlob {
    digest: String,
    size: u64,
    gzipped: bool,
}

/// Check for the gzip magic number (0x1f 0x8b)
pub fn is_gzipped(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
    let mut magic = [0u8; 2];
    let sniffed = File::open(path)?.read(&mut magic)?;

    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = if is_gzipped(&magic[..sniffed]) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut archive = Archive::new(reader);
    archive.set_ignore_zeros(true);
    Ok(archive)
}

fn entry_path<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry
        .path()
        .map_err(|e| GantryError::Parse(format!("Failed to read entry path: {}", e)))?;
    Ok(path.to_string_lossy().trim_start_matches("./").to_string())
}

fn read_archive_manifest(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = open_archive(path)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry_path(&entry)? == ARCHIVE_MANIFEST {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            let entries: Vec<ArchiveEntry> = serde_json::from_slice(&data)
                .map_err(|e| GantryError::Parse(format!("Invalid {}: {}", ARCHIVE_MANIFEST, e)))?;
            if entries.is_empty() {
                return Err(GantryError::Parse(format!("{} lists no images", ARCHIVE_MANIFEST)));
            }
            return Ok(entries);
        }
    }
    Err(GantryError::NotFound(format!(
        "{} not found in {}",
        ARCHIVE_MANIFEST,
        path.display()
    )))
}

/// Load a `docker save` archive (optionally gzip-compressed) into the store.
///
/// Each image in the archive is committed with a schema 2 manifest and
/// tagged with its `RepoTags`. `name`, when given, replaces those tags and
/// requires the archive to hold a single image.
pub fn import_archive(store: &LocalStore, path: &Path, name: Option<&str>) -> Result<Vec<StoredImage>> {
    let entries = read_archive_manifest(path)?;
    if name.is_some() && entries.len() > 1 {
        return Err(GantryError::Validation(format!(
            "archive holds {} images, cannot name them all {}",
            entries.len(),
            name.unwrap_or_default()
        )));
    }

    let wanted: HashSet<&str> = entries
        .iter()
        .flat_map(|e| std::iter::once(e.config.as_str()).chain(e.layers.iter().map(String::as_str)))
        .collect();

    let mut blobs: HashMap<String, ArchivedBlob> = HashMap::new();
    let mut archive = open_archive(path)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let member = entry_path(&entry)?;
        if !wanted.contains(member.as_str()) {
            continue;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        let digest = DigestUtils::compute_docker_digest(&data);
        store.write_blob(&digest, &data)?;
        debug!(path = %member, digest = %digest, "Imported archive blob");

        blobs.insert(
            member,
            ArchivedBlob {
                digest,
                size: data.len() as u64,
                gzipped: is_gzipped(&data),
            },
        );
    }

    let lookup = |path: &str| {
        blobs
            .get(path)
            .ok_or_else(|| GantryError::NotFound(format!("{} listed but missing from archive", path)))
    };

    let mut imported = Vec::with_capacity(entries.len());
    for entry in &entries {
        let config = lookup(&entry.config)?;
        let layers = entry
            .layers
            .iter()
            .map(|layer| -> Result<Descriptor> {
                let blob = lookup(layer)?;
                let media_type = if blob.gzipped {
                    DOCKER_V2_SCHEMA2_LAYER_MEDIA_TYPE
                } else {
                    DOCKER_V2_SCHEMA2_LAYER_UNCOMPRESSED_MEDIA_TYPE
                };
                Ok(Descriptor::new(media_type, blob.size, blob.digest.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let manifest = ImageManifest::schema2(
            Descriptor::new(DOCKER_V2_SCHEMA2_CONFIG_MEDIA_TYPE, config.size, config.digest.clone()),
            layers,
        )
        .to_bytes()?;

        let tags: Vec<&str> = match name {
            Some(name) => vec![name],
            None => entry
                .repo_tags
                .iter()
                .flatten()
                .map(String::as_str)
                .collect(),
        };

        let mut image = store.commit_image(tags.first().copied(), &manifest)?;
        for tag in tags.iter().skip(1) {
            image = store.tag_image(&image.id, tag)?;
        }
        imported.push(image);
    }

    Ok(imported)
}
