//! Image copy engine
//!
//! Moves one image from an [`ImageSource`] to an
//! [`ImageDestination`](crate::transport::ImageDestination):
//! layers first, then the config, then the manifest. Every blob is checked
//! against its digest and size on the way through, and every call into a
//! transport runs under the caller's [`Context`] so a cancel stops the copy.

use crate::blob::{BlobStream, buffer_for};
use crate::context::Context;
use crate::digest::{DigestUtils, DigestWriter};
use crate::error::{GantryError, Result};
use crate::manifest::{Descriptor, ImageManifest, manifest_digest};
use crate::transport::{ImageReference, ImageSource};
use bytes::Bytes;
use futures::TryStreamExt;
use futures::future::try_join_all;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info};

pub const DEFAULT_MAX_PARALLEL_FETCHES: usize = 4;

/// Trust policy applied to the source before anything is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    #[default]
    InsecureAcceptAnything,
    Reject,
}

impl Policy {
    fn check(&self, reference: &dyn ImageReference) -> Result<()> {
        match self {
            Policy::InsecureAcceptAnything => Ok(()),
            Policy::Reject => {
                let identity = reference.policy_configuration_identity();
                let shown = if identity.is_empty() {
                    format!("{}:{}", reference.transport_name(), reference.string_within_transport())
                } else {
                    identity
                };
                Err(GantryError::PolicyRejected(shown))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Upper bound on concurrent blob reads from a thread-safe source
    pub max_parallel_fetches: usize,
    /// Drop source signatures instead of failing when the destination cannot store them
    pub remove_signatures: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            max_parallel_fetches: DEFAULT_MAX_PARALLEL_FETCHES,
            remove_signatures: false,
        }
    }
}

/// Outcome of a copy
#[derive(Debug, Clone)]
pub struct CopyReport {
    /// Manifest as written to the destination
    pub manifest: Vec<u8>,
    pub manifest_digest: String,
    pub blobs_copied: usize,
    pub blobs_reused: usize,
    /// Bytes read from the source and written to the destination
    pub bytes_copied: u64,
    pub published_reference: Option<String>,
}

#[derive(Deserialize)]
struct ConfigPlatform {
    #[serde(default)]
    os: Option<String>,
}

/// Operating system name as written in image configs
pub fn runtime_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

enum LayerPlan {
    Keep(Descriptor),
    Fetch(Descriptor),
}

/// Copy the image named by `src_ref` to `dest_ref`.
pub async fn copy_image(
    ctx: &Context,
    policy: Policy,
    dest_ref: &dyn ImageReference,
    src_ref: &dyn ImageReference,
    options: &CopyOptions,
) -> Result<CopyReport> {
    policy.check(src_ref)?;

    let source = ctx.run(src_ref.new_image_source()).await?;
    let mut dest = ctx.run(dest_ref.new_image_destination()).await?;
    info!("Copying {} to {}", source.reference(), dest.reference());

    let (manifest_bytes, manifest_type) = ctx.run(source.get_manifest(None)).await?;
    let supported = dest.supported_manifest_mime_types();
    if !supported.is_empty() && !supported.iter().any(|mt| *mt == manifest_type) {
        return Err(GantryError::Unsupported(format!(
            "destination {} does not accept manifests of type {}",
            dest.reference(),
            manifest_type
        )));
    }
    let original = ImageManifest::from_bytes(&manifest_bytes)?;

    let signatures = ctx.run(source.get_signatures(None)).await?;
    let signatures = if signatures.is_empty() || options.remove_signatures {
        Vec::new()
    } else {
        dest.supports_signatures()?;
        signatures
    };

    let layers = match ctx.run(source.layer_infos_for_copy()).await? {
        Some(layers) => layers,
        None => original.layers.clone(),
    };

    let mut blobs_reused = 0;
    let mut plan = Vec::with_capacity(layers.len());
    for layer in layers {
        if layer.is_foreign_layer() && !layer.urls.is_empty() && dest.accepts_foreign_layer_urls() {
            debug!("Skipping foreign layer {}", layer.digest);
            plan.push(LayerPlan::Keep(layer));
            continue;
        }
        match ctx.run(dest.try_reusing_blob(&layer)).await? {
            Some(reused) => {
                debug!("Reusing blob {}", DigestUtils::format_digest_short(&layer.digest));
                blobs_reused += 1;
                plan.push(LayerPlan::Keep(reused));
            }
            None => plan.push(LayerPlan::Fetch(layer)),
        }
    }

    let limit = if source.has_thread_safe_get_blob() {
        options.max_parallel_fetches.max(1)
    } else {
        1
    };
    let fetched = fetch_layers(ctx, source.as_ref(), &plan, limit).await?;

    let mut blobs_copied = 0;
    let mut bytes_copied = 0;
    let mut written_layers = Vec::with_capacity(plan.len());
    for (entry, data) in plan.into_iter().zip(fetched) {
        match (entry, data) {
            (LayerPlan::Keep(layer), _) => written_layers.push(layer),
            (LayerPlan::Fetch(layer), Some(data)) => {
                bytes_copied += data.len() as u64;
                let stored = ctx
                    .run(dest.put_blob(BlobStream::from_bytes(data), layer, false))
                    .await?;
                blobs_copied += 1;
                written_layers.push(stored);
            }
            (LayerPlan::Fetch(layer), None) => {
                return Err(GantryError::NotFound(format!("layer {} was not fetched", layer.digest)));
            }
        }
    }

    let config_data = fetch_verified(ctx, source.as_ref(), &original.config).await?;
    bytes_copied += config_data.len() as u64;
    if dest.must_match_runtime_os() {
        check_runtime_os(&config_data)?;
    }
    let written_config = ctx
        .run(dest.put_blob(
            BlobStream::from_bytes(config_data),
            original.config.clone(),
            true,
        ))
        .await?;
    blobs_copied += 1;

    let mut updated = original.clone();
    updated.layers = written_layers;
    updated.config = written_config;
    let manifest = if updated == original {
        manifest_bytes.to_vec()
    } else {
        updated.to_bytes()?
    };

    ctx.run(dest.put_manifest(&manifest)).await?;
    if !signatures.is_empty() {
        ctx.run(dest.put_signatures(&signatures)).await?;
    }
    ctx.run(dest.commit()).await?;

    let published_reference = dest.published_reference();
    info!(
        copied = blobs_copied,
        reused = blobs_reused,
        "Wrote {}",
        published_reference.as_deref().unwrap_or("image")
    );

    Ok(CopyReport {
        manifest_digest: manifest_digest(&manifest),
        manifest,
        blobs_copied,
        blobs_reused,
        bytes_copied,
        published_reference,
    })
}

async fn fetch_layers(
    ctx: &Context,
    source: &dyn ImageSource,
    plan: &[LayerPlan],
    limit: usize,
) -> Result<Vec<Option<Bytes>>> {
    let semaphore = Semaphore::new(limit);
    let fetches = plan.iter().map(|entry| {
        let semaphore = &semaphore;
        async move {
            match entry {
                LayerPlan::Keep(_) => Ok::<_, GantryError>(None),
                LayerPlan::Fetch(layer) => {
                    let _permit = semaphore.acquire().await.map_err(|_| GantryError::Cancelled)?;
                    fetch_verified(ctx, source, layer).await.map(Some)
                }
            }
        }
    });
    try_join_all(fetches).await
}

/// Read a whole blob, checking digest and size as it streams in
async fn fetch_verified(ctx: &Context, source: &dyn ImageSource, info: &Descriptor) -> Result<Bytes> {
    ctx.run(async {
        let stream = source.get_blob(info).await?;
        let mut chunks = stream.into_inner();
        let mut hasher = DigestWriter::new();
        let mut buf = buffer_for(info.size);
        while let Some(chunk) = chunks.try_next().await? {
            hasher.update(&chunk);
            if info.size > 0 && hasher.written() > info.size {
                return Err(GantryError::Validation(format!(
                    "blob {} exceeds its declared size of {} bytes",
                    info.digest, info.size
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        if info.size > 0 && hasher.written() != info.size {
            return Err(GantryError::Validation(format!(
                "blob {} is {} bytes, expected {}",
                info.digest,
                hasher.written(),
                info.size
            )));
        }
        let actual = hasher.finish();
        if actual != info.digest {
            return Err(GantryError::DigestMismatch {
                expected: info.digest.clone(),
                actual,
            });
        }
        Ok(buf.freeze())
    })
    .await
}

fn check_runtime_os(config: &[u8]) -> Result<()> {
    let platform: ConfigPlatform = serde_json::from_slice(config)
        .map_err(|e| GantryError::Parse(format!("invalid image config: {}", e)))?;
    match platform.os.as_deref() {
        Some(os) if !os.is_empty() && os != runtime_os() => Err(GantryError::Validation(format!(
            "image is built for {}, this host runs {}",
            os,
            runtime_os()
        ))),
        _ => Ok(()),
    }
}
