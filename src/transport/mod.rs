//! Image transport abstractions and the IPFS transport
//!
//! A transport makes some storage look like an image registry to the copy
//! engine: an [`ImageReference`] names an image and opens an [`ImageSource`]
//! (read a manifest and blobs) or an [`ImageDestination`] (write blobs and a
//! manifest). The IPFS transport lives in [`reference`], [`source`] and
//! [`destination`]; the local store provides its own in `crate::store`.

pub mod config_slot;
pub mod destination;
pub mod reference;
pub mod source;

pub use config_slot::ConfigSlot;
pub use destination::{IpfsImageDestination, PushPhase};
pub use reference::IpfsReference;
pub use source::IpfsImageSource;

use crate::blob::BlobStream;
use crate::error::Result;
use crate::manifest::Descriptor;
use async_trait::async_trait;
use bytes::Bytes;

pub const IPFS_TRANSPORT_NAME: &str = "ipfs";

/// Layer compression a destination asks the copy engine for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerCompression {
    PreserveOriginal,
    Compress,
    Decompress,
}

/// Names an image within a transport and opens sources/destinations for it
#[async_trait]
pub trait ImageReference: Send + Sync {
    fn transport_name(&self) -> &'static str;

    /// The reference as written after the `transport:` prefix
    fn string_within_transport(&self) -> String;

    /// Identity used for trust policy lookups
    fn policy_configuration_identity(&self) -> String;

    /// Less specific identities for trust policy lookups, most specific first
    fn policy_configuration_namespaces(&self) -> Vec<String>;

    async fn new_image_source(&self) -> Result<Box<dyn ImageSource>>;

    async fn new_image_destination(&self) -> Result<Box<dyn ImageDestination>>;

    async fn delete_image(&self) -> Result<()>;
}

/// Read side of a transport
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Human-readable description of the image being read
    fn reference(&self) -> String;

    /// Manifest bytes and their media type. `instance` selects a child of a
    /// manifest list; `None` asks for the root manifest.
    async fn get_manifest(&self, instance: Option<&str>) -> Result<(Bytes, String)>;

    async fn get_blob(&self, info: &Descriptor) -> Result<BlobStream>;

    /// Whether `get_blob` may be called concurrently
    fn has_thread_safe_get_blob(&self) -> bool;

    async fn get_signatures(&self, instance: Option<&str>) -> Result<Vec<Vec<u8>>>;

    /// Replacement layer list for the copy, `None` to use the manifest's layers
    async fn layer_infos_for_copy(&self) -> Result<Option<Vec<Descriptor>>>;
}

/// Write side of a transport.
///
/// Writes take `&mut self`: one destination serves one push at a time.
#[async_trait]
pub trait ImageDestination: Send {
    /// Human-readable description of the image being written
    fn reference(&self) -> String;

    /// Accepted manifest types; empty means any
    fn supported_manifest_mime_types(&self) -> Vec<String>;

    /// `Ok(())` when signatures can be stored, otherwise the reason they cannot
    fn supports_signatures(&self) -> Result<()>;

    fn desired_layer_compression(&self) -> LayerCompression;

    fn accepts_foreign_layer_urls(&self) -> bool;

    fn must_match_runtime_os(&self) -> bool;

    fn ignores_embedded_docker_reference(&self) -> bool;

    /// Whether `put_blob` may be called concurrently
    fn has_thread_safe_put_blob(&self) -> bool;

    /// Store one blob. Returns the descriptor to record in the manifest.
    async fn put_blob(&mut self, stream: BlobStream, info: Descriptor, is_config: bool) -> Result<Descriptor>;

    /// Descriptor of an already-present copy of the blob, if any
    async fn try_reusing_blob(&mut self, _info: &Descriptor) -> Result<Option<Descriptor>> {
        Ok(None)
    }

    async fn put_manifest(&mut self, manifest: &[u8]) -> Result<()>;

    async fn put_signatures(&mut self, signatures: &[Vec<u8>]) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    /// Where the image can be found once written, if the transport assigns it
    fn published_reference(&self) -> Option<String> {
        None
    }
}
