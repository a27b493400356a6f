//! Error types for image transport, storage and copy operations

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GantryError {
    /// A blob descriptor carries no content identifier in its location hints
    #[error("Missing location: blob {digest} has no content identifier in its URLs")]
    MissingLocation { digest: String },

    /// A non-root manifest or signature instance was requested
    #[error("Unsupported instance: {0} (only the root manifest is stored)")]
    UnsupportedInstance(String),

    /// Manifest or JSON document does not match the expected schema
    #[error("Parse error: {0}")]
    Parse(String),

    /// Document could not be re-encoded
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Content-addressed storage failure
    #[error("Content store error: {0}")]
    Storage(String),

    /// Local image store failure
    #[error("Local store error: {message}")]
    Store {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("No blob was flagged as the image config before the manifest was written")]
    ConfigNotRecorded,

    #[error("{count} blobs were flagged as the image config, expected exactly one")]
    MultipleConfigBlobs { count: usize },

    #[error("Manifest config {manifest} does not match uploaded config blob {uploaded}")]
    ConfigDigestMismatch { manifest: String, uploaded: String },

    #[error("Destination already published {0}")]
    AlreadyPublished(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Policy rejected image {0}")]
    PolicyRejected(String),

    #[error("require cid or name to resolve")]
    MissingPullSource,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl GantryError {
    pub fn store(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        GantryError::Store {
            message: message.into(),
            path,
        }
    }
}

impl From<serde_json::Error> for GantryError {
    fn from(err: serde_json::Error) -> Self {
        GantryError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for GantryError {
    fn from(err: url::ParseError) -> Self {
        GantryError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GantryError>;
