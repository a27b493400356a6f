//! Content-addressed storage
//!
//! This module defines the [`ContentId`] handle and the [`ContentStore`] trait the
//! image transport consumes, plus two implementations: [`IpfsClient`] talking to
//! an IPFS node's HTTP RPC API, and [`MemoryContentStore`] for in-process use.

pub mod ipfs;
pub mod memory;

pub use ipfs::IpfsClient;
pub use memory::MemoryContentStore;

use crate::blob::BlobStream;
use crate::error::{GantryError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

const IPFS_PATH_PREFIX: &str = "/ipfs/";

/// Opaque identifier naming a piece of content in the store.
///
/// Derived from the stored bytes: equal identifiers mean identical content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Parse a raw identifier, accepting the `/ipfs/<cid>` path form as well
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let id = trimmed.strip_prefix(IPFS_PATH_PREFIX).unwrap_or(trimmed);
        if id.is_empty() {
            return Err(GantryError::Validation("content identifier is empty".to_string()));
        }
        if id.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(GantryError::Validation(format!(
                "invalid content identifier: {}",
                raw
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `/ipfs/<cid>` path form
    pub fn to_path(&self) -> String {
        format!("{}{}", IPFS_PATH_PREFIX, self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ContentId {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Content-addressed storage operations used by the image transport
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes and return the identifier derived from them
    async fn put(&self, data: Bytes) -> Result<ContentId>;

    /// Fetch content by identifier as a stream with its byte size
    async fn get(&self, id: &ContentId) -> Result<BlobStream>;

    /// Resolve a mutable name to the identifier it currently points at
    async fn resolve_name(&self, name: &str) -> Result<ContentId>;
}
