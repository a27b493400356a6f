//! In-process content-addressed store

use super::{ContentId, ContentStore};
use crate::blob::BlobStream;
use crate::digest::DigestUtils;
use crate::error::{GantryError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Content store held in memory.
///
/// Identifiers are `sha256-<hex>` of the stored bytes, so storing the same
/// bytes twice yields the same identifier.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentId, Bytes>>,
    names: RwLock<HashMap<String, ContentId>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_for(data: &[u8]) -> ContentId {
        ContentId(format!("sha256-{}", DigestUtils::compute_sha256(data)))
    }

    /// Point a mutable name at an identifier
    pub async fn publish_name(&self, name: &str, id: ContentId) {
        self.names.write().await.insert(name.to_string(), id);
    }

    /// Number of `put` calls served, including repeats of identical content
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `get` calls served, found or not
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of distinct pieces of content held
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn contains(&self, id: &ContentId) -> bool {
        self.blobs.read().await.contains_key(id)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, data: Bytes) -> Result<ContentId> {
        let id = Self::id_for(&data);
        self.blobs.write().await.entry(id.clone()).or_insert(data);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<BlobStream> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let blobs = self.blobs.read().await;
        let data = blobs
            .get(id)
            .cloned()
            .ok_or_else(|| GantryError::NotFound(format!("content {}", id)))?;
        Ok(BlobStream::from_bytes(data))
    }

    async fn resolve_name(&self, name: &str) -> Result<ContentId> {
        let key = name.trim().trim_start_matches("/ipns/");
        self.names
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| GantryError::NotFound(format!("name {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_exact_bytes_and_size() {
        let store = MemoryContentStore::new();
        let data = Bytes::from_static(b"layer contents");
        let id = store.put(data.clone()).await.unwrap();

        let blob = store.get(&id).await.unwrap();
        assert_eq!(blob.size(), data.len() as u64);
        assert_eq!(blob.into_bytes().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_identifiers_are_content_derived() {
        let store = MemoryContentStore::new();
        let a = store.put(Bytes::from_static(b"same")).await.unwrap();
        let b = store.put(Bytes::from_static(b"same")).await.unwrap();
        let c = store.put(Bytes::from_static(b"different")).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.put_count(), 3);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_missing_content_and_names() {
        let store = MemoryContentStore::new();
        let unknown = ContentId::parse("sha256-missing").unwrap();
        assert!(matches!(store.get(&unknown).await, Err(GantryError::NotFound(_))));
        assert!(store.resolve_name("k51missing").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_published_name() {
        let store = MemoryContentStore::new();
        let id = store.put(Bytes::from_static(b"manifest")).await.unwrap();
        store.publish_name("k51example", id.clone()).await;
        assert_eq!(store.resolve_name("/ipns/k51example").await.unwrap(), id);
    }
}
