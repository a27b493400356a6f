//! Streaming blob bodies with a known size

use crate::error::Result;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

/// Upper bound on buffer space reserved up front from a declared size
pub(crate) const MAX_PREALLOCATION: u64 = 8 << 20;

/// Initial buffer for a body declared to be `size` bytes long
pub(crate) fn buffer_for(size: u64) -> BytesMut {
    BytesMut::with_capacity(size.min(MAX_PREALLOCATION) as usize)
}

/// A blob body delivered as a stream of chunks plus its declared byte size
pub struct BlobStream {
    inner: BoxStream<'static, Result<Bytes>>,
    size: u64,
}

impl BlobStream {
    pub fn new(inner: BoxStream<'static, Result<Bytes>>, size: u64) -> Self {
        Self { inner, size }
    }

    /// Wrap an in-memory buffer as a single-chunk stream
    pub fn from_bytes(data: Bytes) -> Self {
        let size = data.len() as u64;
        Self {
            inner: stream::once(async move { Ok(data) }).boxed(),
            size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn into_inner(self) -> BoxStream<'static, Result<Bytes>> {
        self.inner
    }

    /// Drain the stream into one contiguous buffer
    pub async fn into_bytes(self) -> Result<Bytes> {
        let mut buf = buffer_for(self.size);
        let mut inner = self.inner;
        while let Some(chunk) = inner.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStream").field("size", &self.size).finish()
    }
}
