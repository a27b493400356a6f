//! SHA256 digest utilities
//!
//! Blob and manifest digests use the `sha256:<hex>` form throughout the crate.

use crate::error::{GantryError, Result};
use sha2::{Digest, Sha256};

pub const SHA256_PREFIX: &str = "sha256:";

/// Helpers for computing and checking `sha256:` digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 digest from byte data, hex only
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute full digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("{}{}", SHA256_PREFIX, Self::compute_sha256(data))
    }

    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Extract the hex part from a full digest
    pub fn extract_hex_part(digest: &str) -> Result<&str> {
        match digest.strip_prefix(SHA256_PREFIX) {
            Some(hex_part) if Self::is_valid_sha256_hex(hex_part) => Ok(hex_part),
            Some(_) => Err(GantryError::Validation(format!(
                "Invalid SHA256 hex part in digest: {}",
                digest
            ))),
            None => Err(GantryError::Validation(format!(
                "Digest missing sha256: prefix: {}",
                digest
            ))),
        }
    }

    /// Verify data matches expected digest
    pub fn verify_data_integrity(data: &[u8], expected_digest: &str) -> Result<()> {
        Self::extract_hex_part(expected_digest)?;
        let actual = Self::compute_docker_digest(data);
        if actual != expected_digest {
            return Err(GantryError::DigestMismatch {
                expected: expected_digest.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Format digest for display (truncated for readability)
    pub fn format_digest_short(digest: &str) -> String {
        if digest.len() > 19 {
            format!("{}...", &digest[..19])
        } else {
            digest.to_string()
        }
    }
}

/// Incremental digest computation over streamed chunks
#[derive(Default)]
pub struct DigestWriter {
    hasher: Sha256,
    written: u64,
}

impl DigestWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> String {
        format!("{}{}", SHA256_PREFIX, hex::encode(self.hasher.finalize()))
    }
}
