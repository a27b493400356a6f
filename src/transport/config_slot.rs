//! Config address tracking for a single push

use crate::cas::ContentId;
use crate::error::{GantryError, Result};

/// Records which uploaded blob was the image config.
///
/// Owned by exactly one destination, so concurrent pushes never see each
/// other's config address.
#[derive(Debug, Default, Clone)]
pub struct ConfigSlot {
    address: Option<ContentId>,
    digest: Option<String>,
    recorded: usize,
}

impl ConfigSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the address of a config-flagged blob, replacing any earlier one
    pub fn record(&mut self, address: ContentId, digest: &str) {
        self.address = Some(address);
        self.digest = Some(digest.to_string());
        self.recorded += 1;
    }

    /// The config address for a manifest whose config digest is `manifest_digest`.
    ///
    /// Fails unless exactly one blob was flagged as config and it is the blob
    /// the manifest names.
    pub fn resolve_for(&self, manifest_digest: &str) -> Result<&ContentId> {
        match self.recorded {
            0 => return Err(GantryError::ConfigNotRecorded),
            1 => {}
            count => return Err(GantryError::MultipleConfigBlobs { count }),
        }
        let digest = self.digest.as_deref().unwrap_or_default();
        if digest != manifest_digest {
            return Err(GantryError::ConfigDigestMismatch {
                manifest: manifest_digest.to_string(),
                uploaded: digest.to_string(),
            });
        }
        self.address.as_ref().ok_or(GantryError::ConfigNotRecorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> ContentId {
        ContentId::parse(s).unwrap()
    }

    #[test]
    fn test_empty_slot_is_an_error() {
        let slot = ConfigSlot::new();
        assert!(matches!(slot.resolve_for("sha256:abc"), Err(GantryError::ConfigNotRecorded)));
    }

    #[test]
    fn test_single_config_resolves() {
        let mut slot = ConfigSlot::new();
        slot.record(cid("QmConfig"), "sha256:abc");
        assert_eq!(slot.resolve_for("sha256:abc").unwrap().as_str(), "QmConfig");
    }

    #[test]
    fn test_second_config_is_rejected() {
        let mut slot = ConfigSlot::new();
        slot.record(cid("QmFirst"), "sha256:abc");
        slot.record(cid("QmSecond"), "sha256:def");
        assert_eq!(slot.address.as_ref().unwrap().as_str(), "QmSecond");
        assert!(matches!(
            slot.resolve_for("sha256:def"),
            Err(GantryError::MultipleConfigBlobs { count: 2 })
        ));
    }

    #[test]
    fn test_digest_must_match_manifest() {
        let mut slot = ConfigSlot::new();
        slot.record(cid("QmConfig"), "sha256:abc");
        assert!(matches!(
            slot.resolve_for("sha256:other"),
            Err(GantryError::ConfigDigestMismatch { .. })
        ));
    }
}
