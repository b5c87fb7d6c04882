//! Tar referential entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tapestore_error::{Result, TapeError};

use crate::digest::{DigestType, DigestWithSize};
use crate::location::TarLocation;
use crate::tar_id::TarId;

/// Lifecycle record of one tar, keyed by its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TarReferentialEntry {
    pub tar_id: TarId,
    pub location: TarLocation,
    /// Known once the tar is ready on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Known once the tar is ready on disk (lowercase hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default)]
    pub digest_type: DigestType,
    pub last_update: DateTime<Utc>,
}

impl TarReferentialEntry {
    /// New entry for a tar that just started being built.
    #[must_use]
    pub fn building(tar_id: TarId, digest_type: DigestType, now: DateTime<Utc>) -> Self {
        Self {
            tar_id,
            location: TarLocation::BuildingOnDisk,
            size: None,
            digest: None,
            digest_type,
            last_update: now,
        }
    }

    /// New entry for a tar that was closed with a known size and digest.
    #[must_use]
    pub fn ready(tar_id: TarId, digest: &DigestWithSize, now: DateTime<Utc>) -> Self {
        Self {
            tar_id,
            location: TarLocation::ReadyOnDisk,
            size: Some(digest.size),
            digest: Some(digest.digest.clone()),
            digest_type: digest.digest_type,
            last_update: now,
        }
    }

    /// Size and digest recorded for the tar, if both are present.
    #[must_use]
    pub fn recorded_digest(&self) -> Option<DigestWithSize> {
        match (self.size, &self.digest) {
            (Some(size), Some(digest)) => {
                Some(DigestWithSize::new(size, digest.clone(), self.digest_type))
            }
            _ => None,
        }
    }

    /// Size and digest of a tar past the building stage. Their absence means
    /// the referential is inconsistent.
    pub fn ready_size_and_digest(&self) -> Result<DigestWithSize> {
        self.recorded_digest()
            .ok_or_else(|| TapeError::InvalidReferentialEntry {
                tar_id: self.tar_id.to_string(),
                detail: format!("{} entry without size/digest", self.location.kind_str()),
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn tar_id() -> TarId {
        TarId::parse("20190625115513001-abc.tar").expect("id")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 6, 25, 12, 0, 0).single().expect("instant")
    }

    #[test]
    fn test_building_entry_has_no_digest() {
        let entry = TarReferentialEntry::building(tar_id(), DigestType::Sha512, now());
        assert_eq!(entry.location, TarLocation::BuildingOnDisk);
        assert!(entry.recorded_digest().is_none());
        let err = entry.ready_size_and_digest().expect_err("no digest yet");
        assert!(matches!(err, TapeError::InvalidReferentialEntry { .. }));
    }

    #[test]
    fn test_ready_entry_exposes_digest() {
        let digest = DigestWithSize::new(100, "ab", DigestType::Sha256);
        let entry = TarReferentialEntry::ready(tar_id(), &digest, now());
        assert_eq!(entry.ready_size_and_digest().expect("digest"), digest);
    }

    #[test]
    fn test_json_document_layout() {
        let entry = TarReferentialEntry::building(tar_id(), DigestType::Sha512, now());
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["tar_id"], "20190625115513001-abc.tar");
        assert_eq!(json["location"]["type"], "building_on_disk");
        assert!(json.get("size").is_none());
        let back: TarReferentialEntry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, entry);
    }
}
