//! Tar referential: the persisted record of where every tar lives.
//!
//! The referential is consulted by bootstrap recovery to decide what to do
//! with each tar found on disk, and updated by the tar builder and the tape
//! writer as tars move forward through their lifecycle. Location updates are
//! forward-only; recovery never deletes entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tapestore_error::{Result, TapeError};
use tapestore_types::{DigestWithSize, TarId, TarLocation, TarReferentialEntry};

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileTarReferential;
pub use memory::MemoryTarReferential;

/// Lookup and forward-only update of tar lifecycle records.
pub trait TarReferential: Send + Sync {
    /// Fetch the entry of a tar.
    ///
    /// # Errors
    ///
    /// Returns `Referential` when the backing store fails and
    /// `InvalidReferentialEntry` when a stored entry cannot be decoded.
    fn find(&self, tar_id: &TarId) -> Result<Option<TarReferentialEntry>>;

    /// Record a new tar.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateReferentialEntry` if the id is already known.
    fn insert(&self, entry: TarReferentialEntry) -> Result<()>;

    /// Mark a building tar as closed with its final size and digest.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the tar is `BuildingOnDisk`.
    fn update_location_ready_on_disk(
        &self,
        tar_id: &TarId,
        digest: &DigestWithSize,
    ) -> Result<TarReferentialEntry>;

    /// Mark a ready tar as written to tape.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the tar is `ReadyOnDisk`.
    fn update_location_on_tape(
        &self,
        tar_id: &TarId,
        tape_code: &str,
        file_position: u32,
    ) -> Result<TarReferentialEntry>;

    /// Fetch several entries at once; unknown ids are absent from the map.
    fn bulk_find(&self, tar_ids: &[TarId]) -> Result<BTreeMap<TarId, TarReferentialEntry>> {
        let mut found = BTreeMap::new();
        for tar_id in tar_ids {
            if let Some(entry) = self.find(tar_id)? {
                found.insert(tar_id.clone(), entry);
            }
        }
        Ok(found)
    }
}

/// Requested location change for [`advance_location`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationUpdate<'a> {
    ReadyOnDisk(&'a DigestWithSize),
    OnTape { tape_code: &'a str, file_position: u32 },
}

impl LocationUpdate<'_> {
    fn target(&self) -> TarLocation {
        match self {
            Self::ReadyOnDisk(_) => TarLocation::ReadyOnDisk,
            Self::OnTape {
                tape_code,
                file_position,
            } => TarLocation::OnTape {
                tape_code: (*tape_code).to_owned(),
                file_position: *file_position,
            },
        }
    }
}

/// Compute the entry that results from applying `update` to `current`,
/// rejecting anything but a single forward step.
pub fn advance_location(
    current: &TarReferentialEntry,
    update: &LocationUpdate<'_>,
    now: DateTime<Utc>,
) -> Result<TarReferentialEntry> {
    let target = update.target();
    if !current.location.can_transition_to(&target) {
        return Err(TapeError::InvalidStateTransition {
            tar_id: current.tar_id.to_string(),
            from: current.location.to_string(),
            to: target.to_string(),
        });
    }

    let mut next = current.clone();
    next.location = target;
    next.last_update = now;
    if let LocationUpdate::ReadyOnDisk(digest) = update {
        next.size = Some(digest.size);
        next.digest = Some(digest.digest.clone());
        next.digest_type = digest.digest_type;
    }
    Ok(next)
}

fn unknown_tar(tar_id: &TarId) -> TapeError {
    TapeError::referential(format!("no referential entry for tar {tar_id}"))
}
