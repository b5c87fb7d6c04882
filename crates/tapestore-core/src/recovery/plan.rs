//! Pure planning passes of bootstrap recovery.
//!
//! Nothing here touches the filesystem or the referential: grouping and
//! ordering work on file names, resolution works on referential entries
//! that were already fetched.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use tapestore_error::{Result, TapeError};
use tapestore_types::{
    DigestWithSize, TarFileKind, TarFileName, TarId, TarLocation, TarReferentialEntry,
};

/// Files found on disk for one tar id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarFileGroup {
    pub tar_id: TarId,
    pub finished: bool,
    pub temporary: bool,
}

impl TarFileGroup {
    fn new(tar_id: TarId) -> Self {
        Self {
            tar_id,
            finished: false,
            temporary: false,
        }
    }
}

/// The file that represents a tar once its group is reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTarFile {
    pub tar_id: TarId,
    pub kind: TarFileKind,
    /// A finished file exists next to the temporary one and must be deleted
    /// before the temporary file is repaired.
    pub stale_finished: bool,
}

impl PlannedTarFile {
    pub fn file_name(&self) -> String {
        TarFileName {
            tar_id: self.tar_id.clone(),
            kind: self.kind,
        }
        .file_name()
    }
}

/// What to do with a finished tar, decided from its referential entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already on tape: the disk copy is deleted.
    DeleteOnTape { tape_code: String },
    /// Ready on disk: resubmit with the recorded size and digest.
    Resubmit(DigestWithSize),
    /// Closed but never marked ready: verify, then submit. Recorded values,
    /// if any, must match.
    Reverify(Option<DigestWithSize>),
}

/// Group directory entry names by tar id. Any name that is neither a
/// finished nor a temporary tar is an `UnexpectedTarFile`.
pub fn group_tar_files<'a, I>(dir: &Path, names: I) -> Result<BTreeMap<TarId, TarFileGroup>>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().try_fold(BTreeMap::new(), |mut groups, name| {
        let parsed = TarFileName::parse(name).ok_or_else(|| TapeError::UnexpectedTarFile {
            path: dir.join(name),
        })?;
        let group = groups
            .entry(parsed.tar_id.clone())
            .or_insert_with(|| TarFileGroup::new(parsed.tar_id));
        match parsed.kind {
            TarFileKind::Finished => group.finished = true,
            TarFileKind::Temporary => group.temporary = true,
        }
        Ok(groups)
    })
}

/// Pick the authoritative file of every group (the temporary file wins over a
/// finished one) and order the result by creation date.
pub fn reconcile_groups(groups: BTreeMap<TarId, TarFileGroup>) -> Vec<PlannedTarFile> {
    let mut planned: Vec<PlannedTarFile> = groups
        .into_values()
        .map(|group| {
            if group.temporary {
                PlannedTarFile {
                    tar_id: group.tar_id,
                    kind: TarFileKind::Temporary,
                    stale_finished: group.finished,
                }
            } else {
                PlannedTarFile {
                    tar_id: group.tar_id,
                    kind: TarFileKind::Finished,
                    stale_finished: false,
                }
            }
        })
        .collect();
    planned.sort_by(compare_by_creation_date);
    planned
}

/// Creation date of the tar ids first, file name second.
pub fn compare_by_creation_date(left: &PlannedTarFile, right: &PlannedTarFile) -> Ordering {
    left.tar_id
        .creation_date_key()
        .cmp(right.tar_id.creation_date_key())
        .then_with(|| left.file_name().cmp(&right.file_name()))
}

/// Decide what to do with a finished tar. A ready entry without size and
/// digest cannot be resubmitted and is reported as inconsistent.
pub fn resolve_finished(entry: &TarReferentialEntry) -> Result<Resolution> {
    match &entry.location {
        TarLocation::OnTape { tape_code, .. } => Ok(Resolution::DeleteOnTape {
            tape_code: tape_code.clone(),
        }),
        TarLocation::ReadyOnDisk => entry.ready_size_and_digest().map(Resolution::Resubmit),
        TarLocation::BuildingOnDisk => Ok(Resolution::Reverify(entry.recorded_digest())),
    }
}
