use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;
use tapestore_error::{Result, TapeError};
use tapestore_types::{DigestWithSize, TarId, TarReferentialEntry};
use tracing::debug;

use crate::{LocationUpdate, TarReferential, advance_location, unknown_tar};

/// In-process referential backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryTarReferential {
    entries: RwLock<BTreeMap<TarId, TarReferentialEntry>>,
}

impl MemoryTarReferential {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Referential pre-populated with `entries`; later duplicates win.
    pub fn with_entries(entries: impl IntoIterator<Item = TarReferentialEntry>) -> Self {
        let map = entries
            .into_iter()
            .map(|entry| (entry.tar_id.clone(), entry))
            .collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every entry, ordered by tar id.
    pub fn snapshot(&self) -> Vec<TarReferentialEntry> {
        self.entries.read().values().cloned().collect()
    }

    fn update(&self, tar_id: &TarId, update: &LocationUpdate<'_>) -> Result<TarReferentialEntry> {
        let mut entries = self.entries.write();
        let current = entries.get(tar_id).ok_or_else(|| unknown_tar(tar_id))?;
        let next = advance_location(current, update, Utc::now())?;
        debug!(tar_id = %tar_id, location = %next.location, "tar location updated");
        entries.insert(tar_id.clone(), next.clone());
        Ok(next)
    }
}

impl TarReferential for MemoryTarReferential {
    fn find(&self, tar_id: &TarId) -> Result<Option<TarReferentialEntry>> {
        Ok(self.entries.read().get(tar_id).cloned())
    }

    fn insert(&self, entry: TarReferentialEntry) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&entry.tar_id) {
            return Err(TapeError::DuplicateReferentialEntry {
                tar_id: entry.tar_id.to_string(),
            });
        }
        entries.insert(entry.tar_id.clone(), entry);
        Ok(())
    }

    fn update_location_ready_on_disk(
        &self,
        tar_id: &TarId,
        digest: &DigestWithSize,
    ) -> Result<TarReferentialEntry> {
        self.update(tar_id, &LocationUpdate::ReadyOnDisk(digest))
    }

    fn update_location_on_tape(
        &self,
        tar_id: &TarId,
        tape_code: &str,
        file_position: u32,
    ) -> Result<TarReferentialEntry> {
        self.update(
            tar_id,
            &LocationUpdate::OnTape {
                tape_code,
                file_position,
            },
        )
    }
}
