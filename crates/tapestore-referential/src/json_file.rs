//! Directory of JSON documents, one per tar.
//!
//! Each entry lives in `<dir>/<tar_id>.json`. Writes go to a hidden sibling
//! temp file which is fsynced and then renamed over the document, and the
//! directory is fsynced after the rename.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use tapestore_error::{Result, TapeError};
use tapestore_types::{DigestWithSize, TarId, TarReferentialEntry};
use tracing::{debug, warn};

use crate::{LocationUpdate, TarReferential, advance_location, unknown_tar};

const DOCUMENT_EXTENSION: &str = ".json";

#[derive(Debug)]
pub struct JsonFileTarReferential {
    dir: PathBuf,
    // Serializes read-modify-write cycles across threads of this process.
    write_lock: Mutex<()>,
}

impl JsonFileTarReferential {
    /// Open (and create if needed) a referential directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| TapeError::file_io("create_dir", &dir, err))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, tar_id: &TarId) -> PathBuf {
        self.dir
            .join(format!("{}{DOCUMENT_EXTENSION}", tar_id.as_str()))
    }

    /// Every decodable entry in the directory, ordered by tar id.
    pub fn list(&self) -> Result<Vec<TarReferentialEntry>> {
        let read_dir =
            fs::read_dir(&self.dir).map_err(|err| TapeError::file_io("read_dir", &self.dir, err))?;
        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|err| TapeError::file_io("read_dir", &self.dir, err))?;
            let name = dir_entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|name| name.strip_suffix(DOCUMENT_EXTENSION))
            else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            let tar_id = TarId::parse(stem)?;
            if let Some(entry) = self.find(&tar_id)? {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.tar_id.cmp(&b.tar_id));
        Ok(entries)
    }

    fn read_document(&self, tar_id: &TarId) -> Result<Option<TarReferentialEntry>> {
        let path = self.document_path(tar_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(TapeError::referential(format!(
                    "cannot read '{}': {err}",
                    path.display()
                )));
            }
        };
        let entry: TarReferentialEntry =
            serde_json::from_slice(&bytes).map_err(|err| TapeError::InvalidReferentialEntry {
                tar_id: tar_id.to_string(),
                detail: err.to_string(),
            })?;
        if entry.tar_id != *tar_id {
            return Err(TapeError::InvalidReferentialEntry {
                tar_id: tar_id.to_string(),
                detail: format!("document holds tar id {}", entry.tar_id),
            });
        }
        Ok(Some(entry))
    }

    fn write_document(&self, entry: &TarReferentialEntry) -> Result<()> {
        let path = self.document_path(&entry.tar_id);
        let tmp = self
            .dir
            .join(format!(".{}{DOCUMENT_EXTENSION}.tmp", entry.tar_id.as_str()));
        let bytes = serde_json::to_vec_pretty(entry)
            .map_err(|err| TapeError::internal(format!("encode referential entry: {err}")))?;

        let written = write_and_sync(&tmp, &bytes)
            .and_then(|()| fs::rename(&tmp, &path))
            .and_then(|()| sync_dir(&self.dir));
        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "could not remove temp document");
                }
            }
            return Err(TapeError::referential(format!(
                "cannot write '{}': {err}",
                path.display()
            )));
        }
        debug!(tar_id = %entry.tar_id, location = %entry.location, "referential document written");
        Ok(())
    }

    fn update(&self, tar_id: &TarId, update: &LocationUpdate<'_>) -> Result<TarReferentialEntry> {
        let _guard = self.write_lock.lock();
        let current = self.read_document(tar_id)?.ok_or_else(|| unknown_tar(tar_id))?;
        let next = advance_location(&current, update, Utc::now())?;
        self.write_document(&next)?;
        Ok(next)
    }
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

impl TarReferential for JsonFileTarReferential {
    fn find(&self, tar_id: &TarId) -> Result<Option<TarReferentialEntry>> {
        self.read_document(tar_id)
    }

    fn insert(&self, entry: TarReferentialEntry) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.document_path(&entry.tar_id).exists() {
            return Err(TapeError::DuplicateReferentialEntry {
                tar_id: entry.tar_id.to_string(),
            });
        }
        self.write_document(&entry)
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

#[cfg(test)]
mod tests {
    use tapestore_types::{DigestType, TarLocation};

    use super::*;

    fn tar_id() -> TarId {
        TarId::parse("20190625115513001-json.tar").expect("tar id")
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let digest = DigestWithSize::new(4096, "c0ffee", DigestType::Sha512);
        {
            let referential = JsonFileTarReferential::open(dir.path()).expect("open");
            referential
                .insert(TarReferentialEntry::building(
                    tar_id(),
                    DigestType::Sha512,
                    Utc::now(),
                ))
                .expect("insert");
            referential
                .update_location_ready_on_disk(&tar_id(), &digest)
                .expect("ready");
        }

        let reopened = JsonFileTarReferential::open(dir.path()).expect("reopen");
        let entry = reopened.find(&tar_id()).expect("find").expect("present");
        assert_eq!(entry.location, TarLocation::ReadyOnDisk);
        assert_eq!(entry.recorded_digest(), Some(digest));
        assert_eq!(reopened.list().expect("list").len(), 1);
        assert!(
            dir.path()
                .join("20190625115513001-json.tar.json")
                .is_file()
        );
    }

    #[test]
    fn test_missing_document_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let referential = JsonFileTarReferential::open(dir.path()).expect("open");
        assert!(referential.find(&tar_id()).expect("find").is_none());
    }

    #[test]
    fn test_unknown_location_kind_is_invalid_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let referential = JsonFileTarReferential::open(dir.path()).expect("open");
        fs::write(
            dir.path().join("20190625115513001-json.tar.json"),
            br#"{"tar_id":"20190625115513001-json.tar","location":{"type":"on_mars"},"last_update":"2019-06-25T12:00:00Z"}"#,
        )
        .expect("write document");
        let err = referential.find(&tar_id()).expect_err("undecodable");
        assert!(matches!(err, TapeError::InvalidReferentialEntry { .. }));
    }

    #[test]
    fn test_backward_update_leaves_document_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let referential = JsonFileTarReferential::open(dir.path()).expect("open");
        let digest = DigestWithSize::new(1, "aa", DigestType::Sha512);
        referential
            .insert(TarReferentialEntry::ready(tar_id(), &digest, Utc::now()))
            .expect("insert");
        let err = referential
            .update_location_ready_on_disk(&tar_id(), &digest)
            .expect_err("ready -> ready");
        assert!(matches!(err, TapeError::InvalidStateTransition { .. }));
        let entry = referential.find(&tar_id()).expect("find").expect("present");
        assert_eq!(entry.location, TarLocation::ReadyOnDisk);
    }
}
