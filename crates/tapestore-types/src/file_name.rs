//! File naming inside a file bucket's tar storage folder.
//!
//! - `<tarId>` is a finished tar (closed and flushed).
//! - `<tarId>.tmp` is a tar still being written, or interrupted by a crash.

use std::fmt;

use crate::tar_id::TarId;

/// Extension carried by every tar id, hence by every finished tar file.
pub const TAR_EXTENSION: &str = ".tar";
/// Extension appended to a tar id while the tar is being written.
pub const TMP_EXTENSION: &str = ".tmp";

/// Physical representation of a tar in a storage folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TarFileKind {
    /// `<tarId>`: closed, structurally complete.
    Finished,
    /// `<tarId>.tmp`: never confirmed complete.
    Temporary,
}

impl fmt::Display for TarFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => f.write_str("finished"),
            Self::Temporary => f.write_str("temporary"),
        }
    }
}

/// A classified directory entry name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TarFileName {
    pub tar_id: TarId,
    pub kind: TarFileKind,
}

impl TarFileName {
    /// Classify a file name. Returns `None` for names that are neither a
    /// finished nor a temporary tar.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let id = tar_file_name_to_tar_id(file_name);
        let kind = if id.len() == file_name.len() {
            TarFileKind::Finished
        } else {
            TarFileKind::Temporary
        };
        let tar_id = TarId::parse(id).ok()?;
        Some(Self { tar_id, kind })
    }

    /// Reconstruct the on-disk file name.
    #[must_use]
    pub fn file_name(&self) -> String {
        match self.kind {
            TarFileKind::Finished => self.tar_id.file_name().to_owned(),
            TarFileKind::Temporary => self.tar_id.tmp_file_name(),
        }
    }
}

/// Strip the temporary extension, if any.
#[must_use]
pub fn tar_file_name_to_tar_id(file_name: &str) -> &str {
    file_name.strip_suffix(TMP_EXTENSION).unwrap_or(file_name)
}

/// Path of a tar relative to the input tar storage folder.
#[must_use]
pub fn relative_tar_path(file_bucket: &str, tar_id: &TarId) -> String {
    format!("{file_bucket}/{}", tar_id.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "20190625115513001-aeaaaaaaaahk.tar";

    #[test]
    fn test_classify_finished_and_temporary() {
        let finished = TarFileName::parse(ID).expect("finished");
        assert_eq!(finished.kind, TarFileKind::Finished);
        assert_eq!(finished.tar_id.as_str(), ID);
        assert_eq!(finished.file_name(), ID);

        let tmp_name = format!("{ID}.tmp");
        let tmp = TarFileName::parse(&tmp_name).expect("temporary");
        assert_eq!(tmp.kind, TarFileKind::Temporary);
        assert_eq!(tmp.tar_id, finished.tar_id);
        assert_eq!(tmp.file_name(), tmp_name);
    }

    #[test]
    fn test_classify_rejects_foreign_files() {
        for name in [
            "README",
            "20190625115513001-abc.zip",
            "20190625115513001-abc.tar.tmp.tmp",
            ".tmp",
            "lost+found",
        ] {
            assert!(TarFileName::parse(name).is_none(), "{name}");
        }
    }

    #[test]
    fn test_strip_tmp_extension() {
        assert_eq!(tar_file_name_to_tar_id(&format!("{ID}.tmp")), ID);
        assert_eq!(tar_file_name_to_tar_id(ID), ID);
    }

    #[test]
    fn test_relative_path() {
        let id = TarId::parse(ID).expect("id");
        assert_eq!(
            relative_tar_path("test-objects", &id),
            format!("test-objects/{ID}")
        );
    }
}
