use serde::{Deserialize, Serialize};

use crate::digest::DigestWithSize;
use crate::file_name::relative_tar_path;
use crate::tar_id::TarId;

/// Instruction for the tape subsystem to copy one tar to tape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteOrder {
    /// Target tape bucket.
    pub bucket: String,
    /// Tar path relative to the input tar storage folder.
    pub file_path: String,
    pub size: u64,
    pub digest: String,
    pub tar_id: TarId,
}

impl WriteOrder {
    #[must_use]
    pub fn for_tar(
        bucket: impl Into<String>,
        file_bucket: &str,
        tar_id: &TarId,
        digest: &DigestWithSize,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            file_path: relative_tar_path(file_bucket, tar_id),
            size: digest.size,
            digest: digest.digest.clone(),
            tar_id: tar_id.clone(),
        }
    }
}
