//! TOML configuration of the tape offer.
//!
//! ```toml
//! input_tar_storage_folder = "/var/lib/tapestore/inputTars"
//! digest_type = "sha512"
//! recovery_mode = "sequential"
//!
//! [[buckets]]
//! name = "test"
//! file_buckets = ["test-objects", "test-metadata"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tapestore_error::{Result, TapeError};
use tapestore_types::DigestType;

use crate::recovery::RecoveryMode;
use crate::topology::BucketTopology;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketConfig {
    pub name: String,
    pub file_buckets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TapeStoreConfig {
    /// Root folder holding one sub-directory per file bucket.
    pub input_tar_storage_folder: PathBuf,
    #[serde(default)]
    pub digest_type: DigestType,
    #[serde(default)]
    pub recovery_mode: RecoveryMode,
    /// Directory of the JSON-document referential.
    #[serde(default)]
    pub referential_dir: Option<PathBuf>,
    /// Directory of the durable write order queue.
    #[serde(default)]
    pub queue_dir: Option<PathBuf>,
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
}

impl TapeStoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|err| TapeError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            TapeError::config(format!("cannot read '{}': {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_tar_storage_folder.as_os_str().is_empty() {
            return Err(TapeError::config("input_tar_storage_folder is empty"));
        }
        if self.buckets.is_empty() {
            return Err(TapeError::config("no bucket declared"));
        }
        self.topology().map(drop)
    }

    pub fn topology(&self) -> Result<BucketTopology> {
        BucketTopology::new(
            self.buckets
                .iter()
                .map(|bucket| (bucket.name.clone(), bucket.file_buckets.clone())),
        )
    }
}
