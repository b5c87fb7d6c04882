use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for tar lifecycle and bootstrap recovery operations.
///
/// Variants are grouped by the recovery taxonomy: consistency errors abort the
/// whole process, I/O errors abort the affected bucket, verification and queue
/// failures are never downgraded to warnings.
#[derive(Error, Debug)]
pub enum TapeError {
    // === I/O Errors ===
    /// Bare I/O error without path context.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O error bound to the file it happened on.
    #[error("I/O error during {op} on '{path}': {source}")]
    FileIo {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // === Consistency Errors ===
    /// A string does not follow the tar id format.
    #[error("invalid tar id '{value}': {reason}")]
    InvalidTarId { value: String, reason: String },

    /// A file in a recovery directory is neither a finished nor a temporary tar.
    #[error("unexpected file in tar storage folder: '{path}'")]
    UnexpectedTarFile { path: PathBuf },

    /// A finished tar file exists on disk but the referential does not know it.
    #[error("unknown tar file in tar referential: '{path}' (tar id {tar_id})")]
    MissingReferentialEntry { tar_id: String, path: PathBuf },

    /// A referential entry is present but cannot be interpreted.
    #[error("invalid referential entry for tar {tar_id}: {detail}")]
    InvalidReferentialEntry { tar_id: String, detail: String },

    /// A location update would move a tar backwards in its lifecycle.
    #[error("invalid tar location transition for {tar_id}: {from} -> {to}")]
    InvalidStateTransition {
        tar_id: String,
        from: String,
        to: String,
    },

    /// An entry with the same tar id was already inserted.
    #[error("tar {tar_id} already exists in tar referential")]
    DuplicateReferentialEntry { tar_id: String },

    // === Referential store ===
    /// The backing store of the referential failed.
    #[error("tar referential failure: {detail}")]
    Referential { detail: String },

    // === Verification Errors ===
    /// The tar byte stream is truncated or malformed.
    #[error("tar archive is corrupt: {detail}")]
    TarCorrupt { detail: String },

    /// Recomputed size diverges from the expected one.
    #[error("size mismatch for tar {tar_id}: expected {expected}, computed {actual}")]
    SizeMismatch {
        tar_id: String,
        expected: u64,
        actual: u64,
    },

    /// Recomputed digest diverges from the expected one.
    #[error("digest mismatch for tar {tar_id}: expected {expected}, computed {actual}")]
    DigestMismatch {
        tar_id: String,
        expected: String,
        actual: String,
    },

    // === Queue Errors ===
    /// A write order could not be handed to the queue.
    #[error("could not submit write order for tar {tar_id}: {detail}")]
    QueueSubmit { tar_id: String, detail: String },

    // === Configuration Errors ===
    /// File bucket is not declared by the topology.
    #[error("unknown file bucket: {name}")]
    UnknownFileBucket { name: String },

    /// Configuration is unreadable or inconsistent.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    // === Recovery wrappers ===
    /// Recovery of a single file bucket failed.
    #[error("recovery of file bucket {file_bucket} failed: {source}")]
    BucketRecovery {
        file_bucket: String,
        #[source]
        source: Box<TapeError>,
    },

    /// One or more file buckets failed during a parallel recovery pass.
    #[error(
        "could not reschedule tar files to copy on tape; failed buckets: {}{}",
        .failed_buckets.join(", "),
        aborted_suffix(.aborted_buckets)
    )]
    RecoveryFailed {
        failed_buckets: Vec<String>,
        /// Buckets stopped without modifying anything because another bucket
        /// hit an error that aborts the process.
        aborted_buckets: Vec<String>,
        #[source]
        first: Box<TapeError>,
    },

    /// A file bucket was stopped because another one failed fatally.
    #[error("recovery of file bucket {file_bucket} aborted after a fatal error in another file bucket")]
    RecoveryAborted { file_bucket: String },

    // === Internal Errors ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for exit codes and operator messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    /// Disk state and referential disagree in a way recovery cannot settle.
    Consistency = 3,
    /// Filesystem or backing store failure.
    Io = 4,
    /// Archive bytes failed structural or digest verification.
    Verification = 5,
    /// Write order hand-off failed.
    Queue = 6,
    /// Topology or configuration file problem.
    Configuration = 7,
    /// Bug.
    Internal = 70,
}

impl TapeError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::FileIo { .. } | Self::Referential { .. } => ErrorKind::Io,
            Self::InvalidTarId { .. }
            | Self::UnexpectedTarFile { .. }
            | Self::MissingReferentialEntry { .. }
            | Self::InvalidReferentialEntry { .. }
            | Self::InvalidStateTransition { .. }
            | Self::DuplicateReferentialEntry { .. }
            | Self::RecoveryAborted { .. } => ErrorKind::Consistency,
            Self::TarCorrupt { .. } | Self::SizeMismatch { .. } | Self::DigestMismatch { .. } => {
                ErrorKind::Verification
            }
            Self::QueueSubmit { .. } => ErrorKind::Queue,
            Self::UnknownFileBucket { .. } | Self::Config { .. } => ErrorKind::Configuration,
            Self::BucketRecovery { source, .. } => source.kind(),
            Self::RecoveryFailed { first, .. } => first.kind(),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the recovery pass must stop for the whole process rather than
    /// only for the bucket being processed.
    pub fn aborts_process(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Consistency | ErrorKind::Configuration | ErrorKind::Internal
        )
    }

    /// Whether a supervisor restart could plausibly succeed without operator
    /// intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::FileIo { .. } | Self::Referential { .. } => true,
            Self::QueueSubmit { .. } => true,
            Self::BucketRecovery { source, .. } => source.is_transient(),
            Self::RecoveryFailed { first, .. } => first.is_transient(),
            _ => false,
        }
    }

    /// Human-friendly suggestion for fixing this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::MissingReferentialEntry { .. } => {
                Some("Restore the tar referential or move the orphan tar file out of the folder")
            }
            Self::UnexpectedTarFile { .. } => {
                Some("Remove foreign files from the input tar storage folder")
            }
            Self::TarCorrupt { .. } | Self::SizeMismatch { .. } | Self::DigestMismatch { .. } => {
                Some("Inspect the tar file; do not send it to tape until it verifies")
            }
            Self::QueueSubmit { .. } => Some("Check the write order queue and restart recovery"),
            Self::UnknownFileBucket { .. } | Self::Config { .. } => {
                Some("Fix the tape library topology configuration")
            }
            Self::BucketRecovery { source, .. } => source.suggestion(),
            Self::RecoveryFailed { first, .. } => first.suggestion(),
            _ => None,
        }
    }

    /// Process exit code for this error (for CLI use).
    pub fn exit_code(&self) -> i32 {
        self.kind() as i32
    }

    /// Attach a path and operation name to an I/O error.
    pub fn file_io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileIo {
            op,
            path: path.into(),
            source,
        }
    }

    /// Create a corrupt-archive error.
    pub fn tar_corrupt(detail: impl Into<String>) -> Self {
        Self::TarCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a referential store error.
    pub fn referential(detail: impl Into<String>) -> Self {
        Self::Referential {
            detail: detail.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap an error with the file bucket it happened in.
    pub fn in_bucket(self, file_bucket: impl Into<String>) -> Self {
        Self::BucketRecovery {
            file_bucket: file_bucket.into(),
            source: Box::new(self),
        }
    }
}

fn aborted_suffix(aborted_buckets: &[String]) -> String {
    if aborted_buckets.is_empty() {
        String::new()
    } else {
        format!("; aborted buckets: {}", aborted_buckets.join(", "))
    }
}

/// Result type alias using `TapeError`.
pub type Result<T> = std::result::Result<T, TapeError>;
