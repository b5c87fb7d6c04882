use serde::Serialize;
use tapestore_types::WriteOrder;

use crate::telemetry::RecoveryCountersSnapshot;

/// What recovery did in one file bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketRecoveryReport {
    pub file_bucket: String,
    /// Tape bucket owning the file bucket.
    pub bucket: String,
    /// Finished files deleted because a temporary file superseded them.
    pub stale_files_deleted: Vec<String>,
    /// Finished files deleted because they are already on tape.
    pub on_tape_files_deleted: Vec<String>,
    /// Temporary files repaired into finished files.
    pub repaired: Vec<String>,
    /// Finished files re-verified because they were never marked ready.
    pub reverified: Vec<String>,
    /// Orders submitted, in submission order.
    pub write_orders: Vec<WriteOrder>,
    pub duration_us: u64,
}

impl BucketRecoveryReport {
    pub(crate) fn new(file_bucket: &str, bucket: &str) -> Self {
        Self {
            file_bucket: file_bucket.to_owned(),
            bucket: bucket.to_owned(),
            ..Self::default()
        }
    }

    pub fn files_deleted(&self) -> usize {
        self.stale_files_deleted.len() + self.on_tape_files_deleted.len()
    }
}

/// Outcome of a whole bootstrap recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// One report per recovered file bucket, in file bucket name order.
    pub buckets: Vec<BucketRecoveryReport>,
    /// File buckets without a directory in the input tar storage folder.
    pub skipped_file_buckets: Vec<String>,
    pub counters: RecoveryCountersSnapshot,
}

impl RecoveryReport {
    /// Every submitted order, bucket by bucket.
    pub fn write_orders(&self) -> impl Iterator<Item = &WriteOrder> {
        self.buckets.iter().flat_map(|bucket| bucket.write_orders.iter())
    }

    pub fn bucket(&self, file_bucket: &str) -> Option<&BucketRecoveryReport> {
        self.buckets
            .iter()
            .find(|report| report.file_bucket == file_bucket)
    }
}
