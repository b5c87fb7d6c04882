//! Structured recovery telemetry.
//!
//! Recovery reports what it does through three channels: `tracing` events,
//! a [`RecoveryObserver`] receiving typed [`RecoveryEvent`]s, and
//! [`RecoveryCounters`].
//!
//! 1. Every [`RecoveryEvent`] variant carries a monotonic `timestamp_ns`.
//! 2. Events and counter snapshots implement `serde::Serialize`.
//! 3. Observers must not block or perform I/O.
//! 4. Counters use `AtomicU64` with `Ordering::Relaxed`.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Why a write order was (re)submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrderSource {
    /// Tar was ready on disk; stored size and digest reused.
    ReadyOnDisk,
    /// Tar was closed but never marked ready; re-verified.
    BuildingOnDisk,
    /// Tar was mid-write; repaired from its temporary file.
    Repaired,
}

impl WriteOrderSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadyOnDisk => "ready_on_disk",
            Self::BuildingOnDisk => "building_on_disk",
            Self::Repaired => "repaired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecoveryEvent {
    /// A file bucket directory was listed.
    BucketScanStarted {
        file_bucket: String,
        /// Tar files found (finished and temporary).
        files: usize,
        timestamp_ns: u64,
    },

    /// A finished file superseded by its temporary file was deleted.
    StaleFileDeleted {
        file_bucket: String,
        tar_id: String,
        timestamp_ns: u64,
    },

    /// A finished file already copied to tape was deleted.
    OnTapeFileDeleted {
        file_bucket: String,
        tar_id: String,
        tape_code: String,
        timestamp_ns: u64,
    },

    WriteOrderSubmitted {
        file_bucket: String,
        tar_id: String,
        source: WriteOrderSource,
        size: u64,
        timestamp_ns: u64,
    },

    /// A temporary file was repaired into its finished file.
    TarRepaired {
        file_bucket: String,
        tar_id: String,
        entries_kept: u64,
        entries_discarded: u64,
        size: u64,
        timestamp_ns: u64,
    },

    BucketCompleted {
        file_bucket: String,
        write_orders: usize,
        files_deleted: usize,
        duration_us: u64,
        timestamp_ns: u64,
    },

    BucketFailed {
        file_bucket: String,
        error: String,
        timestamp_ns: u64,
    },
}

impl RecoveryEvent {
    #[must_use]
    pub fn timestamp_ns(&self) -> u64 {
        match self {
            Self::BucketScanStarted { timestamp_ns, .. }
            | Self::StaleFileDeleted { timestamp_ns, .. }
            | Self::OnTapeFileDeleted { timestamp_ns, .. }
            | Self::WriteOrderSubmitted { timestamp_ns, .. }
            | Self::TarRepaired { timestamp_ns, .. }
            | Self::BucketCompleted { timestamp_ns, .. }
            | Self::BucketFailed { timestamp_ns, .. } => *timestamp_ns,
        }
    }

    #[must_use]
    pub fn file_bucket(&self) -> &str {
        match self {
            Self::BucketScanStarted { file_bucket, .. }
            | Self::StaleFileDeleted { file_bucket, .. }
            | Self::OnTapeFileDeleted { file_bucket, .. }
            | Self::WriteOrderSubmitted { file_bucket, .. }
            | Self::TarRepaired { file_bucket, .. }
            | Self::BucketCompleted { file_bucket, .. }
            | Self::BucketFailed { file_bucket, .. } => file_bucket,
        }
    }

    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::BucketScanStarted { .. } => "bucket_scan_started",
            Self::StaleFileDeleted { .. } => "stale_file_deleted",
            Self::OnTapeFileDeleted { .. } => "on_tape_file_deleted",
            Self::WriteOrderSubmitted { .. } => "write_order_submitted",
            Self::TarRepaired { .. } => "tar_repaired",
            Self::BucketCompleted { .. } => "bucket_completed",
            Self::BucketFailed { .. } => "bucket_failed",
        }
    }
}

/// Monotonic nanoseconds since the first call in this process.
pub fn monotonic_ns() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    u64::try_from(anchor.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Receiver of recovery events. Called from recovery threads; must not block.
pub trait RecoveryObserver: Send + Sync {
    fn on_event(&self, event: &RecoveryEvent);
}

pub struct NoOpRecoveryObserver;

impl RecoveryObserver for NoOpRecoveryObserver {
    #[inline]
    fn on_event(&self, _event: &RecoveryEvent) {}
}

/// Keeps the last `capacity` events.
pub struct RecoveryEventRingBuffer {
    events: parking_lot::Mutex<RingInner>,
}

struct RingInner {
    buf: Vec<RecoveryEvent>,
    capacity: usize,
    write_pos: usize,
    count: usize,
}

impl RecoveryEventRingBuffer {
    /// Create a ring buffer holding up to `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: parking_lot::Mutex::new(RingInner {
                buf: Vec::with_capacity(capacity),
                capacity,
                write_pos: 0,
                count: 0,
            }),
        }
    }

    /// Stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<RecoveryEvent> {
        let inner = self.events.lock();
        let n = inner.count.min(inner.capacity);
        let start = if inner.count >= inner.capacity {
            inner.write_pos
        } else {
            0
        };
        (0..n)
            .map(|i| inner.buf[(start + i) % inner.capacity].clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.events.lock();
        inner.count.min(inner.capacity)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events observed, including overwritten ones.
    #[must_use]
    pub fn total_observed(&self) -> usize {
        self.events.lock().count
    }
}

impl RecoveryObserver for RecoveryEventRingBuffer {
    fn on_event(&self, event: &RecoveryEvent) {
        let mut inner = self.events.lock();
        let pos = inner.write_pos;
        if inner.buf.len() < inner.capacity {
            inner.buf.push(event.clone());
        } else {
            inner.buf[pos] = event.clone();
        }
        inner.write_pos = (pos + 1) % inner.capacity;
        inner.count += 1;
    }
}

/// Counters of one recovery engine.
#[derive(Debug, Default)]
pub struct RecoveryCounters {
    buckets_scanned: AtomicU64,
    buckets_failed: AtomicU64,
    stale_files_deleted: AtomicU64,
    on_tape_files_deleted: AtomicU64,
    write_orders_submitted: AtomicU64,
    tars_reverified: AtomicU64,
    tars_repaired: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RecoveryCountersSnapshot {
    pub buckets_scanned: u64,
    pub buckets_failed: u64,
    pub stale_files_deleted: u64,
    pub on_tape_files_deleted: u64,
    pub write_orders_submitted: u64,
    pub tars_reverified: u64,
    pub tars_repaired: u64,
}

impl RecoveryCounters {
    /// Account for one event.
    pub fn record(&self, event: &RecoveryEvent) {
        let counter = match event {
            RecoveryEvent::BucketScanStarted { .. } => &self.buckets_scanned,
            RecoveryEvent::BucketFailed { .. } => &self.buckets_failed,
            RecoveryEvent::StaleFileDeleted { .. } => &self.stale_files_deleted,
            RecoveryEvent::OnTapeFileDeleted { .. } => &self.on_tape_files_deleted,
            RecoveryEvent::WriteOrderSubmitted { source, .. } => {
                if *source == WriteOrderSource::BuildingOnDisk {
                    self.tars_reverified.fetch_add(1, Ordering::Relaxed);
                }
                &self.write_orders_submitted
            }
            RecoveryEvent::TarRepaired { .. } => &self.tars_repaired,
            RecoveryEvent::BucketCompleted { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> RecoveryCountersSnapshot {
        RecoveryCountersSnapshot {
            buckets_scanned: self.buckets_scanned.load(Ordering::Relaxed),
            buckets_failed: self.buckets_failed.load(Ordering::Relaxed),
            stale_files_deleted: self.stale_files_deleted.load(Ordering::Relaxed),
            on_tape_files_deleted: self.on_tape_files_deleted.load(Ordering::Relaxed),
            write_orders_submitted: self.write_orders_submitted.load(Ordering::Relaxed),
            tars_reverified: self.tars_reverified.load(Ordering::Relaxed),
            tars_repaired: self.tars_repaired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_event_variants() -> Vec<RecoveryEvent> {
        let bucket = || "test-objects".to_owned();
        let tar = || "20190625115513001-abc.tar".to_owned();
        vec![
            RecoveryEvent::BucketScanStarted {
                file_bucket: bucket(),
                files: 3,
                timestamp_ns: 1_000,
            },
            RecoveryEvent::StaleFileDeleted {
                file_bucket: bucket(),
                tar_id: tar(),
                timestamp_ns: 2_000,
            },
            RecoveryEvent::OnTapeFileDeleted {
                file_bucket: bucket(),
                tar_id: tar(),
                tape_code: "VIT0001".to_owned(),
                timestamp_ns: 3_000,
            },
            RecoveryEvent::WriteOrderSubmitted {
                file_bucket: bucket(),
                tar_id: tar(),
                source: WriteOrderSource::BuildingOnDisk,
                size: 10_240,
                timestamp_ns: 4_000,
            },
            RecoveryEvent::TarRepaired {
                file_bucket: bucket(),
                tar_id: tar(),
                entries_kept: 2,
                entries_discarded: 1,
                size: 3_072,
                timestamp_ns: 5_000,
            },
            RecoveryEvent::BucketCompleted {
                file_bucket: bucket(),
                write_orders: 1,
                files_deleted: 2,
                duration_us: 150,
                timestamp_ns: 6_000,
            },
            RecoveryEvent::BucketFailed {
                file_bucket: bucket(),
                error: "boom".to_owned(),
                timestamp_ns: 7_000,
            },
        ]
    }

    #[test]
    fn test_every_event_serializes() {
        for event in all_event_variants() {
            let json = serde_json::to_value(&event)
                .unwrap_or_else(|e| panic!("failed to serialize {}: {e}", event.kind_str()));
            assert!(json.is_object(), "{} must serialize to an object", event.kind_str());
            assert_eq!(event.file_bucket(), "test-objects");
        }
    }

    #[test]
    fn test_ring_buffer_keeps_latest_events() {
        let ring = RecoveryEventRingBuffer::new(3);
        for event in all_event_variants() {
            ring.on_event(&event);
        }
        let kept: Vec<u64> = ring.events().iter().map(RecoveryEvent::timestamp_ns).collect();
        assert_eq!(kept, [5_000, 6_000, 7_000]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.total_observed(), 7);
    }

    #[test]
    fn test_counters_follow_events() {
        let counters = RecoveryCounters::default();
        for event in all_event_variants() {
            counters.record(&event);
        }
        let snapshot = counters.snapshot();
        assert_eq!(
            snapshot,
            RecoveryCountersSnapshot {
                buckets_scanned: 1,
                buckets_failed: 1,
                stale_files_deleted: 1,
                on_tape_files_deleted: 1,
                write_orders_submitted: 1,
                tars_reverified: 1,
                tars_repaired: 1,
            }
        );
    }

    #[test]
    fn test_monotonic_clock_never_goes_back() {
        let first = monotonic_ns();
        let second = monotonic_ns();
        assert!(second >= first);
    }
}
