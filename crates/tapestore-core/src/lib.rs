//! Tape offer core: bucket topology, configuration, recovery telemetry and
//! the bootstrap recovery of tars left on disk by a previous run.

pub mod config;
pub mod recovery;
pub mod telemetry;
pub mod topology;

pub use config::{BucketConfig, TapeStoreConfig};
pub use recovery::{BootstrapRecovery, BucketRecoveryReport, RecoveryMode, RecoveryReport};
pub use telemetry::{
    NoOpRecoveryObserver, RecoveryCounters, RecoveryCountersSnapshot, RecoveryEvent,
    RecoveryEventRingBuffer, RecoveryObserver, WriteOrderSource,
};
pub use topology::BucketTopology;
