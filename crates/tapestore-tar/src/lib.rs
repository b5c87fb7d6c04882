//! Tar archive verification and crash repair.
//!
//! [`TarRepairer`] checks finished archives against their recorded size and
//! digest, and rebuilds archives that were torn by a crash mid-write.

pub mod block;
pub mod digest;
pub mod repairer;
pub mod sink;

pub use digest::{ContentHasher, DigestCheckpoint, DigestReader, DigestWriter, digest_bytes};
pub use repairer::{RepairOutcome, TarRepairer};
pub use sink::RepairSink;
