//! Write order queue: how tars are handed to the tape subsystem.
//!
//! Submission is fire-and-forget. Recovery never waits for tape, it only
//! needs the order to be accepted by the queue.

use tapestore_error::Result;
use tapestore_types::WriteOrder;

pub mod directory;
pub mod memory;

pub use directory::{DirectoryWriteOrderQueue, QueuedWriteOrder};
pub use memory::MemoryWriteOrderQueue;

/// Sink for write orders.
pub trait WriteOrderQueue: Send + Sync {
    /// Enqueue one write order.
    ///
    /// # Errors
    ///
    /// Returns `QueueSubmit` when the queue does not accept the order.
    fn submit(&self, order: &WriteOrder) -> Result<()>;
}
