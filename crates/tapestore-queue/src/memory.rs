use parking_lot::Mutex;
use tapestore_error::{Result, TapeError};
use tapestore_types::WriteOrder;
use tracing::debug;

use crate::WriteOrderQueue;

/// Ordered in-process queue.
#[derive(Debug, Default)]
pub struct MemoryWriteOrderQueue {
    orders: Mutex<Vec<WriteOrder>>,
    failure: Mutex<Option<String>>,
}

impl MemoryWriteOrderQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following submission fail with `detail`.
    pub fn fail_with(&self, detail: impl Into<String>) {
        *self.failure.lock() = Some(detail.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Orders submitted so far, in submission order.
    pub fn snapshot(&self) -> Vec<WriteOrder> {
        self.orders.lock().clone()
    }

    /// Take every queued order.
    pub fn drain(&self) -> Vec<WriteOrder> {
        std::mem::take(&mut *self.orders.lock())
    }

    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }
}

impl WriteOrderQueue for MemoryWriteOrderQueue {
    fn submit(&self, order: &WriteOrder) -> Result<()> {
        let failure = self.failure.lock().clone();
        if let Some(detail) = failure {
            return Err(TapeError::QueueSubmit {
                tar_id: order.tar_id.to_string(),
                detail,
            });
        }
        debug!(tar_id = %order.tar_id, bucket = %order.bucket, "write order queued");
        self.orders.lock().push(order.clone());
        Ok(())
    }
}
