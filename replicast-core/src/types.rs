use serde::Serialize;
use thiserror::Error;

/// Sequence number identifying an item's push order.
///
/// Assigned strictly increasing starting at 1; also the unit of
/// acknowledgement. Treated as unbounded, no wraparound handling.
pub type Seq = u64;

/// Item retained in the replication queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    /// Sequence assigned at push time (identity of the item)
    pub seq: Seq,
    /// Opaque payload; serialization is the transport's concern
    pub payload: Vec<u8>,
}

/// What a pull resolves to: the consumer's next item in sequence order, or a
/// terminal failure (unknown consumer, queue shutting down).
pub type Delivery = std::result::Result<QueueItem, QueueError>;

/// Consumer-supplied delivery handler.
///
/// Runs inside the queue's own processing step, so it must be a fast,
/// non-blocking handoff (enqueue to the transport) rather than a synchronous
/// network send. Returning `Err` counts as a delivery failure: the cursor is
/// not advanced and the same sequence is retried, so handlers must be safe
/// to retry.
pub type DeliverFn = Box<dyn FnOnce(Delivery) -> Result<()> + Send>;

/// Queue error types
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Consumer not registered: {0}")]
    NotRegistered(String),

    #[error("Delivery rejected: {0}")]
    DeliveryRejected(String),

    #[error("Queue is shutting down")]
    ShuttingDown,
}

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
