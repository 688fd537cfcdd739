use super::types::{DeliverFn, Seq};
use serde::{Deserialize, Serialize};

/// Delivery cursor for one registered consumer.
///
/// Tracks how far the consumer has been sent (`sent_seq`) and how far it has
/// confirmed durable handling downstream (`acked_seq`). Invariant:
/// `acked_seq <= sent_seq <= last assigned sequence`, maintained by the
/// queue actor which is the only mutator.
pub(crate) struct ConsumerCursor {
    /// Highest sequence acknowledged by the consumer
    pub acked_seq: Seq,

    /// Highest sequence successfully handed to the consumer
    pub sent_seq: Seq,

    /// Failed delivery attempts since registration
    pub error_count: u64,

    /// Deferred pull waiting for the next push, at most one at a time
    pub pending: Option<DeliverFn>,
}

impl ConsumerCursor {
    /// Cursor starting at `start`: nothing sent, nothing unacknowledged.
    ///
    /// Also used on re-registration with `start` = the old acknowledged
    /// sequence, which resumes redelivery from the last acknowledged point.
    pub fn new(start: Seq) -> Self {
        Self {
            acked_seq: start,
            sent_seq: start,
            error_count: 0,
            pending: None,
        }
    }

    /// Record a successful delivery of `seq`.
    ///
    /// Deliveries advance by exactly one sequence at a time; anything else
    /// means the bookkeeping is corrupt and the queue must stop.
    pub fn advance(&mut self, seq: Seq) {
        assert_eq!(
            seq,
            self.sent_seq + 1,
            "out-of-order delivery: cursor at {} was handed {}",
            self.sent_seq,
            seq
        );
        self.sent_seq = seq;
    }

    /// Items assigned but not yet sent to this consumer
    pub fn lag(&self, last_seq: Seq) -> u64 {
        last_seq.saturating_sub(self.sent_seq)
    }

    /// Backlog snapshot for `status()`
    pub fn status(&self, name: &str, last_seq: Seq) -> ConsumerStatus {
        ConsumerStatus {
            name: name.to_string(),
            pending: self.lag(last_seq),
            unacked: self.sent_seq.saturating_sub(self.acked_seq),
            errors: self.error_count,
        }
    }
}

/// Per-consumer backlog figures reported by `status()`.
///
/// Operators watch these: retention is bounded by the slowest consumer, so a
/// steadily growing `pending` or `unacked` means a replication link has
/// stalled and is pinning history in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerStatus {
    /// Consumer name
    pub name: String,
    /// Items assigned but not yet sent
    pub pending: u64,
    /// Items sent but not yet acknowledged
    pub unacked: u64,
    /// Failed delivery attempts since registration
    pub errors: u64,
}
