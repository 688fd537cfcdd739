use super::types::{QueueItem, Seq};
use std::collections::BTreeMap;

/// Replication backlog - ordered buffer of items awaiting acknowledgement
///
/// Holds every pushed item until the garbage collector decides the slowest
/// consumer no longer needs it. Nothing is dropped by capacity: retention is
/// driven purely by acknowledgements, so a stalled consumer keeps its share
/// of history alive.
///
/// Keyed by sequence number, which makes ordered iteration, point lookup and
/// predecessor queries all cheap.
pub struct Backlog {
    /// Retained items, keyed by assigned sequence
    entries: BTreeMap<Seq, Vec<u8>>,

    /// Last assigned sequence (0 before the first append, only increases)
    last_seq: Seq,
}

impl Backlog {
    /// Create an empty backlog
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            last_seq: 0,
        }
    }

    /// Assign the next sequence to `payload` and store it.
    ///
    /// The first assigned sequence is 1. A duplicate key is impossible by
    /// construction since `last_seq` is strictly monotonic.
    pub fn append(&mut self, payload: Vec<u8>) -> Seq {
        self.last_seq += 1;
        let prev = self.entries.insert(self.last_seq, payload);
        debug_assert!(prev.is_none(), "duplicate sequence {}", self.last_seq);
        self.last_seq
    }

    /// Point lookup of a retained payload
    pub fn lookup(&self, seq: Seq) -> Option<&[u8]> {
        self.entries.get(&seq).map(Vec::as_slice)
    }

    /// Lowest retained sequence, or `None` if the backlog is empty
    pub fn first_seq(&self) -> Option<Seq> {
        self.entries.keys().next().copied()
    }

    /// Greatest retained sequence strictly below `seq`, or `None`
    pub fn prev_seq(&self, seq: Seq) -> Option<Seq> {
        self.entries.range(..seq).next_back().map(|(&s, _)| s)
    }

    /// Remove a single entry; no-op if the sequence is not retained
    pub fn remove(&mut self, seq: Seq) {
        self.entries.remove(&seq);
    }

    /// Delete every entry at or below `floor`, walking backward from the
    /// floor while evictable entries exist. Returns the number evicted.
    pub fn evict_through(&mut self, floor: Seq) -> usize {
        let mut evicted = 0;
        let mut at = if self.entries.contains_key(&floor) {
            Some(floor)
        } else {
            self.prev_seq(floor)
        };
        while let Some(seq) = at {
            at = self.prev_seq(seq);
            self.remove(seq);
            evicted += 1;
        }
        evicted
    }

    /// Last assigned sequence (not necessarily retained)
    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full ordered snapshot of retained items (diagnostic)
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.entries
            .iter()
            .map(|(&seq, payload)| QueueItem {
                seq,
                payload: payload.clone(),
            })
            .collect()
    }
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new()
    }
}
