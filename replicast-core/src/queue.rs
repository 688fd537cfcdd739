use super::backlog::Backlog;
use super::config::QueueConfig;
use super::consumer::{ConsumerCursor, ConsumerStatus};
use super::types::{DeliverFn, Delivery, QueueError, QueueItem, Result, Seq};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Queue-wide counters, readable without a round-trip to the actor
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStats {
    /// Items pushed since startup
    pub pushed: u64,
    /// Successful deliveries across all consumers
    pub delivered: u64,
    /// Failed delivery attempts across all consumers
    pub delivery_failures: u64,
    /// Acknowledgements processed
    pub acked: u64,
    /// Entries evicted by garbage collection
    pub evicted: u64,
    /// Entries currently retained
    pub retained: usize,
    /// Registered consumers
    pub consumers: usize,
}

/// Requests routed to the owning actor task
enum Request {
    Register {
        name: String,
        reply: oneshot::Sender<Seq>,
    },
    Unregister {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Push {
        payload: Vec<u8>,
    },
    Pull {
        name: String,
        deliver: DeliverFn,
    },
    Ack {
        name: String,
        seq: Seq,
    },
    Status {
        reply: oneshot::Sender<Vec<ConsumerStatus>>,
    },
    Dump {
        reply: oneshot::Sender<Vec<QueueItem>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Replication Queue - buffers mutation events for independent consumers
///
/// Features:
/// - Strictly increasing sequence assignment in push order
/// - Per-consumer cursors, each link advancing at its own pace
/// - At-least-once delivery with retry of the same sequence on failure
/// - Deferred pulls fulfilled by the next push
/// - History trimmed up to the slowest consumer's acknowledged floor
///
/// All state is owned by a single task; this handle only sends requests over
/// a channel, so it is cheap to clone and share. `push`, `pull` and `ack`
/// are fire-and-forget; the remaining operations await a reply.
#[derive(Clone)]
pub struct ReplicationQueue {
    requests: mpsc::UnboundedSender<Request>,
    stats: Arc<RwLock<QueueStats>>,
}

impl ReplicationQueue {
    /// Create a queue and spawn its owning task on the current runtime
    pub fn new(config: QueueConfig) -> Self {
        info!("Initializing replication queue");

        let (requests, inbox) = mpsc::unbounded_channel();
        let stats = Arc::new(RwLock::new(QueueStats::default()));

        let actor = QueueActor {
            backlog: Backlog::new(),
            consumers: BTreeMap::new(),
            stats: Arc::clone(&stats),
            config,
        };
        tokio::spawn(actor.run(inbox));

        Self { requests, stats }
    }

    /// Register `name`, returning the sequence replay begins from.
    ///
    /// A new consumer starts at the oldest retained sequence (or the last
    /// assigned one if nothing is retained). Re-registering an existing name
    /// replaces its cursor and resumes redelivery from its last
    /// acknowledged sequence, for a transport link that was re-established.
    pub async fn register(&self, name: &str) -> Result<Seq> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Register {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| QueueError::ShuttingDown)?;
        response.await.map_err(|_| QueueError::ShuttingDown)
    }

    /// Remove `name`, releasing any pending pull with a failure outcome and
    /// trimming history it was holding back
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Unregister {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| QueueError::ShuttingDown)?;
        response.await.map_err(|_| QueueError::ShuttingDown)?
    }

    /// Enqueue an item; fire-and-forget.
    ///
    /// The item is offered immediately to every consumer waiting on a pull.
    /// Dropped silently once the queue has shut down.
    pub fn push(&self, payload: Vec<u8>) {
        let _ = self.requests.send(Request::Push { payload });
    }

    /// Request the next item for `name`; fire-and-forget.
    ///
    /// `deliver` is invoked at most once, either synchronously within a later
    /// processing step (the item, or a `NotRegistered` failure) or by a
    /// subsequent push if the consumer is caught up. A second pull while one
    /// is pending replaces it, last writer wins. After shutdown the callback
    /// is invoked immediately with `ShuttingDown`.
    pub fn pull<F>(&self, name: &str, deliver: F)
    where
        F: FnOnce(Delivery) -> Result<()> + Send + 'static,
    {
        let request = Request::Pull {
            name: name.to_string(),
            deliver: Box::new(deliver),
        };
        if let Err(returned) = self.requests.send(request) {
            if let Request::Pull { deliver, .. } = returned.0 {
                let _ = deliver(Err(QueueError::ShuttingDown));
            }
        }
    }

    /// Acknowledge every sequence up to and including `seq` for `name`;
    /// fire-and-forget. The caller is trusted to pass a sequence between its
    /// previous ack and its last delivered sequence.
    pub fn ack(&self, name: &str, seq: Seq) {
        let _ = self.requests.send(Request::Ack {
            name: name.to_string(),
            seq,
        });
    }

    /// Per-consumer backlog snapshot, ordered by consumer name
    pub async fn status(&self) -> Result<Vec<ConsumerStatus>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Status { reply })
            .map_err(|_| QueueError::ShuttingDown)?;
        response.await.map_err(|_| QueueError::ShuttingDown)
    }

    /// Full ordered snapshot of retained items; diagnostic only
    pub async fn dumpq(&self) -> Result<Vec<QueueItem>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Dump { reply })
            .map_err(|_| QueueError::ShuttingDown)?;
        response.await.map_err(|_| QueueError::ShuttingDown)
    }

    /// Stop the queue.
    ///
    /// Every pending pull is notified with `ShuttingDown`, in consumer
    /// order, before state is discarded; no caller is left waiting across a
    /// restart. Idempotent: a second call returns once the actor is gone.
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self.requests.send(Request::Shutdown { reply }).is_ok() {
            let _ = response.await;
        }
    }

    /// Snapshot of the queue-wide counters
    pub fn stats(&self) -> QueueStats {
        self.stats.read().clone()
    }
}

/// Owner of all queue state. Processes one request at a time, which is the
/// entire concurrency story: no other code can reach the backlog or the
/// cursors, so no locks are involved on the hot path.
struct QueueActor {
    backlog: Backlog,
    consumers: BTreeMap<String, ConsumerCursor>,
    stats: Arc<RwLock<QueueStats>>,
    config: QueueConfig,
}

impl QueueActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Request>) {
        while let Some(request) = inbox.recv().await {
            match request {
                Request::Register { name, reply } => {
                    let _ = reply.send(self.register(name));
                }
                Request::Unregister { name, reply } => {
                    let _ = reply.send(self.unregister(&name));
                }
                Request::Push { payload } => self.push(payload),
                Request::Pull { name, deliver } => self.pull(name, deliver),
                Request::Ack { name, seq } => self.ack(&name, seq),
                Request::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                Request::Dump { reply } => {
                    let _ = reply.send(self.backlog.snapshot());
                }
                Request::Shutdown { reply } => {
                    // Reject whatever is still queued behind the shutdown,
                    // then release the parked pulls.
                    inbox.close();
                    while let Ok(request) = inbox.try_recv() {
                        Self::reject(request);
                    }
                    self.release_pending();
                    let _ = reply.send(());
                    info!("Replication queue stopped");
                    return;
                }
            }
        }

        // Every handle dropped without an explicit shutdown
        self.release_pending();
        info!("Replication queue stopped (all handles dropped)");
    }

    fn register(&mut self, name: String) -> Seq {
        let start = match self.consumers.get(&name) {
            // Known name: the link was re-established, so unacknowledged
            // deliveries must be resent. Replacing the cursor resets
            // sent_seq to the acknowledged floor; a stale pending pull
            // belongs to the dead link and is dropped uninvoked.
            Some(cursor) => cursor.acked_seq,
            None => self
                .backlog
                .first_seq()
                .unwrap_or_else(|| self.backlog.last_seq()),
        };
        self.consumers.insert(name.clone(), ConsumerCursor::new(start));
        self.sync_gauges();

        info!("Consumer {} registered, replay starts at {}", name, start);
        start
    }

    fn unregister(&mut self, name: &str) -> Result<()> {
        match self.consumers.remove(name) {
            Some(mut cursor) => {
                if let Some(deliver) = cursor.pending.take() {
                    debug!("Releasing pending pull of {}", name);
                    let _ = deliver(Err(QueueError::NotRegistered(name.to_string())));
                }
                self.collect_garbage();
                info!("Consumer {} unregistered", name);
                Ok(())
            }
            None => Err(QueueError::NotRegistered(name.to_string())),
        }
    }

    fn push(&mut self, payload: Vec<u8>) {
        let seq = self.backlog.append(payload);
        self.stats.write().pushed += 1;
        debug!("Queued item {}", seq);

        // A consumer waiting on a pull is caught up by invariant, so the new
        // item is exactly its next expected sequence.
        let waiting: Vec<String> = self
            .consumers
            .iter()
            .filter(|(_, cursor)| cursor.pending.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        for name in waiting {
            if let Some(deliver) = self
                .consumers
                .get_mut(&name)
                .and_then(|cursor| cursor.pending.take())
            {
                self.deliver(&name, seq, deliver);
            }
        }

        self.sync_gauges();
        self.check_thresholds();
    }

    fn pull(&mut self, name: String, deliver: DeliverFn) {
        let Some(cursor) = self.consumers.get_mut(&name) else {
            debug!("Pull from unknown consumer {}", name);
            let _ = deliver(Err(QueueError::NotRegistered(name)));
            return;
        };

        let want = cursor.sent_seq + 1;
        if want <= self.backlog.last_seq() {
            // Not yet acknowledged by this consumer, so the retention
            // invariant guarantees the item is still in the backlog.
            self.deliver(&name, want, deliver);
        } else {
            // Caught up: park the pull until the next push. A second pull
            // before then replaces the first, last writer wins.
            if cursor.pending.replace(deliver).is_some() {
                debug!("Replaced pending pull of {}", name);
            }
        }
    }

    fn ack(&mut self, name: &str, seq: Seq) {
        match self.consumers.get_mut(name) {
            Some(cursor) => {
                // Caller is trusted to stay within [previous ack, sent_seq].
                cursor.acked_seq = seq;
                self.stats.write().acked += 1;
                debug!("Consumer {} acknowledged up to {}", name, seq);
                self.collect_garbage();
            }
            // Fire-and-forget path, nothing to reply to
            None => warn!("Dropping ack {} from unknown consumer {}", seq, name),
        }
    }

    fn status(&self) -> Vec<ConsumerStatus> {
        let last_seq = self.backlog.last_seq();
        self.consumers
            .iter()
            .map(|(name, cursor)| cursor.status(name, last_seq))
            .collect()
    }

    /// Hand `seq` to `deliver` and apply the outcome policy: advance the
    /// cursor on success, count the failure and keep the cursor in place
    /// otherwise, so exactly the same sequence is retried next time.
    fn deliver(&mut self, name: &str, seq: Seq, deliver: DeliverFn) {
        let payload = match self.backlog.lookup(seq) {
            Some(payload) => payload.to_vec(),
            // An unacknowledged sequence can never have been evicted
            None => panic!("retention invariant violated: {} missing from backlog", seq),
        };
        let Some(cursor) = self.consumers.get_mut(name) else {
            panic!("delivery attempted for unknown consumer {}", name);
        };

        match deliver(Ok(QueueItem { seq, payload })) {
            Ok(()) => {
                cursor.advance(seq);
                self.stats.write().delivered += 1;
                debug!("Delivered {} to consumer {}", seq, name);
            }
            Err(err) => {
                cursor.error_count += 1;
                self.stats.write().delivery_failures += 1;
                warn!(
                    "Delivery of {} to consumer {} failed ({}), sequence will be retried",
                    seq, name, err
                );
            }
        }
    }

    /// Drop everything at or below the slowest consumer's acknowledged
    /// floor. With no consumers left the floor is the last assigned
    /// sequence: nobody needs any history, evict everything.
    fn collect_garbage(&mut self) {
        let floor = self
            .consumers
            .values()
            .map(|cursor| cursor.acked_seq)
            .min()
            .unwrap_or_else(|| self.backlog.last_seq());

        let evicted = self.backlog.evict_through(floor);
        if evicted > 0 {
            self.stats.write().evicted += evicted as u64;
            debug!("Evicted {} entries at or below floor {}", evicted, floor);
        }
        self.sync_gauges();
    }

    /// Warn once when a watermark is crossed; both checks compare for
    /// equality so steady growth does not repeat the warning on every push.
    fn check_thresholds(&self) {
        let depth = self.config.warn_retained_depth;
        if depth > 0 && self.backlog.len() == depth {
            warn!(
                "Backlog reached {} retained entries, check for stalled consumers",
                depth
            );
        }

        let threshold = self.config.slow_consumer_threshold;
        if threshold > 0 {
            for (name, cursor) in &self.consumers {
                if cursor.lag(self.backlog.last_seq()) == threshold {
                    warn!("Consumer {} is {} items behind", name, threshold);
                }
            }
        }
    }

    /// Refresh the gauge-style fields of the shared stats snapshot
    fn sync_gauges(&self) {
        let mut stats = self.stats.write();
        stats.retained = self.backlog.len();
        stats.consumers = self.consumers.len();
    }

    /// Notify every parked pull that the queue is going away, in consumer
    /// order, before state is discarded
    fn release_pending(&mut self) {
        for (name, cursor) in self.consumers.iter_mut() {
            if let Some(deliver) = cursor.pending.take() {
                debug!("Notifying pending pull of {} about shutdown", name);
                let _ = deliver(Err(QueueError::ShuttingDown));
            }
        }
    }

    /// Fail a request that arrived behind a shutdown. Reply channels are
    /// simply dropped, which surfaces `ShuttingDown` at the caller; a pull's
    /// callback must be invoked explicitly so no caller waits forever.
    fn reject(request: Request) {
        if let Request::Pull { deliver, .. } = request {
            let _ = deliver(Err(QueueError::ShuttingDown));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> (
        tokio::sync::mpsc::UnboundedSender<Delivery>,
        tokio::sync::mpsc::UnboundedReceiver<Delivery>,
    ) {
        tokio::sync::mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let queue = ReplicationQueue::new(QueueConfig::default());
        queue.register("c1").await.unwrap();

        queue.push(b"a".to_vec());
        queue.push(b"b".to_vec());

        let (tx, mut rx) = capture();
        let sender = tx.clone();
        queue.pull("c1", move |delivery| {
            sender.send(delivery).unwrap();
            Ok(())
        });
        rx.recv().await.unwrap().unwrap();

        let sender = tx.clone();
        queue.pull("c1", move |delivery| {
            sender.send(delivery).unwrap();
            Err(QueueError::DeliveryRejected("link buffer full".into()))
        });
        rx.recv().await.unwrap().unwrap();

        queue.ack("c1", 1);
        // Round-trip so the fire-and-forget ack has been processed
        queue.status().await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.pushed, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.delivery_failures, 1);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.retained, 1);
        assert_eq!(stats.consumers, 1);
    }

    #[tokio::test]
    async fn test_ack_from_unknown_consumer_is_dropped() {
        let queue = ReplicationQueue::new(QueueConfig::default());
        queue.push(b"x".to_vec());

        queue.ack("ghost", 1);

        // Still alive, item still retained
        assert_eq!(queue.dumpq().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_empty_without_consumers() {
        let queue = ReplicationQueue::new(QueueConfig::default());
        assert!(queue.status().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_after_shutdown() {
        let queue = ReplicationQueue::new(QueueConfig::default());
        queue.shutdown().await;

        assert!(matches!(
            queue.register("late").await,
            Err(QueueError::ShuttingDown)
        ));
        assert!(matches!(
            queue.status().await,
            Err(QueueError::ShuttingDown)
        ));

        // Fire-and-forget operations are dropped silently
        queue.push(b"lost".to_vec());
        queue.ack("late", 1);

        // A late pull is failed immediately instead of hanging
        let (tx, mut rx) = capture();
        queue.pull("late", move |delivery| {
            tx.send(delivery).unwrap();
            Ok(())
        });
        let delivery = rx.recv().await.unwrap();
        assert!(matches!(delivery, Err(QueueError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let queue = ReplicationQueue::new(QueueConfig::default());
        queue.shutdown().await;
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_clone_shares_the_queue() {
        let queue = ReplicationQueue::new(QueueConfig::default());
        let other = queue.clone();

        queue.push(b"shared".to_vec());
        assert_eq!(other.dumpq().await.unwrap().len(), 1);
        assert_eq!(other.stats().pushed, 1);
    }
}
