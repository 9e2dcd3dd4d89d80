//! Subscription records and the per-subscription consumer loop.
//!
//! The bus owns each record exclusively: handlers consume envelopes but
//! never touch queue metadata. Counters are relaxed atomics sampled at
//! the telemetry tick; small observation skew is acceptable.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

use vigil_contracts::{EnvelopeFilter, Envelope, EventHandler, OverflowPolicy, SubscriptionStatus};
use vigil_types::SubscriptionId;

/// Consecutive handler failures or timeouts before a subscription is
/// promoted to degraded.
pub(crate) const DEGRADED_THRESHOLD: u32 = 3;

pub(crate) struct QueuedEnvelope {
    pub envelope: Arc<Envelope>,
    pub enqueued_at: Instant,
}

/// Outcome of a single enqueue attempt.
pub(crate) enum EnqueueOutcome {
    /// Envelope is in the queue.
    Enqueued,
    /// Dropped under `drop_newest`; already counted.
    Dropped,
    /// Queue full under `block`; caller waits for space and retries.
    Full,
}

/// One subscription: bounded queue, policy, counters, handler.
pub(crate) struct SubscriptionState {
    pub id: SubscriptionId,
    pub subscriber: String,
    pub topic: String,
    pub capacity: usize,
    pub policy: OverflowPolicy,
    pub filter: Option<EnvelopeFilter>,
    pub handler: EventHandler,

    queue: Mutex<VecDeque<QueuedEnvelope>>,
    /// Woken when an envelope is enqueued.
    pub data_ready: Notify,
    /// Woken when the consumer pops, for block-policy publishers.
    pub space_free: Notify,

    delivered: AtomicU64,
    dropped: AtomicU64,
    failures_in_row: AtomicU32,
    degraded: AtomicBool,
    closed: AtomicBool,
}

impl SubscriptionState {
    pub fn new(
        subscriber: String,
        topic: String,
        capacity: usize,
        policy: OverflowPolicy,
        filter: Option<EnvelopeFilter>,
        handler: EventHandler,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            subscriber,
            topic,
            capacity,
            policy,
            filter,
            handler,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            data_ready: Notify::new(),
            space_free: Notify::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failures_in_row: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Attempts to enqueue without waiting. Applies `drop_newest` and
    /// `drop_oldest` resolution inline; `block` reports `Full`.
    pub fn try_enqueue(&self, envelope: Arc<Envelope>) -> EnqueueOutcome {
        if self.closed.load(Ordering::Acquire) {
            return EnqueueOutcome::Dropped;
        }
        let mut queue = self.queue.lock();
        if queue.len() < self.capacity {
            queue.push_back(QueuedEnvelope {
                envelope,
                enqueued_at: Instant::now(),
            });
            drop(queue);
            self.data_ready.notify_one();
            return EnqueueOutcome::Enqueued;
        }
        match self.policy {
            OverflowPolicy::Block => EnqueueOutcome::Full,
            OverflowPolicy::DropNewest => {
                drop(queue);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Dropped
            }
            OverflowPolicy::DropOldest => {
                queue.pop_front();
                queue.push_back(QueuedEnvelope {
                    envelope,
                    enqueued_at: Instant::now(),
                });
                drop(queue);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.data_ready.notify_one();
                EnqueueOutcome::Enqueued
            }
        }
    }

    /// Pops the queue head, freeing space for a blocked publisher.
    pub fn pop(&self) -> Option<QueuedEnvelope> {
        let item = self.queue.lock().pop_front();
        if item.is_some() {
            self.space_free.notify_one();
        }
        item
    }

    /// Marks the subscription closed and counts queued envelopes as
    /// dropped. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let remaining = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if remaining > 0 {
            self.dropped.fetch_add(remaining as u64, Ordering::Relaxed);
        }
        // Wake the consumer so it observes the closed flag, and any
        // blocked publisher so it re-checks.
        self.data_ready.notify_waiters();
        self.space_free.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.failures_in_row.store(0, Ordering::Relaxed);
    }

    /// Counts a handler failure or timeout; promotes to degraded after
    /// [`DEGRADED_THRESHOLD`] consecutive ones.
    pub fn record_failure(&self) {
        let n = self.failures_in_row.fetch_add(1, Ordering::Relaxed) + 1;
        if n >= DEGRADED_THRESHOLD && !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                subscriber = %self.subscriber,
                topic = %self.topic,
                consecutive = n,
                "subscription degraded"
            );
        }
    }

    /// Counts a block-policy publish that missed its deadline; the
    /// envelope never reached the queue.
    pub fn record_publish_timeout(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }

    /// Age of the oldest queued envelope in milliseconds.
    pub fn oldest_age_ms(&self) -> u64 {
        self.queue
            .lock()
            .front()
            .map(|q| q.enqueued_at.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SubscriptionStatus {
        SubscriptionStatus {
            subscriber: self.subscriber.clone(),
            topic: self.topic.clone(),
            depth: self.depth(),
            capacity: self.capacity,
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            lag_ms: self.oldest_age_ms(),
        }
    }
}

/// Serial consumer loop for one subscription.
///
/// Invokes the handler under the per-handler deadline; failures and
/// timeouts never tear the subscription down.
pub(crate) async fn consume(state: Arc<SubscriptionState>, handler_deadline: Duration) {
    loop {
        while let Some(item) = state.pop() {
            let fut = (state.handler)(item.envelope.clone());
            match tokio::time::timeout(handler_deadline, fut).await {
                Ok(Ok(())) => state.record_delivered(),
                Ok(Err(err)) => {
                    debug!(
                        subscriber = %state.subscriber,
                        topic = %state.topic,
                        error = %err,
                        "handler failed"
                    );
                    state.record_failure();
                }
                Err(_) => {
                    warn!(
                        subscriber = %state.subscriber,
                        topic = %state.topic,
                        sequence = item.envelope.sequence,
                        "handler deadline exceeded"
                    );
                    state.record_failure();
                }
            }
            if state.is_closed() {
                return;
            }
        }
        if state.is_closed() {
            return;
        }
        state.data_ready.notified().await;
    }
}
