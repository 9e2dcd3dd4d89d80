//! The bus: fan-out, backpressure, interceptors, telemetry wiring.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_contracts::{
    BusStatus, Envelope, EventHandler, ModuleError, ModuleLink, Payload, SubscribeOptions,
    Watermark,
};
use vigil_types::{InterceptorId, SubscriptionId, Topic};

use crate::error::BusError;
use crate::interceptor::{InterceptOutcome, Interceptor, InterceptorHandle};
use crate::subscription::{consume, EnqueueOutcome, SubscriptionState};
use crate::telemetry;

/// Tunables for a bus instance. Defaults match the platform contract.
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// How long a `block`-policy publish waits for queue space.
    pub publish_deadline: Duration,
    /// Per-invocation handler deadline.
    pub handler_deadline: Duration,
    /// Cadence of `status.bus` telemetry frames.
    pub telemetry_interval: Duration,
    /// Queue capacity when a subscription does not specify one.
    pub default_capacity: usize,
    /// Hard upper bound for requested capacities.
    pub max_capacity: usize,
    /// Disable the sampler entirely (tests).
    pub telemetry_enabled: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            publish_deadline: Duration::from_secs(1),
            handler_deadline: Duration::from_secs(5),
            telemetry_interval: Duration::from_secs(1),
            default_capacity: 64,
            max_capacity: 4096,
            telemetry_enabled: true,
        }
    }
}

/// Opaque subscription handle returned by [`Bus::subscribe`].
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
}

impl SubscriptionHandle {
    /// The subscription's identity on the bus.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct BusInner {
    settings: BusSettings,
    sequence: AtomicU64,
    published_total: AtomicU64,
    intercept_dropped: AtomicU64,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<SubscriptionState>>>,
    topic_index: RwLock<HashMap<String, Vec<SubscriptionId>>>,
    interceptors: RwLock<Vec<(InterceptorId, Arc<dyn Interceptor>)>>,
    stopped: AtomicBool,
    telemetry_started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// In-process topic bus.
///
/// Cheap to clone; all clones share the same fan-out state. Construct
/// at boot, pass explicitly, and [`shutdown`](Bus::shutdown) exactly
/// once during core teardown.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// Creates a bus. Telemetry starts on [`Bus::start`].
    #[must_use]
    pub fn new(settings: BusSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(BusInner {
                settings,
                sequence: AtomicU64::new(1),
                published_total: AtomicU64::new(0),
                intercept_dropped: AtomicU64::new(0),
                subscriptions: RwLock::new(HashMap::new()),
                topic_index: RwLock::new(HashMap::new()),
                interceptors: RwLock::new(Vec::new()),
                stopped: AtomicBool::new(false),
                telemetry_started: AtomicBool::new(false),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts the telemetry sampler. Idempotent.
    pub fn start(&self) {
        if !self.inner.settings.telemetry_enabled {
            return;
        }
        if self.inner.telemetry_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = telemetry::spawn_sampler(self.clone(), self.inner.shutdown_tx.subscribe());
        self.inner.tasks.lock().push(task);
        info!(
            interval_ms = self.inner.settings.telemetry_interval.as_millis() as u64,
            "bus telemetry sampler started"
        );
    }

    /// Publishes a payload on a topic.
    ///
    /// Returns the assigned sequence number once enqueuing into every
    /// matching subscription completed. Delivery to handlers is
    /// asynchronous.
    ///
    /// # Errors
    ///
    /// - [`BusError::Topic`] / [`BusError::Contract`] for invalid input
    /// - [`BusError::PublishTimeout`] when a `block`-policy queue stayed
    ///   full past the publish deadline (other subscriptions were still
    ///   served)
    /// - [`BusError::PublishCancelled`] when the bus shut down mid-wait
    /// - [`BusError::Stopped`] after shutdown
    pub async fn publish(&self, topic: &str, payload: Payload) -> Result<u64, BusError> {
        self.do_publish(topic, payload, None).await
    }

    /// Publishes with a correlation id propagated from a related
    /// message.
    pub async fn publish_correlated(
        &self,
        topic: &str,
        payload: Payload,
        correlation_id: Uuid,
    ) -> Result<u64, BusError> {
        self.do_publish(topic, payload, Some(correlation_id)).await
    }

    async fn do_publish(
        &self,
        topic: &str,
        payload: Payload,
        correlation_id: Option<Uuid>,
    ) -> Result<u64, BusError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        let topic = Topic::parse(topic)?;
        payload.validate()?;

        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let mut envelope = Envelope::new(sequence, payload);
        if let Some(id) = correlation_id {
            envelope = envelope.with_correlation(id);
        }

        let envelope = match self.run_interceptors(topic.as_str(), envelope).await {
            Some(envelope) => envelope,
            None => {
                self.inner.intercept_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(topic = %topic, sequence, "publication dropped by interceptor");
                return Ok(sequence);
            }
        };

        self.inner.published_total.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<Arc<SubscriptionState>> = {
            let index = self.inner.topic_index.read();
            let subscriptions = self.inner.subscriptions.read();
            index
                .get(topic.as_str())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| subscriptions.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let envelope = Arc::new(envelope);
        let mut timeout_against: Option<String> = None;

        for state in targets {
            if let Some(filter) = &state.filter {
                if !filter(&envelope) {
                    continue;
                }
            }
            match state.try_enqueue(envelope.clone()) {
                EnqueueOutcome::Enqueued | EnqueueOutcome::Dropped => {}
                EnqueueOutcome::Full => {
                    if self.enqueue_blocking(&state, &envelope).await? {
                        timeout_against.get_or_insert_with(|| state.subscriber.clone());
                    }
                }
            }
        }

        match timeout_against {
            Some(subscriber) => Err(BusError::PublishTimeout {
                topic: topic.as_str().to_string(),
                subscriber,
            }),
            None => Ok(sequence),
        }
    }

    /// Waits for queue space under the `block` policy. Returns `true`
    /// when the deadline elapsed and the envelope was dropped.
    async fn enqueue_blocking(
        &self,
        state: &Arc<SubscriptionState>,
        envelope: &Arc<Envelope>,
    ) -> Result<bool, BusError> {
        let deadline = Instant::now() + self.inner.settings.publish_deadline;
        loop {
            if self.inner.stopped.load(Ordering::Acquire) {
                return Err(BusError::PublishCancelled);
            }
            match state.try_enqueue(envelope.clone()) {
                EnqueueOutcome::Enqueued | EnqueueOutcome::Dropped => return Ok(false),
                EnqueueOutcome::Full => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        state.record_publish_timeout();
                        warn!(
                            topic = %state.topic,
                            subscriber = %state.subscriber,
                            "publish deadline elapsed against full queue"
                        );
                        return Ok(true);
                    }
                    let _ = tokio::time::timeout(remaining, state.space_free.notified()).await;
                }
            }
        }
    }

    async fn run_interceptors(&self, topic: &str, envelope: Envelope) -> Option<Envelope> {
        let chain: Vec<(InterceptorId, Arc<dyn Interceptor>)> =
            self.inner.interceptors.read().clone();
        let mut current = envelope;
        for (_, interceptor) in chain {
            let before = current.clone();
            match interceptor.intercept(topic, current).await {
                Ok(InterceptOutcome::Continue(next)) => current = next,
                Ok(InterceptOutcome::Drop) => return None,
                Err(err) => {
                    warn!(
                        interceptor = interceptor.name(),
                        topic,
                        error = %err,
                        "interceptor failed; passing through"
                    );
                    current = before;
                }
            }
        }
        Some(current)
    }

    /// Registers a handler for an exact topic.
    ///
    /// # Errors
    ///
    /// [`BusError::CapacityOutOfRange`] for a zero capacity or one
    /// above the bus maximum; [`BusError::Topic`] for an invalid topic;
    /// [`BusError::Stopped`] after shutdown.
    pub fn subscribe(
        &self,
        subscriber: &str,
        topic: &str,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle, BusError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        let topic = Topic::parse(topic)?;
        let capacity = options
            .capacity
            .unwrap_or(self.inner.settings.default_capacity);
        if capacity == 0 || capacity > self.inner.settings.max_capacity {
            return Err(BusError::CapacityOutOfRange(capacity));
        }

        let state = Arc::new(SubscriptionState::new(
            subscriber.to_string(),
            topic.as_str().to_string(),
            capacity,
            options.policy,
            options.filter,
            handler,
        ));
        let id = state.id;

        self.inner.subscriptions.write().insert(id, state.clone());
        self.inner
            .topic_index
            .write()
            .entry(topic.as_str().to_string())
            .or_default()
            .push(id);

        let deadline = self.inner.settings.handler_deadline;
        let task = tokio::spawn(consume(state, deadline));
        self.inner.tasks.lock().push(task);

        debug!(subscriber, topic = %topic, capacity, "subscribed");
        Ok(SubscriptionHandle {
            id,
            topic: topic.as_str().to_string(),
        })
    }

    /// Releases a subscription. Queued envelopes are dropped and
    /// counted; the consumer task winds down.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownSubscription`] when already released.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), BusError> {
        self.unsubscribe_by_id(handle.id)
    }

    /// Releases a subscription by id.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownSubscription`] when already released.
    pub fn unsubscribe_by_id(&self, id: SubscriptionId) -> Result<(), BusError> {
        let state = self
            .inner
            .subscriptions
            .write()
            .remove(&id)
            .ok_or(BusError::UnknownSubscription(id))?;
        let mut index = self.inner.topic_index.write();
        if let Some(ids) = index.get_mut(&state.topic) {
            ids.retain(|s| *s != id);
            if ids.is_empty() {
                index.remove(&state.topic);
            }
        }
        drop(index);
        state.close();
        debug!(subscriber = %state.subscriber, topic = %state.topic, "unsubscribed");
        Ok(())
    }

    /// Installs an interceptor at the end of the chain.
    pub fn intercept(&self, interceptor: Arc<dyn Interceptor>) -> InterceptorHandle {
        let id = InterceptorId::new();
        debug!(interceptor = interceptor.name(), "interceptor installed");
        self.inner.interceptors.write().push((id, interceptor));
        InterceptorHandle { id }
    }

    /// Removes an interceptor. Returns `false` when the handle is
    /// unknown.
    pub fn remove_interceptor(&self, handle: &InterceptorHandle) -> bool {
        let mut chain = self.inner.interceptors.write();
        let before = chain.len();
        chain.retain(|(id, _)| *id != handle.id);
        chain.len() != before
    }

    /// Builds a point-in-time telemetry snapshot.
    #[must_use]
    pub fn status_snapshot(&self) -> BusStatus {
        let subscriptions: Vec<_> = self
            .inner
            .subscriptions
            .read()
            .values()
            .map(|s| s.snapshot())
            .collect();
        let total_depth: usize = subscriptions.iter().map(|s| s.depth).sum();
        let total_capacity: usize = subscriptions.iter().map(|s| s.capacity).sum();
        let ratio = if total_capacity == 0 {
            0.0
        } else {
            total_depth as f64 / total_capacity as f64
        };
        let dropped_total = subscriptions.iter().map(|s| s.dropped).sum::<u64>()
            + self.inner.intercept_dropped.load(Ordering::Relaxed);
        BusStatus {
            published_total: self.inner.published_total.load(Ordering::Relaxed),
            dropped_total,
            oldest_enqueued_ms: subscriptions.iter().map(|s| s.lag_ms).max().unwrap_or(0),
            subscriptions,
            watermark: Watermark::classify(ratio),
            sampled_at: Utc::now(),
        }
    }

    /// Stops the bus: fails further publishes, closes every
    /// subscription, and waits for consumer and telemetry tasks.
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);
        let states: Vec<Arc<SubscriptionState>> = {
            let mut subscriptions = self.inner.subscriptions.write();
            self.inner.topic_index.write().clear();
            subscriptions.drain().map(|(_, s)| s).collect()
        };
        for state in &states {
            state.close();
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("bus stopped");
    }

    /// True once [`Bus::shutdown`] ran.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn settings(&self) -> &BusSettings {
        &self.inner.settings
    }
}

#[async_trait]
impl ModuleLink for Bus {
    async fn publish(&self, topic: &str, payload: Payload) -> Result<u64, ModuleError> {
        Bus::publish(self, topic, payload)
            .await
            .map_err(|e| ModuleError::Transport(e.to_string()))
    }

    async fn publish_correlated(
        &self,
        topic: &str,
        payload: Payload,
        correlation_id: Uuid,
    ) -> Result<u64, ModuleError> {
        Bus::publish_correlated(self, topic, payload, correlation_id)
            .await
            .map_err(|e| ModuleError::Transport(e.to_string()))
    }

    async fn subscribe(
        &self,
        subscriber: &str,
        topic: &str,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionId, ModuleError> {
        Bus::subscribe(self, subscriber, topic, options, handler)
            .map(|handle| handle.id())
            .map_err(|e| ModuleError::Transport(e.to_string()))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ModuleError> {
        Bus::unsubscribe_by_id(self, id).map_err(|e| ModuleError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::InterceptOutcome;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;
    use vigil_contracts::{handler, OverflowPolicy};

    fn test_bus() -> Bus {
        Bus::new(BusSettings {
            publish_deadline: Duration::from_millis(100),
            handler_deadline: Duration::from_millis(500),
            telemetry_enabled: false,
            ..BusSettings::default()
        })
    }

    fn control(command: &str) -> Payload {
        Payload::Control(vigil_contracts::ControlCommand {
            command: command.into(),
            target: None,
            arguments: BTreeMap::new(),
        })
    }

    fn collector() -> (EventHandler, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let h = handler(move |env: Arc<Envelope>| {
            let tx = tx.clone();
            async move {
                tx.send(env.sequence).ok();
                Ok(())
            }
        });
        (h, rx)
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = test_bus();
        let (h, mut rx) = collector();
        bus.subscribe("t", "dashboard.control.command", SubscribeOptions::default(), h)
            .unwrap();

        let seq = bus
            .publish("dashboard.control.command", control("ping"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(seq));
    }

    #[tokio::test]
    async fn fifo_within_subscription() {
        let bus = test_bus();
        let (h, mut rx) = collector();
        bus.subscribe("t", "dashboard.control.command", SubscribeOptions::default(), h)
            .unwrap();

        let mut sequences = Vec::new();
        for _ in 0..10 {
            sequences.push(
                bus.publish("dashboard.control.command", control("tick"))
                    .await
                    .unwrap(),
            );
        }
        for expected in sequences {
            assert_eq!(rx.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn sequences_strictly_increase() {
        let bus = test_bus();
        let a = bus
            .publish("dashboard.control.command", control("a"))
            .await
            .unwrap();
        let b = bus
            .publish("dashboard.control.command", control("b"))
            .await
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn filter_rejection_is_not_a_drop() {
        let bus = test_bus();
        let (h, mut rx) = collector();
        let opts = SubscribeOptions::default().filter(Arc::new(|env: &Envelope| {
            env.payload
                .as_control()
                .is_some_and(|c| c.command == "wanted")
        }));
        bus.subscribe("t", "dashboard.control.command", opts, h)
            .unwrap();

        bus.publish("dashboard.control.command", control("unwanted"))
            .await
            .unwrap();
        let seq = bus
            .publish("dashboard.control.command", control("wanted"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(seq));
        let status = bus.status_snapshot();
        assert_eq!(status.subscriptions[0].dropped, 0);
    }

    #[tokio::test]
    async fn drop_newest_bounds_depth_and_counts() {
        let bus = test_bus();
        // Handler parks forever so nothing drains.
        let h = handler(|_| async {
            std::future::pending::<()>().await;
            Ok(())
        });
        bus.subscribe(
            "slow",
            "dashboard.control.command",
            SubscribeOptions::with_capacity(2),
            h,
        )
        .unwrap();

        for _ in 0..5 {
            bus.publish("dashboard.control.command", control("x"))
                .await
                .unwrap();
        }
        // One envelope may already be in the handler; depth + in-flight
        // never exceeds capacity + 1, and drops account for the rest.
        let status = bus.status_snapshot();
        let sub = &status.subscriptions[0];
        assert!(sub.depth <= 2);
        assert!(sub.dropped >= 2, "dropped = {}", sub.dropped);
    }

    #[tokio::test]
    async fn block_policy_times_out() {
        let bus = test_bus();
        let h = handler(|_| async {
            std::future::pending::<()>().await;
            Ok(())
        });
        bus.subscribe(
            "blocked",
            "dashboard.control.command",
            SubscribeOptions::with_capacity(1).policy(OverflowPolicy::Block),
            h,
        )
        .unwrap();

        // First fills the queue (or the in-flight handler); keep
        // publishing until the deadline path reports the timeout.
        let mut saw_timeout = false;
        for _ in 0..4 {
            match bus
                .publish("dashboard.control.command", control("x"))
                .await
            {
                Ok(_) => {}
                Err(BusError::PublishTimeout { subscriber, .. }) => {
                    assert_eq!(subscriber, "blocked");
                    saw_timeout = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_timeout);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = test_bus();
        let (h, mut rx) = collector();
        let handle = bus
            .subscribe("t", "dashboard.control.command", SubscribeOptions::default(), h)
            .unwrap();
        bus.unsubscribe(&handle).unwrap();

        bus.publish("dashboard.control.command", control("x"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            bus.unsubscribe(&handle),
            Err(BusError::UnknownSubscription(_))
        ));
    }

    struct Renamer;

    #[async_trait]
    impl Interceptor for Renamer {
        fn name(&self) -> &'static str {
            "renamer"
        }

        async fn intercept(
            &self,
            _topic: &str,
            mut envelope: Envelope,
        ) -> Result<InterceptOutcome, ModuleError> {
            if let Payload::Control(cmd) = &mut envelope.payload {
                cmd.command = format!("{}!", cmd.command);
            }
            Ok(InterceptOutcome::Continue(envelope))
        }
    }

    struct DropAll;

    #[async_trait]
    impl Interceptor for DropAll {
        async fn intercept(
            &self,
            _topic: &str,
            _envelope: Envelope,
        ) -> Result<InterceptOutcome, ModuleError> {
            Ok(InterceptOutcome::Drop)
        }
    }

    struct Faulty;

    #[async_trait]
    impl Interceptor for Faulty {
        async fn intercept(
            &self,
            _topic: &str,
            _envelope: Envelope,
        ) -> Result<InterceptOutcome, ModuleError> {
            Err(ModuleError::Handler("boom".into()))
        }
    }

    #[tokio::test]
    async fn interceptor_mutates_in_order() {
        let bus = test_bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let h = handler(move |env: Arc<Envelope>| {
            let tx = tx.clone();
            async move {
                if let Some(cmd) = env.payload.as_control() {
                    tx.send(cmd.command.clone()).ok();
                }
                Ok(())
            }
        });
        bus.subscribe("t", "dashboard.control.command", SubscribeOptions::default(), h)
            .unwrap();
        bus.intercept(Arc::new(Renamer));

        bus.publish("dashboard.control.command", control("cmd"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("cmd!"));
    }

    #[tokio::test]
    async fn interceptor_drop_suppresses_delivery() {
        let bus = test_bus();
        let (h, mut rx) = collector();
        bus.subscribe("t", "dashboard.control.command", SubscribeOptions::default(), h)
            .unwrap();
        let dropper = bus.intercept(Arc::new(DropAll));

        bus.publish("dashboard.control.command", control("x"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        assert!(bus.remove_interceptor(&dropper));
        let seq = bus
            .publish("dashboard.control.command", control("y"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(seq));
    }

    #[tokio::test]
    async fn interceptor_error_is_pass_through() {
        let bus = test_bus();
        let (h, mut rx) = collector();
        bus.subscribe("t", "dashboard.control.command", SubscribeOptions::default(), h)
            .unwrap();
        bus.intercept(Arc::new(Faulty));

        let seq = bus
            .publish("dashboard.control.command", control("x"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(seq));
    }

    #[tokio::test]
    async fn invalid_topic_rejected() {
        let bus = test_bus();
        assert!(matches!(
            bus.publish("nodots", control("x")).await,
            Err(BusError::Topic(_))
        ));
        assert!(matches!(
            bus.publish("video.front.frame", control("x")).await,
            Err(BusError::Topic(_))
        ));
    }

    #[tokio::test]
    async fn invalid_payload_rejected() {
        let bus = test_bus();
        let err = bus
            .publish("dashboard.control.command", control(""))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Contract(_)));
    }

    #[tokio::test]
    async fn capacity_bounds_enforced() {
        let bus = test_bus();
        let (h, _rx) = collector();
        assert!(matches!(
            bus.subscribe(
                "t",
                "status.bus",
                SubscribeOptions::with_capacity(0),
                h.clone()
            ),
            Err(BusError::CapacityOutOfRange(0))
        ));
        assert!(matches!(
            bus.subscribe("t", "status.bus", SubscribeOptions::with_capacity(5000), h),
            Err(BusError::CapacityOutOfRange(5000))
        ));
    }

    #[tokio::test]
    async fn publish_after_shutdown_fails() {
        let bus = test_bus();
        bus.shutdown().await;
        assert!(matches!(
            bus.publish("dashboard.control.command", control("x")).await,
            Err(BusError::Stopped)
        ));
        assert!(bus.is_stopped());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let bus = test_bus();
        bus.shutdown().await;
        bus.shutdown().await;
    }
}
