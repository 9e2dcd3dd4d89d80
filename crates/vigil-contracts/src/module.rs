//! The module lifecycle contract.
//!
//! Modules are the functional units of the platform: camera inputs,
//! detectors, artifact builders, notifiers, storage, dashboards, and
//! the built-in stages. The orchestrator drives every module through
//! the same lifecycle; modules never self-promote.
//!
//! ```text
//! Created ──configure──▶ Configured ──start──▶ Running ──stop──▶ Stopped
//!                             ▲                   │
//!                             └── reconfigure ────┘
//! ```
//!
//! # Transport Independence
//!
//! Modules talk to the bus through [`ModuleLink`], not a concrete bus
//! type. The in-process bus implements the trait today; a remote
//! transport adapter can be slotted in later without touching module
//! code.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use vigil_types::{HealthState, SubscriptionId};

use crate::{Capability, Envelope, HealthReport, ModuleError, Payload};

/// What the bus does when a subscription queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Publisher waits for room, up to the publish deadline.
    Block,
    /// The incoming message is discarded for this subscription.
    #[default]
    DropNewest,
    /// The queue head is evicted to make room.
    DropOldest,
}

/// Handler invocation future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), ModuleError>> + Send>>;

/// Async event handler invoked serially per subscription.
pub type EventHandler = Arc<dyn Fn(Arc<Envelope>) -> HandlerFuture + Send + Sync>;

/// Predicate evaluated before the queue; rejected envelopes are not
/// counted as drops.
pub type EnvelopeFilter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Wraps an async closure into an [`EventHandler`].
///
/// # Example
///
/// ```
/// use vigil_contracts::handler;
///
/// let h = handler(|envelope| async move {
///     let _ = envelope.sequence;
///     Ok(())
/// });
/// let _ = h;
/// ```
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ModuleError>> + Send + 'static,
{
    Arc::new(move |envelope| Box::pin(f(envelope)))
}

/// Subscription parameters.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Bounded queue capacity; `None` uses the bus default (64).
    pub capacity: Option<usize>,
    pub policy: OverflowPolicy,
    pub filter: Option<EnvelopeFilter>,
}

impl SubscribeOptions {
    /// Options with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Sets the overflow policy.
    #[must_use]
    pub fn policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the pre-queue filter.
    #[must_use]
    pub fn filter(mut self, filter: EnvelopeFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// The transport surface injected into modules at start.
///
/// Subscriptions taken through a link belong to the module and must be
/// released in `stop` (the orchestrator treats leaked subscriptions as
/// a defect, and the bus drops their queued envelopes on unsubscribe).
#[async_trait]
pub trait ModuleLink: Send + Sync {
    /// Publishes a payload, returning the assigned sequence number.
    async fn publish(&self, topic: &str, payload: Payload) -> Result<u64, ModuleError>;

    /// Publishes with a correlation id propagated from a prior message.
    async fn publish_correlated(
        &self,
        topic: &str,
        payload: Payload,
        correlation_id: uuid::Uuid,
    ) -> Result<u64, ModuleError>;

    /// Subscribes to an exact topic.
    async fn subscribe(
        &self,
        subscriber: &str,
        topic: &str,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionId, ModuleError>;

    /// Releases a subscription; queued envelopes are dropped and
    /// counted.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ModuleError>;
}

/// Lifecycle trait driven by the orchestrator.
///
/// # Contract
///
/// - `configure` is idempotent and may be called in any non-terminal
///   state; a running module receiving an unchanged fragment must not
///   restart anything.
/// - `start` takes the bus link; all subscriptions happen here.
/// - `stop` is called exactly once and must release every
///   subscription and background task within the stop deadline.
/// - `health` must be cheap; it runs under a 2 s poll deadline.
#[async_trait]
pub trait Module: Send + Sync {
    /// Static capability descriptor.
    fn capability(&self) -> &Capability;

    /// Applies a configuration fragment.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::ConfigInvalid`] when the fragment fails
    /// validation; the orchestrator reverts to the prior fragment.
    async fn configure(&mut self, fragment: &Value) -> Result<(), ModuleError>;

    /// Starts processing; subscriptions are taken here.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::StartFailed`] on failure; the
    /// orchestrator marks the module errored and continues booting.
    async fn start(&mut self, link: Arc<dyn ModuleLink>) -> Result<(), ModuleError>;

    /// Stops processing and releases all resources.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::StopFailed`]; the module is abandoned
    /// either way.
    async fn stop(&mut self) -> Result<(), ModuleError>;

    /// Reports current health. The default is a bare healthy report.
    async fn health(&self) -> HealthReport {
        HealthReport {
            module: self.capability().id.fqn(),
            state: HealthState::Healthy,
            detail: BTreeMap::new(),
            last_seen: Utc::now(),
        }
    }
}

/// Owned module trait object, as held by the orchestrator registry.
pub type BoxedModule = Box<dyn Module>;
