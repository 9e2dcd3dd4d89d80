//! Factory registry, module records, and the tracking link.
//!
//! Dynamic dispatch over module categories is an explicit mapping from
//! the fragment's `type` field to a factory, not inheritance. The
//! registry ships with factories for every built-in stage and shim;
//! embedders register their own types alongside.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use vigil_bus::Bus;
use vigil_contracts::{
    BoxedModule, EventHandler, HealthReport, ModuleError, ModuleLink, Payload, SubscribeOptions,
};
use vigil_types::{LifecycleState, ModuleCategory, SubscriptionId};

use super::error::OrchestratorError;
use crate::modules::{CameraSimModule, RelayModule};
use crate::stages::{DedupeStage, RateLimitStage, ResilienceStage};

/// Instantiates a module from its fragment.
///
/// The orchestrator configures the module right after creation, so
/// factories may ignore the fragment and build defaults.
pub trait ModuleFactory: Send + Sync {
    fn create(&self, id: &str, fragment: &Value) -> Result<BoxedModule, OrchestratorError>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&str, &Value) -> Result<BoxedModule, OrchestratorError> + Send + Sync,
{
    fn create(&self, id: &str, fragment: &Value) -> Result<BoxedModule, OrchestratorError> {
        self(id, fragment)
    }
}

/// Explicit `type` → factory mapping.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, Box<dyn ModuleFactory>>,
}

impl FactoryRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in stages and shim modules:
    /// `dedupe`, `rate_limit`, `resilience`, `camera_sim`, `relay`.
    #[must_use]
    pub fn with_builtins(bus: &Bus) -> Self {
        let mut registry = Self::new();
        registry.register("dedupe", |_: &str, _: &Value| {
            Ok(Box::new(DedupeStage::new()) as BoxedModule)
        });
        registry.register("rate_limit", |_: &str, _: &Value| {
            Ok(Box::new(RateLimitStage::new()) as BoxedModule)
        });
        registry.register("camera_sim", |id: &str, _: &Value| {
            Ok(Box::new(CameraSimModule::new(id)) as BoxedModule)
        });
        registry.register("relay", |id: &str, _: &Value| {
            Ok(Box::new(RelayModule::new(id)) as BoxedModule)
        });
        let chaos_bus = bus.clone();
        registry.register("resilience", move |_: &str, _: &Value| {
            Ok(Box::new(ResilienceStage::new(chaos_bus.clone())) as BoxedModule)
        });
        registry
    }

    /// Registers (or replaces) a factory for a fragment type.
    pub fn register(&mut self, kind: impl Into<String>, factory: impl ModuleFactory + 'static) {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Instantiates a module.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::FactoryMissing`] for an unknown type.
    pub fn create(
        &self,
        kind: &str,
        id: &str,
        fragment: &Value,
    ) -> Result<BoxedModule, OrchestratorError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| OrchestratorError::FactoryMissing(kind.to_string()))?;
        debug!(id, kind, "instantiating module");
        factory.create(id, fragment)
    }

    /// Registered type names.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

/// Bus link that records the subscriptions a module takes, so the
/// orchestrator can force-release them when the module misses its stop
/// deadline.
pub(crate) struct TrackingLink {
    bus: Bus,
    ids: Mutex<HashSet<SubscriptionId>>,
}

impl TrackingLink {
    pub fn new(bus: Bus) -> Arc<Self> {
        Arc::new(Self {
            bus,
            ids: Mutex::new(HashSet::new()),
        })
    }

    /// Unsubscribes everything the module left behind. Returns how
    /// many subscriptions were leaked.
    pub fn release_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self.ids.lock().drain().collect();
        let leaked = ids.len();
        for id in ids {
            let _ = self.bus.unsubscribe_by_id(id);
        }
        leaked
    }
}

#[async_trait]
impl ModuleLink for TrackingLink {
    async fn publish(&self, topic: &str, payload: Payload) -> Result<u64, ModuleError> {
        ModuleLink::publish(&self.bus, topic, payload).await
    }

    async fn publish_correlated(
        &self,
        topic: &str,
        payload: Payload,
        correlation_id: uuid::Uuid,
    ) -> Result<u64, ModuleError> {
        ModuleLink::publish_correlated(&self.bus, topic, payload, correlation_id).await
    }

    async fn subscribe(
        &self,
        subscriber: &str,
        topic: &str,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionId, ModuleError> {
        let id = ModuleLink::subscribe(&self.bus, subscriber, topic, options, handler).await?;
        self.ids.lock().insert(id);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ModuleError> {
        self.ids.lock().remove(&id);
        ModuleLink::unsubscribe(&self.bus, id).await
    }
}

/// Everything the orchestrator holds about one module.
pub(crate) struct ModuleRecord {
    pub id: String,
    pub category: ModuleCategory,
    pub module: BoxedModule,
    pub fragment: Value,
    pub state: LifecycleState,
    pub quarantined: bool,
    pub last_health: Option<HealthReport>,
    pub link: Arc<TrackingLink>,
}
