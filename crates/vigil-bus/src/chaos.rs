//! Chaos injection: latency and drop scenarios behind an interceptor.
//!
//! Scenario state is shared between the [`ChaosInterceptor`] installed
//! on the bus and the resilience stage that toggles scenarios from
//! `dashboard.control.command` messages. The interceptor never touches
//! `status.*` topics, so chaos cannot delay or drop its own telemetry.

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use vigil_contracts::{Envelope, ModuleError};

use crate::interceptor::{InterceptOutcome, Interceptor};

/// One fault-injection scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub scenario_id: String,
    /// Exact topic, or a prefix glob with a trailing `.*`
    /// (`camera.*` matches every camera topic).
    pub topic: String,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub drop_probability: f64,
    #[serde(default)]
    pub enabled: bool,
}

impl Scenario {
    fn matches(&self, topic: &str) -> bool {
        match self.topic.strip_suffix(".*") {
            Some(prefix) => {
                topic.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.'))
            }
            None => self.topic == topic,
        }
    }
}

#[derive(Default)]
struct ScenarioEntry {
    scenario: Scenario,
    drops: u64,
}

/// Shared scenario registry.
#[derive(Default)]
pub struct ChaosState {
    entries: RwLock<HashMap<String, ScenarioEntry>>,
}

impl ChaosState {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inserts or replaces a scenario, preserving its drop counter.
    pub fn upsert(&self, scenario: Scenario) {
        let mut entries = self.entries.write();
        let drops = entries
            .get(&scenario.scenario_id)
            .map(|e| e.drops)
            .unwrap_or(0);
        entries.insert(
            scenario.scenario_id.clone(),
            ScenarioEntry { scenario, drops },
        );
    }

    /// Enables or disables a scenario. Returns the updated scenario,
    /// or `None` when the id is unknown.
    pub fn set_enabled(&self, scenario_id: &str, enabled: bool) -> Option<Scenario> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(scenario_id)?;
        entry.scenario.enabled = enabled;
        Some(entry.scenario.clone())
    }

    /// Removes every scenario.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Current scenarios, for health detail.
    #[must_use]
    pub fn scenarios(&self) -> Vec<Scenario> {
        self.entries
            .read()
            .values()
            .map(|e| e.scenario.clone())
            .collect()
    }

    /// Cumulative injected drops per scenario.
    #[must_use]
    pub fn drop_counts(&self) -> HashMap<String, u64> {
        self.entries
            .read()
            .iter()
            .map(|(id, e)| (id.clone(), e.drops))
            .collect()
    }

    fn actions_for(&self, topic: &str) -> Vec<(String, Duration, f64)> {
        self.entries
            .read()
            .values()
            .filter(|e| e.scenario.enabled && e.scenario.matches(topic))
            .map(|e| {
                (
                    e.scenario.scenario_id.clone(),
                    Duration::from_millis(e.scenario.latency_ms),
                    e.scenario.drop_probability,
                )
            })
            .collect()
    }

    fn note_drop(&self, scenario_id: &str) {
        if let Some(entry) = self.entries.write().get_mut(scenario_id) {
            entry.drops += 1;
        }
    }
}

/// Bus interceptor applying the active scenarios.
pub struct ChaosInterceptor {
    state: Arc<ChaosState>,
}

impl ChaosInterceptor {
    #[must_use]
    pub fn new(state: Arc<ChaosState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Interceptor for ChaosInterceptor {
    fn name(&self) -> &'static str {
        "chaos"
    }

    async fn intercept(
        &self,
        topic: &str,
        envelope: Envelope,
    ) -> Result<InterceptOutcome, ModuleError> {
        // Re-entrancy guard: telemetry and contract diagnostics are
        // never valid chaos targets.
        if topic.starts_with("status.") {
            return Ok(InterceptOutcome::Continue(envelope));
        }
        for (scenario_id, latency, drop_probability) in self.state.actions_for(topic) {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if drop_probability > 0.0 && rand::thread_rng().gen::<f64>() < drop_probability {
                self.state.note_drop(&scenario_id);
                debug!(scenario = %scenario_id, topic, "chaos drop injected");
                return Ok(InterceptOutcome::Drop);
            }
        }
        Ok(InterceptOutcome::Continue(envelope))
    }
}
