//! Resilience stage: control surface for the chaos interceptor.
//!
//! Scenarios come from configuration and from
//! `{command: "resilience.toggle", scenario_id, enabled, params}`
//! control commands on `dashboard.control.command`. Toggles are
//! reported as `ResilienceEvent` frames on `status.resilience.event`.
//! The interceptor itself lives in `vigil-bus`; this stage only owns
//! its installation and the shared scenario state.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use vigil_bus::{Bus, ChaosInterceptor, ChaosState, InterceptorHandle, Scenario};
use vigil_contracts::{
    handler, topics, Capability, HealthReport, Module, ModuleError, ModuleLink, Payload,
    ResilienceAction, ResilienceEvent, SubscribeOptions,
};
use vigil_types::{HealthState, ModuleCategory, SubscriptionId};

use crate::config::ResilienceSettings;

/// The chaos control stage.
pub struct ResilienceStage {
    capability: Capability,
    bus: Bus,
    state: Arc<ChaosState>,
    interceptor: Option<InterceptorHandle>,
    link: Option<Arc<dyn ModuleLink>>,
    subscription: Option<SubscriptionId>,
}

impl ResilienceStage {
    #[must_use]
    pub fn new(bus: Bus) -> Self {
        let capability = Capability::new(ModuleCategory::Status, "resilience")
            .subscribes(topics::DASHBOARD_CONTROL_COMMAND)
            .publishes(topics::STATUS_RESILIENCE_EVENT)
            .config_path("resilience");
        Self {
            capability,
            bus,
            state: ChaosState::new(),
            interceptor: None,
            link: None,
            subscription: None,
        }
    }

    /// Scenario state, shared with the installed interceptor.
    #[must_use]
    pub fn state(&self) -> Arc<ChaosState> {
        self.state.clone()
    }
}

#[async_trait]
impl Module for ResilienceStage {
    fn capability(&self) -> &Capability {
        &self.capability
    }

    async fn configure(&mut self, fragment: &Value) -> Result<(), ModuleError> {
        let settings: ResilienceSettings = serde_json::from_value(fragment.clone())
            .map_err(|e| ModuleError::ConfigInvalid(e.to_string()))?;
        for scenario in &settings.scenarios {
            if !(0.0..=1.0).contains(&scenario.drop_probability) {
                return Err(ModuleError::ConfigInvalid(format!(
                    "scenario '{}' drop_probability out of range",
                    scenario.scenario_id
                )));
            }
            self.state.upsert(scenario.clone());
        }
        Ok(())
    }

    async fn start(&mut self, link: Arc<dyn ModuleLink>) -> Result<(), ModuleError> {
        self.interceptor = Some(
            self.bus
                .intercept(Arc::new(ChaosInterceptor::new(self.state.clone()))),
        );

        let state = self.state.clone();
        let handler_link = link.clone();
        let id = link
            .subscribe(
                "status::resilience",
                topics::DASHBOARD_CONTROL_COMMAND,
                SubscribeOptions::default(),
                handler(move |envelope| {
                    let state = state.clone();
                    let link = handler_link.clone();
                    async move {
                        let Some(command) = envelope.payload.as_control() else {
                            return Ok(());
                        };
                        if command.command != "resilience.toggle" {
                            return Ok(());
                        }
                        let Some(scenario_id) =
                            command.arguments.get("scenario_id").and_then(Value::as_str)
                        else {
                            warn!("resilience.toggle without scenario_id");
                            return Ok(());
                        };
                        let enabled = command
                            .arguments
                            .get("enabled")
                            .and_then(Value::as_bool)
                            .unwrap_or(true);

                        // Unknown scenarios may be created on the fly
                        // from the params argument.
                        let scenario = match state.set_enabled(scenario_id, enabled) {
                            Some(scenario) => scenario,
                            None => {
                                let params = command.arguments.get("params").cloned();
                                let Some(scenario) = scenario_from_params(
                                    scenario_id,
                                    enabled,
                                    params.as_ref(),
                                ) else {
                                    warn!(scenario_id, "toggle for unknown scenario");
                                    return Ok(());
                                };
                                state.upsert(scenario.clone());
                                scenario
                            }
                        };

                        let mut parameters = BTreeMap::new();
                        parameters.insert("latency_ms".into(), Value::from(scenario.latency_ms));
                        parameters.insert(
                            "drop_probability".into(),
                            Value::from(scenario.drop_probability),
                        );
                        link.publish(
                            topics::STATUS_RESILIENCE_EVENT,
                            Payload::Resilience(ResilienceEvent {
                                scenario_id: scenario.scenario_id.clone(),
                                action: if enabled {
                                    ResilienceAction::Injected
                                } else {
                                    ResilienceAction::Cleared
                                },
                                topic: scenario.topic.clone(),
                                parameters,
                            }),
                        )
                        .await?;
                        Ok(())
                    }
                }),
            )
            .await?;
        self.subscription = Some(id);
        self.link = Some(link);
        info!(
            scenarios = self.state.scenarios().len(),
            "resilience stage started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ModuleError> {
        if let Some(handle) = self.interceptor.take() {
            self.bus.remove_interceptor(&handle);
        }
        if let (Some(link), Some(id)) = (self.link.take(), self.subscription.take()) {
            link.unsubscribe(id).await?;
        }
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        let mut detail = BTreeMap::new();
        let scenarios = self.state.scenarios();
        detail.insert(
            "scenarios".into(),
            serde_json::to_value(&scenarios).unwrap_or(Value::Null),
        );
        detail.insert(
            "injected_drops".into(),
            serde_json::to_value(self.state.drop_counts()).unwrap_or(Value::Null),
        );
        HealthReport {
            module: self.capability.id.fqn(),
            state: if self.interceptor.is_some() {
                HealthState::Healthy
            } else {
                HealthState::Stopped
            },
            detail,
            last_seen: Utc::now(),
        }
    }
}

fn scenario_from_params(scenario_id: &str, enabled: bool, params: Option<&Value>) -> Option<Scenario> {
    let params = params?.as_object()?;
    Some(Scenario {
        scenario_id: scenario_id.to_string(),
        topic: params.get("topic")?.as_str()?.to_string(),
        latency_ms: params.get("latency_ms").and_then(Value::as_u64).unwrap_or(0),
        drop_probability: params
            .get("drop_probability")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        enabled,
    })
}
