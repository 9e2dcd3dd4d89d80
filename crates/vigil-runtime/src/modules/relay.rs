//! Scripted processor relay.
//!
//! Subscribes to frame topics and emits a `DetectionEvent` every Nth
//! frame per camera. Stands in for a real detector during drills and
//! end-to-end tests; the detection inherits the frame's envelope
//! correlation so artifacts can be traced back to their source frame.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use vigil_contracts::{
    handler, Capability, DetectionEvent, DetectionKind, HealthReport, Module, ModuleError,
    ModuleLink, Payload, SubscribeOptions,
};
use vigil_types::{HealthState, ModuleCategory, SubscriptionId};

/// Relay settings carried in the module fragment's options.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelaySettings {
    pub input_topics: Vec<String>,
    pub output_topic: String,
    /// Emit one detection every N frames per camera; 0 disables.
    pub detect_every: u64,
    pub label: String,
    pub confidence: f64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            input_topics: Vec::new(),
            output_topic: "process.motion.detected".into(),
            detect_every: 1,
            label: "motion".into(),
            confidence: 0.9,
        }
    }
}

/// Synthetic detector.
pub struct RelayModule {
    capability: Capability,
    settings: RelaySettings,
    frames_seen: Arc<Mutex<HashMap<String, u64>>>,
    detections_emitted: Arc<AtomicU64>,
    link: Option<Arc<dyn ModuleLink>>,
    subscriptions: Vec<SubscriptionId>,
}

impl RelayModule {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            capability: Capability::new(ModuleCategory::Process, id),
            settings: RelaySettings::default(),
            frames_seen: Arc::new(Mutex::new(HashMap::new())),
            detections_emitted: Arc::new(AtomicU64::new(0)),
            link: None,
            subscriptions: Vec::new(),
        }
    }
}

#[async_trait]
impl Module for RelayModule {
    fn capability(&self) -> &Capability {
        &self.capability
    }

    async fn configure(&mut self, fragment: &Value) -> Result<(), ModuleError> {
        let settings: RelaySettings = serde_json::from_value(fragment.clone())
            .map_err(|e| ModuleError::ConfigInvalid(e.to_string()))?;
        if settings.input_topics.is_empty() {
            return Err(ModuleError::ConfigInvalid(
                "input_topics must not be empty".into(),
            ));
        }
        self.settings = settings;
        Ok(())
    }

    async fn start(&mut self, link: Arc<dyn ModuleLink>) -> Result<(), ModuleError> {
        for input_topic in self.settings.input_topics.clone() {
            let settings = self.settings.clone();
            let frames_seen = self.frames_seen.clone();
            let detections_emitted = self.detections_emitted.clone();
            let handler_link = link.clone();
            let subscriber = self.capability.id.fqn();

            let id = link
                .subscribe(
                    &subscriber,
                    &input_topic,
                    SubscribeOptions::default(),
                    handler(move |envelope| {
                        let settings = settings.clone();
                        let frames_seen = frames_seen.clone();
                        let detections_emitted = detections_emitted.clone();
                        let link = handler_link.clone();
                        async move {
                            let Some(frame) = envelope.payload.as_frame() else {
                                return Ok(());
                            };
                            if settings.detect_every == 0 {
                                return Ok(());
                            }
                            let count = {
                                let mut seen = frames_seen.lock();
                                let entry = seen.entry(frame.camera_id.clone()).or_insert(0);
                                *entry += 1;
                                *entry
                            };
                            if count % settings.detect_every != 0 {
                                return Ok(());
                            }

                            detections_emitted.fetch_add(1, Ordering::Relaxed);
                            let detection = DetectionEvent {
                                camera_id: frame.camera_id.clone(),
                                timestamp: frame.timestamp,
                                kind: DetectionKind::Motion,
                                label: settings.label.clone(),
                                confidence: settings.confidence,
                                bbox: None,
                                attributes: BTreeMap::new(),
                            };
                            match envelope.correlation_id {
                                Some(correlation) => {
                                    link.publish_correlated(
                                        &settings.output_topic,
                                        Payload::Detection(detection),
                                        correlation,
                                    )
                                    .await?;
                                }
                                None => {
                                    link.publish(
                                        &settings.output_topic,
                                        Payload::Detection(detection),
                                    )
                                    .await?;
                                }
                            }
                            Ok(())
                        }
                    }),
                )
                .await?;
            self.subscriptions.push(id);
        }
        self.link = Some(link);
        info!(
            inputs = self.settings.input_topics.len(),
            output = %self.settings.output_topic,
            "relay processor started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ModuleError> {
        if let Some(link) = self.link.take() {
            for id in self.subscriptions.drain(..) {
                link.unsubscribe(id).await?;
            }
        }
        self.frames_seen.lock().clear();
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        let mut detail = BTreeMap::new();
        detail.insert(
            "detections_emitted".into(),
            Value::from(self.detections_emitted.load(Ordering::Relaxed)),
        );
        HealthReport {
            module: self.capability.id.fqn(),
            state: if self.subscriptions.is_empty() {
                HealthState::Stopped
            } else {
                HealthState::Healthy
            },
            detail,
            last_seen: Utc::now(),
        }
    }
}
