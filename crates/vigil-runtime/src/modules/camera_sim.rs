//! Simulated camera input.
//!
//! Publishes synthetic `Frame`s on `camera.<id>.frame` at a fixed
//! interval. The frame carries no image bytes, only dimensions and a
//! running frame number, which is all downstream processors need in a
//! simulation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use vigil_contracts::{Capability, Frame, HealthReport, Module, ModuleError, ModuleLink, Payload};
use vigil_types::{HealthState, ModuleCategory};

use crate::config::CameraSettings;

/// Synthetic frame source.
pub struct CameraSimModule {
    capability: Capability,
    settings: CameraSettings,
    frames_published: Arc<AtomicU64>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CameraSimModule {
    #[must_use]
    pub fn new(id: &str) -> Self {
        let settings = CameraSettings {
            id: id.to_string(),
            ..CameraSettings::default()
        };
        let capability = Capability::new(ModuleCategory::Input, id)
            .publishes(settings.topic())
            .config_path(format!("cameras.{id}"));
        Self {
            capability,
            settings,
            frames_published: Arc::new(AtomicU64::new(0)),
            stop_tx: None,
            task: None,
        }
    }
}

#[async_trait]
impl Module for CameraSimModule {
    fn capability(&self) -> &Capability {
        &self.capability
    }

    async fn configure(&mut self, fragment: &Value) -> Result<(), ModuleError> {
        let settings: CameraSettings = serde_json::from_value(fragment.clone())
            .map_err(|e| ModuleError::ConfigInvalid(e.to_string()))?;
        if settings.interval_ms == 0 {
            return Err(ModuleError::ConfigInvalid(
                "interval_ms must be positive".into(),
            ));
        }
        self.settings = settings;
        Ok(())
    }

    async fn start(&mut self, link: Arc<dyn ModuleLink>) -> Result<(), ModuleError> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let settings = self.settings.clone();
        let topic = settings.topic();
        let frames_published = self.frames_published.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(settings.interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let number = frames_published.fetch_add(1, Ordering::Relaxed);
                        let mut attributes = BTreeMap::new();
                        attributes.insert("frame_number".to_string(), Value::from(number));
                        attributes.insert("simulated".to_string(), Value::from(true));
                        let frame = Frame {
                            camera_id: settings.id.clone(),
                            timestamp: Utc::now(),
                            width: settings.width,
                            height: settings.height,
                            data_ref: None,
                            image_bytes: None,
                            attributes,
                        };
                        if let Err(err) = link.publish(&topic, Payload::Frame(frame)).await {
                            debug!(camera = %settings.id, error = %err, "frame publish failed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        info!(
            camera = %self.settings.id,
            interval_ms = self.settings.interval_ms,
            "camera simulator started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ModuleError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| ModuleError::StopFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        let mut detail = BTreeMap::new();
        detail.insert(
            "frames_published".into(),
            Value::from(self.frames_published.load(Ordering::Relaxed)),
        );
        HealthReport {
            module: self.capability.id.fqn(),
            state: if self.task.is_some() {
                HealthState::Healthy
            } else {
                HealthState::Stopped
            },
            detail,
            last_seen: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn configure_rejects_zero_interval() {
        let mut camera = CameraSimModule::new("front");
        let fragment = serde_json::json!({"id": "front", "interval_ms": 0});
        assert!(matches!(
            camera.configure(&fragment).await,
            Err(ModuleError::ConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn capability_names_frame_topic() {
        let camera = CameraSimModule::new("front");
        assert_eq!(camera.capability().publishes, vec!["camera.front.frame"]);
        assert_eq!(camera.capability().config_path, "cameras.front");
    }

    #[tokio::test]
    async fn stop_without_start_is_ok() {
        let mut camera = CameraSimModule::new("front");
        camera.stop().await.unwrap();
    }
}
