//! Shared harness for the end-to-end scenarios.

#![allow(dead_code)]

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use vigil_bus::{Bus, BusSettings, Envelope, SubscribeOptions};
use vigil_contracts::{handler, DetectionEvent, DetectionKind, Payload};
use vigil_runtime::config::{CameraSettings, ModuleFragment, VigilConfig};
use vigil_runtime::OrchestratorSettings;

/// Bus with short deadlines and a fast telemetry cadence.
pub fn test_bus() -> Bus {
    Bus::new(BusSettings {
        publish_deadline: Duration::from_millis(200),
        handler_deadline: Duration::from_secs(2),
        telemetry_interval: Duration::from_millis(50),
        telemetry_enabled: true,
        ..BusSettings::default()
    })
}

/// Orchestrator cadences compressed for tests; drills stay disabled
/// unless a test opts in.
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        health_interval: Duration::from_millis(50),
        summary_interval: Duration::from_millis(80),
        health_poll_deadline: Duration::from_secs(1),
        lifecycle_deadline: Duration::from_secs(2),
        drill_interval: None,
    }
}

/// A camera-to-detection pipeline: simulated cameras plus one relay
/// processor emitting a detection per frame.
pub fn pipeline_config(cameras: &[&str], interval_ms: u64) -> VigilConfig {
    let mut config = VigilConfig::default();
    let mut input_topics = Vec::new();
    for id in cameras {
        let camera = CameraSettings {
            id: (*id).to_string(),
            interval_ms,
            ..CameraSettings::default()
        };
        input_topics.push(camera.topic());
        config.cameras.push(camera);
    }
    config.process.modules.push(ModuleFragment {
        id: "motion".into(),
        kind: "relay".into(),
        enabled: true,
        options: serde_json::json!({
            "input_topics": input_topics,
            "output_topic": "process.motion.detected",
            "detect_every": 1,
        }),
    });
    config
}

/// Captures every envelope delivered on one topic.
pub struct Collector {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
}

impl Collector {
    pub fn attach(bus: &Bus, topic: &str) -> Self {
        let envelopes = Arc::new(Mutex::new(Vec::new()));
        let sink = envelopes.clone();
        bus.subscribe(
            "collector",
            topic,
            SubscribeOptions::with_capacity(512),
            handler(move |envelope| {
                let sink = sink.clone();
                async move {
                    sink.lock().push((*envelope).clone());
                    Ok(())
                }
            }),
        )
        .expect("collector subscribe");
        Self { envelopes }
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.envelopes.lock().len()
    }

    /// Polls until the predicate holds; panics after the deadline.
    pub async fn wait_until<F>(&self, what: &str, deadline: Duration, predicate: F)
    where
        F: Fn(&[Envelope]) -> bool,
    {
        let started = tokio::time::Instant::now();
        loop {
            if predicate(&self.envelopes.lock()) {
                return;
            }
            if started.elapsed() > deadline {
                panic!(
                    "timed out waiting for {what} (saw {} envelopes)",
                    self.envelopes.lock().len()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_len(&self, what: &str, n: usize, deadline: Duration) {
        self.wait_until(what, deadline, |envelopes| envelopes.len() >= n)
            .await;
    }
}

/// A motion detection for manual publication.
pub fn detection(camera: &str) -> Payload {
    Payload::Detection(DetectionEvent {
        camera_id: camera.into(),
        timestamp: Utc::now(),
        kind: DetectionKind::Motion,
        label: "motion".into(),
        confidence: 0.9,
        bbox: None,
        attributes: Default::default(),
    })
}
