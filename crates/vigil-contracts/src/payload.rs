//! Canonical payload schemas.
//!
//! Every message on the bus is one of the payload kinds below, wrapped
//! in an [`Envelope`](crate::Envelope). The enum is adjacently tagged
//! so the wire form is `{"kind": "...", "data": {...}}`.
//!
//! # Schema Evolution
//!
//! | Rule | Mechanism |
//! |------|-----------|
//! | Additive change | unknown fields ignored on parse |
//! | Newer minor version | [`Payload::parse`] falls back to [`Payload::Custom`] |
//! | Breaking change | new topic name (`process.detected.v2`) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use vigil_types::{HealthState, ShutdownPhase};

use crate::error::ContractError;

/// Detection classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Motion,
    Object,
}

/// Media artifact classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Snapshot,
    Gif,
    Clip,
}

/// Chaos scenario action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResilienceAction {
    Injected,
    Cleared,
}

/// Aggregate queue pressure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Watermark {
    #[default]
    Normal,
    High,
    Critical,
}

impl Watermark {
    /// Classifies an aggregate utilisation ratio.
    #[must_use]
    pub fn classify(ratio: f64) -> Self {
        if ratio >= 0.9 {
            Self::Critical
        } else if ratio >= 0.75 {
            Self::High
        } else {
            Self::Normal
        }
    }
}

/// Image frame captured by an input module.
///
/// The core never interprets the frame contents; `data_ref` or
/// `image_bytes` are opaque to everything but processors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Reference to the binary payload (file path, object store key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_ref: Option<String>,
    /// Optional encoded image bytes for in-process consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_bytes: Option<Vec<u8>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// Motion or object detection emitted by a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: DetectionKind,
    pub label: String,
    pub confidence: f64,
    /// Bounding box as `[x, y, width, height]` in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    /// Detector-specific metadata, including zone matches.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// Snapshot, GIF, or clip produced by an artifact builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub kind: MediaKind,
    /// Path or handle to the artifact; opaque to the core.
    pub path: String,
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Outbound alert consumed by a notifier module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub channel: String,
    pub caption: String,
    /// Reference to the artifact being delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Command published by dashboards to drive modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

/// Dotted-path configuration change request.
///
/// An update with an empty `path` and `reload` set asks the config
/// service to re-read its files from disk instead of merging a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub path: String,
    #[serde(default)]
    pub value: Value,
    pub requester: String,
    #[serde(default)]
    pub reload: bool,
}

/// Broadcast after every successful configuration merge.
///
/// Carries the full normalized tree with secret values replaced by
/// their references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshotPayload {
    pub version: u64,
    pub config: Value,
}

/// Broadcast after a rollback, a reverted module fragment, or a
/// scheduled drill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRollbackPayload {
    pub previous_version: u64,
    pub current_version: u64,
    pub reason: String,
    /// Set when the rollback is scoped to a single module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_after: Option<String>,
    #[serde(default)]
    pub diagnostics: BTreeMap<String, Value>,
}

/// Diagnostics for a rejected configuration update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRejected {
    pub requester: String,
    pub path: String,
    /// Snapshot version that remains in force.
    pub version: u64,
    pub diagnostics: Vec<String>,
}

/// Health report for a single module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub module: String,
    pub state: HealthState,
    #[serde(default)]
    pub detail: BTreeMap<String, Value>,
    pub last_seen: DateTime<Utc>,
}

/// Aggregated health published on `status.health.summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Worst of children under `stopped < error < degraded < starting < healthy`.
    pub overall: HealthState,
    pub modules: BTreeMap<String, HealthReport>,
    pub sampled_at: DateTime<Utc>,
}

impl HealthSummary {
    /// Builds a summary from individual reports, deriving the overall
    /// state as the worst child. An empty set reports `Stopped`.
    #[must_use]
    pub fn aggregate(modules: BTreeMap<String, HealthReport>, sampled_at: DateTime<Utc>) -> Self {
        let overall = modules
            .values()
            .map(|r| r.state)
            .min()
            .unwrap_or(HealthState::Stopped);
        Self {
            overall,
            modules,
            sampled_at,
        }
    }
}

/// Per-subscription slice of bus telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub subscriber: String,
    pub topic: String,
    pub depth: usize,
    pub capacity: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub degraded: bool,
    /// Age of the oldest queued envelope, zero when empty.
    pub lag_ms: u64,
}

/// Bus telemetry sampled on a fixed cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusStatus {
    pub published_total: u64,
    pub dropped_total: u64,
    pub subscriptions: Vec<SubscriptionStatus>,
    /// Age of the oldest envelope queued anywhere.
    pub oldest_enqueued_ms: u64,
    pub watermark: Watermark,
    pub sampled_at: DateTime<Utc>,
}

/// Progress frame emitted once per staged-shutdown phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownProgress {
    pub phase: ShutdownPhase,
    pub modules_remaining: usize,
    pub elapsed_ms: u64,
    /// Modules stopped cleanly in this phase.
    #[serde(default)]
    pub stopped: Vec<String>,
    /// Modules that missed the stop deadline or failed.
    #[serde(default)]
    pub failed: Vec<String>,
}

/// Chaos scenario toggle or injection telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceEvent {
    pub scenario_id: String,
    pub action: ResilienceAction,
    pub topic: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

/// Per-key drop counters from the rate-limit stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub topic: String,
    pub dropped_by_key: BTreeMap<String, u64>,
}

/// The canonical payload kinds.
///
/// `Custom` carries payloads from schema versions newer than this
/// build understands; the core routes them without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Frame(Frame),
    Detection(DetectionEvent),
    Media(MediaArtifact),
    Alert(AlertNotification),
    Control(ControlCommand),
    ConfigUpdate(ConfigUpdate),
    ConfigSnapshot(ConfigSnapshotPayload),
    ConfigRollback(ConfigRollbackPayload),
    ConfigRejected(ConfigRejected),
    Health(HealthReport),
    HealthSummary(HealthSummary),
    BusStatus(BusStatus),
    ShutdownProgress(ShutdownProgress),
    Resilience(ResilienceEvent),
    RateLimit(RateLimitStatus),
    Custom(Value),
}

impl Payload {
    /// Tolerant parse from a JSON value.
    ///
    /// Unknown fields inside known kinds are ignored. A kind this
    /// build does not know is preserved as [`Payload::Custom`] when
    /// `schema_version` is newer than [`crate::SCHEMA_VERSION`], and
    /// rejected otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] when the value does
    /// not match any known kind and the version is not newer.
    pub fn parse(value: Value, schema_version: u32) -> Result<Self, ContractError> {
        match serde_json::from_value::<Self>(value.clone()) {
            Ok(payload) => Ok(payload),
            Err(_) if schema_version > crate::SCHEMA_VERSION => Ok(Self::Custom(value)),
            Err(err) => Err(ContractError::SchemaViolation(err.to_string())),
        }
    }

    /// Validates the semantic constraints of this payload.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InvalidField`] naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), ContractError> {
        match self {
            Self::Frame(f) => {
                require(!f.camera_id.is_empty(), "frame.camera_id")?;
                require(f.width > 0, "frame.width")?;
                require(f.height > 0, "frame.height")
            }
            Self::Detection(d) => {
                require(!d.camera_id.is_empty(), "detection.camera_id")?;
                require(!d.label.is_empty(), "detection.label")?;
                require(
                    (0.0..=1.0).contains(&d.confidence),
                    "detection.confidence",
                )
            }
            Self::Media(m) => {
                require(!m.camera_id.is_empty(), "media.camera_id")?;
                require(!m.path.is_empty(), "media.path")
            }
            Self::Alert(a) => require(!a.channel.is_empty(), "alert.channel"),
            Self::Control(c) => require(!c.command.is_empty(), "control.command"),
            Self::ConfigUpdate(u) => {
                require(u.reload || !u.path.is_empty(), "config_update.path")?;
                require(!u.requester.is_empty(), "config_update.requester")
            }
            Self::Resilience(r) => require(!r.scenario_id.is_empty(), "resilience.scenario_id"),
            _ => Ok(()),
        }
    }

    /// Short kind name for logging.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Frame(_) => "frame",
            Self::Detection(_) => "detection",
            Self::Media(_) => "media",
            Self::Alert(_) => "alert",
            Self::Control(_) => "control",
            Self::ConfigUpdate(_) => "config_update",
            Self::ConfigSnapshot(_) => "config_snapshot",
            Self::ConfigRollback(_) => "config_rollback",
            Self::ConfigRejected(_) => "config_rejected",
            Self::Health(_) => "health",
            Self::HealthSummary(_) => "health_summary",
            Self::BusStatus(_) => "bus_status",
            Self::ShutdownProgress(_) => "shutdown_progress",
            Self::Resilience(_) => "resilience",
            Self::RateLimit(_) => "rate_limit",
            Self::Custom(_) => "custom",
        }
    }

    /// Returns the detection if this is a detection payload.
    #[must_use]
    pub fn as_detection(&self) -> Option<&DetectionEvent> {
        match self {
            Self::Detection(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the frame if this is a frame payload.
    #[must_use]
    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            Self::Frame(f) => Some(f),
            _ => None,
        }
    }

    /// Returns the control command if this is one.
    #[must_use]
    pub fn as_control(&self) -> Option<&ControlCommand> {
        match self {
            Self::Control(c) => Some(c),
            _ => None,
        }
    }

    /// Looks up a named attribute across payload kinds that carry one.
    ///
    /// Used by the dedupe and rate-limit stages to build keys without
    /// matching on every kind. `camera_id`, `kind`, and `label` resolve
    /// on detections; `camera_id` also resolves on frames and media.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        match (self, name) {
            (Self::Detection(d), "camera_id") => Some(d.camera_id.clone()),
            (Self::Detection(d), "kind") => Some(
                match d.kind {
                    DetectionKind::Motion => "motion",
                    DetectionKind::Object => "object",
                }
                .to_string(),
            ),
            (Self::Detection(d), "label") => Some(d.label.clone()),
            (Self::Detection(d), _) => d.attributes.get(name).map(value_to_key),
            (Self::Frame(f), "camera_id") => Some(f.camera_id.clone()),
            (Self::Frame(f), _) => f.attributes.get(name).map(value_to_key),
            (Self::Media(m), "camera_id") => Some(m.camera_id.clone()),
            (Self::Media(m), _) => m.metadata.get(name).map(value_to_key),
            _ => None,
        }
    }
}

fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn require(ok: bool, field: &str) -> Result<(), ContractError> {
    if ok {
        Ok(())
    } else {
        Err(ContractError::InvalidField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn detection() -> DetectionEvent {
        DetectionEvent {
            camera_id: "cam-a".into(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            kind: DetectionKind::Motion,
            label: "motion".into(),
            confidence: 0.9,
            bbox: None,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn payload_round_trip() {
        let payload = Payload::Detection(detection());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "detection");
        let back = Payload::parse(json, crate::SCHEMA_VERSION).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn parse_ignores_unknown_fields() {
        let mut json = serde_json::to_value(Payload::Detection(detection())).unwrap();
        json["data"]["future_field"] = Value::String("ignored".into());
        let back = Payload::parse(json, crate::SCHEMA_VERSION).unwrap();
        assert!(back.as_detection().is_some());
    }

    #[test]
    fn parse_newer_unknown_kind_becomes_custom() {
        let json = serde_json::json!({"kind": "hologram", "data": {"x": 1}});
        let back = Payload::parse(json.clone(), crate::SCHEMA_VERSION + 1).unwrap();
        assert_eq!(back, Payload::Custom(json));
    }

    #[test]
    fn parse_current_unknown_kind_rejected() {
        let json = serde_json::json!({"kind": "hologram", "data": {}});
        assert!(Payload::parse(json, crate::SCHEMA_VERSION).is_err());
    }

    #[test]
    fn validate_confidence_range() {
        let mut bad = detection();
        bad.confidence = 1.5;
        assert!(Payload::Detection(bad).validate().is_err());
        assert!(Payload::Detection(detection()).validate().is_ok());
    }

    #[test]
    fn validate_empty_camera_rejected() {
        let mut bad = detection();
        bad.camera_id.clear();
        assert!(Payload::Detection(bad).validate().is_err());
    }

    #[test]
    fn attribute_lookup() {
        let payload = Payload::Detection(detection());
        assert_eq!(payload.attribute("camera_id").as_deref(), Some("cam-a"));
        assert_eq!(payload.attribute("kind").as_deref(), Some("motion"));
        assert_eq!(payload.attribute("label").as_deref(), Some("motion"));
        assert_eq!(payload.attribute("zone"), None);
    }

    #[test]
    fn health_summary_worst_of_children() {
        let now = Utc::now();
        let mut modules = BTreeMap::new();
        for (name, state) in [
            ("a", HealthState::Healthy),
            ("b", HealthState::Degraded),
            ("c", HealthState::Starting),
        ] {
            modules.insert(
                name.to_string(),
                HealthReport {
                    module: name.to_string(),
                    state,
                    detail: BTreeMap::new(),
                    last_seen: now,
                },
            );
        }
        let summary = HealthSummary::aggregate(modules, now);
        assert_eq!(summary.overall, HealthState::Degraded);
    }

    #[test]
    fn empty_summary_is_stopped() {
        let summary = HealthSummary::aggregate(BTreeMap::new(), Utc::now());
        assert_eq!(summary.overall, HealthState::Stopped);
    }

    #[test]
    fn watermark_classification() {
        assert_eq!(Watermark::classify(0.2), Watermark::Normal);
        assert_eq!(Watermark::classify(0.8), Watermark::High);
        assert_eq!(Watermark::classify(0.95), Watermark::Critical);
    }
}
