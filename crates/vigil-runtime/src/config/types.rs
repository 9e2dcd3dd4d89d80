//! Configuration tree types.
//!
//! All sections implement [`Default`] so a missing file yields a
//! complete, valid tree. The tree is partitioned by module category;
//! every fragment carries a stable `id` and a `type` naming its
//! factory.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_bus::Scenario;
use vigil_types::ModuleCategory;

use super::ConfigError;

/// Main configuration structure, the unified tree after merging all
/// layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VigilConfig {
    pub system: SystemSettings,
    pub cameras: Vec<CameraSettings>,
    pub process: SectionSettings,
    pub event: EventSection,
    pub outputs: OutputSection,
    pub storage: SectionSettings,
    pub analytics: SectionSettings,
    pub dashboards: SectionSettings,
    pub status: SectionSettings,
    pub resilience: ResilienceSettings,
}

/// Platform-wide settings owned by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SystemSettings {
    pub name: String,
    pub debug: bool,
    /// Module health poll interval.
    pub health_interval_secs: f64,
    /// `status.health.summary` cadence.
    pub summary_interval_secs: f64,
    /// Deadline for a single `module.health()` call.
    pub health_poll_deadline_secs: f64,
    /// Deadline for configure/start/stop calls.
    pub lifecycle_deadline_secs: f64,
    /// Rollback drill cadence; `None` disables drills.
    pub drill_interval_hours: Option<f64>,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            name: "vigil".into(),
            debug: false,
            health_interval_secs: 5.0,
            summary_interval_secs: 10.0,
            health_poll_deadline_secs: 2.0,
            lifecycle_deadline_secs: 10.0,
            drill_interval_hours: None,
        }
    }
}

/// A generic per-module fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleFragment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "empty_object")]
    pub options: Value,
}

/// A camera input fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraSettings {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub interval_ms: u64,
    pub width: u32,
    pub height: u32,
    pub options: Value,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: "camera_sim".into(),
            enabled: true,
            interval_ms: 1000,
            width: 640,
            height: 480,
            options: empty_object(),
        }
    }
}

impl CameraSettings {
    /// Frame topic for this camera.
    #[must_use]
    pub fn topic(&self) -> String {
        format!("camera.{}.frame", self.id)
    }
}

/// A section holding only generic fragments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SectionSettings {
    pub modules: Vec<ModuleFragment>,
}

/// Event section: the built-in dedupe stage plus artifact builders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventSection {
    pub dedupe: DedupeSettings,
    pub modules: Vec<ModuleFragment>,
}

/// Outputs section: the built-in rate-limit stage plus notifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSection {
    pub rate_limit: RateLimitSettings,
    pub modules: Vec<ModuleFragment>,
}

/// Detection de-duplication stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupeSettings {
    pub enabled: bool,
    pub input_topic: String,
    pub output_topic: String,
    /// Suppression window on envelope time.
    pub window_seconds: f64,
    /// Attributes joined into the suppression key.
    pub key_fields: Vec<String>,
    /// Bounded LRU size for remembered keys.
    pub max_entries: usize,
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            input_topic: "process.motion.detected".into(),
            output_topic: "process.motion.unique".into(),
            window_seconds: 30.0,
            key_fields: vec!["camera_id".into(), "kind".into(), "label".into()],
            max_entries: 4096,
        }
    }
}

/// Token-bucket rate-limit stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub input_topic: String,
    pub output_topic: String,
    /// Bucket capacity per key.
    pub capacity: u32,
    pub refill_per_second: f64,
    pub key_field: String,
    /// Idle buckets are evicted after this window.
    pub idle_eviction_seconds: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            input_topic: "event.snapshot.ready".into(),
            output_topic: "event.snapshot.allowed".into(),
            capacity: 5,
            refill_per_second: 0.1,
            key_field: "camera_id".into(),
            idle_eviction_seconds: 300.0,
        }
    }
}

/// Chaos testing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResilienceSettings {
    pub enabled: bool,
    pub scenarios: Vec<Scenario>,
}

/// One enumerated fragment: what the orchestrator instantiates.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub category: ModuleCategory,
    pub id: String,
    pub kind: String,
    pub enabled: bool,
    pub value: Value,
}

impl VigilConfig {
    /// Validates the whole tree, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing each offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut diagnostics = Vec::new();

        if self.system.health_interval_secs <= 0.0 {
            diagnostics.push("system.health_interval_secs must be positive".into());
        }
        if self.system.summary_interval_secs <= 0.0 {
            diagnostics.push("system.summary_interval_secs must be positive".into());
        }
        if self.system.lifecycle_deadline_secs <= 0.0 {
            diagnostics.push("system.lifecycle_deadline_secs must be positive".into());
        }
        if let Some(hours) = self.system.drill_interval_hours {
            if hours <= 0.0 {
                diagnostics.push("system.drill_interval_hours must be positive".into());
            }
        }

        for camera in &self.cameras {
            if camera.id.is_empty() {
                diagnostics.push("cameras[].id must not be empty".into());
            }
            if camera.interval_ms == 0 {
                diagnostics.push(format!("cameras.{}.interval_ms must be positive", camera.id));
            }
        }

        if self.event.dedupe.window_seconds < 0.0 {
            diagnostics.push("event.dedupe.window_seconds must not be negative".into());
        }
        if self.event.dedupe.max_entries == 0 {
            diagnostics.push("event.dedupe.max_entries must be positive".into());
        }
        if self.event.dedupe.key_fields.is_empty() {
            diagnostics.push("event.dedupe.key_fields must not be empty".into());
        }

        if self.outputs.rate_limit.capacity == 0 {
            diagnostics.push("outputs.rate_limit.capacity must be positive".into());
        }
        if self.outputs.rate_limit.refill_per_second < 0.0 {
            diagnostics.push("outputs.rate_limit.refill_per_second must not be negative".into());
        }

        for scenario in &self.resilience.scenarios {
            if !(0.0..=1.0).contains(&scenario.drop_probability) {
                diagnostics.push(format!(
                    "resilience.scenarios.{}.drop_probability must be within [0, 1]",
                    scenario.scenario_id
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for fragment in self.fragments() {
            if fragment.id.is_empty() {
                diagnostics.push(format!("{} fragment with empty id", fragment.category));
            } else if !seen.insert(fragment.id.clone()) {
                diagnostics.push(format!("duplicate module id '{}'", fragment.id));
            }
        }

        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::invalid(diagnostics))
        }
    }

    /// Enumerates every fragment in startup order: consumers before
    /// producers, so inputs come last and no early frame is lost.
    #[must_use]
    pub fn fragments(&self) -> Vec<Fragment> {
        let mut fragments = Vec::new();

        if self.resilience.enabled {
            fragments.push(Fragment {
                category: ModuleCategory::Status,
                id: "resilience".into(),
                kind: "resilience".into(),
                enabled: true,
                value: to_value(&self.resilience),
            });
        }
        push_section(&mut fragments, ModuleCategory::Status, &self.status);
        push_section(&mut fragments, ModuleCategory::Dashboard, &self.dashboards);
        push_section(&mut fragments, ModuleCategory::Analytics, &self.analytics);
        push_section(&mut fragments, ModuleCategory::Storage, &self.storage);

        if self.outputs.rate_limit.enabled {
            fragments.push(Fragment {
                category: ModuleCategory::Output,
                id: "rate_limit".into(),
                kind: "rate_limit".into(),
                enabled: true,
                value: to_value(&self.outputs.rate_limit),
            });
        }
        for module in &self.outputs.modules {
            fragments.push(fragment_from(ModuleCategory::Output, module));
        }

        if self.event.dedupe.enabled {
            fragments.push(Fragment {
                category: ModuleCategory::Event,
                id: "dedupe".into(),
                kind: "dedupe".into(),
                enabled: true,
                value: to_value(&self.event.dedupe),
            });
        }
        for module in &self.event.modules {
            fragments.push(fragment_from(ModuleCategory::Event, module));
        }

        push_section(&mut fragments, ModuleCategory::Process, &self.process);

        for camera in &self.cameras {
            fragments.push(Fragment {
                category: ModuleCategory::Input,
                id: camera.id.clone(),
                kind: camera.kind.clone(),
                enabled: camera.enabled,
                value: to_value(camera),
            });
        }

        fragments
    }

    /// Looks up the current fragment for a module id.
    #[must_use]
    pub fn fragment_for(&self, id: &str) -> Option<Fragment> {
        self.fragments().into_iter().find(|f| f.id == id)
    }
}

fn push_section(fragments: &mut Vec<Fragment>, category: ModuleCategory, section: &SectionSettings) {
    for module in &section.modules {
        fragments.push(fragment_from(category, module));
    }
}

fn fragment_from(category: ModuleCategory, module: &ModuleFragment) -> Fragment {
    Fragment {
        category,
        id: module.id.clone(),
        kind: module.kind.clone(),
        enabled: module.enabled,
        value: module.options.clone(),
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn default_true() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tree_is_valid() {
        VigilConfig::default().validate().unwrap();
    }

    #[test]
    fn negative_dedupe_window_rejected() {
        let mut config = VigilConfig::default();
        config.event.dedupe.window_seconds = -1.0;
        let err = config.validate().unwrap_err();
        assert!(err
            .diagnostics()
            .iter()
            .any(|d| d.contains("window_seconds")));
    }

    #[test]
    fn zero_rate_limit_capacity_rejected() {
        let mut config = VigilConfig::default();
        config.outputs.rate_limit.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_module_ids_rejected() {
        let mut config = VigilConfig::default();
        config.cameras.push(CameraSettings {
            id: "front".into(),
            ..CameraSettings::default()
        });
        config.cameras.push(CameraSettings {
            id: "front".into(),
            ..CameraSettings::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.diagnostics().iter().any(|d| d.contains("duplicate")));
    }

    #[test]
    fn fragments_put_inputs_last() {
        let mut config = VigilConfig::default();
        config.cameras.push(CameraSettings {
            id: "front".into(),
            ..CameraSettings::default()
        });
        let fragments = config.fragments();
        assert_eq!(fragments.last().unwrap().id, "front");
        // Built-in stages are always enumerated.
        assert!(fragments.iter().any(|f| f.id == "dedupe"));
        assert!(fragments.iter().any(|f| f.id == "rate_limit"));
    }

    #[test]
    fn fragment_lookup_by_id() {
        let config = VigilConfig::default();
        let dedupe = config.fragment_for("dedupe").unwrap();
        assert_eq!(dedupe.kind, "dedupe");
        assert!(config.fragment_for("missing").is_none());
    }

    #[test]
    fn toml_round_trip() {
        let toml = r#"
[system]
name = "site-a"

[[cameras]]
id = "front"
interval_ms = 500

[event.dedupe]
window_seconds = 10.0

[outputs.rate_limit]
capacity = 2
"#;
        let config: VigilConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.system.name, "site-a");
        assert_eq!(config.cameras[0].id, "front");
        assert_eq!(config.cameras[0].width, 640);
        assert_eq!(config.event.dedupe.window_seconds, 10.0);
        assert_eq!(config.outputs.rate_limit.capacity, 2);
        config.validate().unwrap();
    }

    #[test]
    fn camera_topic_derivation() {
        let camera = CameraSettings {
            id: "front".into(),
            ..CameraSettings::default()
        };
        assert_eq!(camera.topic(), "camera.front.frame");
    }
}
