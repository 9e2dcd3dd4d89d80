//! Versioned snapshot store with atomic merge and rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use vigil_contracts::{ConfigRollbackPayload, ConfigSnapshotPayload, ConfigUpdate};

use super::{ConfigError, ConfigLoader, VigilConfig, SNAPSHOTS_FILE, SNAPSHOT_HISTORY};
use crate::config::loader::SecretStore;

/// One retained snapshot version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEntry {
    pub version: u64,
    pub fingerprint: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Runtime facade over the validated configuration tree.
///
/// The orchestrator owns the service and serializes every mutation
/// through its single command loop, so no lock is visible here.
///
/// # Version Discipline
///
/// The broadcast version moves strictly forward under acceptance.
/// `apply_changes` either bumps it by exactly one or leaves snapshot
/// and version untouched. A rollback restores an older payload but
/// still bumps the version.
pub struct ConfigService {
    loader: Option<ConfigLoader>,
    secrets: SecretStore,
    snapshot: VigilConfig,
    version: u64,
    history: VecDeque<SnapshotEntry>,
    persist_path: Option<PathBuf>,
}

impl ConfigService {
    /// Loads configuration from disk and resumes version numbering
    /// from the persisted history.
    ///
    /// # Errors
    ///
    /// Propagates loader failures; an unreadable history file is
    /// discarded with a warning rather than failing boot.
    pub fn load(loader: ConfigLoader) -> Result<Self, ConfigError> {
        let loaded = loader.load()?;
        let persist_path = loader.config_dir().join(SNAPSHOTS_FILE);
        let mut service = Self {
            loader: Some(loader),
            secrets: loaded.secrets,
            snapshot: loaded.config,
            version: 0,
            history: VecDeque::new(),
            persist_path: Some(persist_path),
        };
        let last_persisted = service.restore_history();
        service.version = last_persisted + 1;
        service.record_snapshot()?;
        info!(version = service.version, "configuration loaded");
        Ok(service)
    }

    /// Builds a service around an already validated tree, without
    /// persistence. Reload updates re-validate the current tree.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the tree fails
    /// validation.
    pub fn in_memory(config: VigilConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut service = Self {
            loader: None,
            secrets: SecretStore::default(),
            snapshot: config,
            version: 1,
            history: VecDeque::new(),
            persist_path: None,
        };
        service.record_snapshot()?;
        Ok(service)
    }

    /// Latest validated snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &VigilConfig {
        &self.snapshot
    }

    /// Current snapshot version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Secret store for reference resolution.
    #[must_use]
    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    /// SHA-256 fingerprint of the current snapshot.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.snapshot)
    }

    /// Broadcastable view of the current snapshot.
    #[must_use]
    pub fn snapshot_payload(&self) -> ConfigSnapshotPayload {
        ConfigSnapshotPayload {
            version: self.version,
            config: serde_json::to_value(&self.snapshot).unwrap_or(Value::Null),
        }
    }

    /// Retained history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.history.iter()
    }

    /// Applies a batch of dotted-path updates atomically.
    ///
    /// All updates are applied to a working copy and validated as a
    /// whole: either the snapshot advances by exactly one version and
    /// the new payload is returned, or nothing changes. An empty batch
    /// is a no-op returning `None`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownPath`] for a path not present in the
    /// tree, [`ConfigError::Invalid`] when the merged tree fails
    /// validation. The current snapshot stays in force.
    pub fn apply_changes(
        &mut self,
        updates: &[ConfigUpdate],
    ) -> Result<Option<ConfigSnapshotPayload>, ConfigError> {
        if updates.is_empty() {
            return Ok(None);
        }

        let mut working = serde_json::to_value(&self.snapshot)
            .map_err(|e| ConfigError::Persist(e.to_string()))?;
        let mut reloaded_secrets = None;

        for update in updates {
            if update.reload {
                if let Some(loader) = &self.loader {
                    let loaded = loader.load()?;
                    working = serde_json::to_value(&loaded.config)
                        .map_err(|e| ConfigError::Persist(e.to_string()))?;
                    reloaded_secrets = Some(loaded.secrets);
                }
            } else {
                set_value_at_path(&mut working, &update.path, update.value.clone())?;
            }
        }

        let candidate: VigilConfig = serde_json::from_value(working)
            .map_err(|e| ConfigError::invalid(vec![e.to_string()]))?;
        candidate.validate()?;

        self.snapshot = candidate;
        self.version += 1;
        if let Some(secrets) = reloaded_secrets {
            self.secrets = secrets;
        }
        self.record_snapshot()?;
        debug!(version = self.version, "configuration committed");
        Ok(Some(self.snapshot_payload()))
    }

    /// Restores a retained version as a new, higher version.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownVersion`] when the version fell out of
    /// the bounded history.
    pub fn rollback(
        &mut self,
        version: u64,
    ) -> Result<(ConfigRollbackPayload, ConfigSnapshotPayload), ConfigError> {
        let entry = self
            .history
            .iter()
            .find(|e| e.version == version)
            .cloned()
            .ok_or(ConfigError::UnknownVersion(version))?;

        let candidate: VigilConfig = serde_json::from_value(entry.payload)
            .map_err(|e| ConfigError::invalid(vec![e.to_string()]))?;
        candidate.validate()?;

        let fingerprint_before = self.fingerprint();
        let previous_version = self.version;
        self.snapshot = candidate;
        self.version += 1;
        self.record_snapshot()?;
        info!(
            restored = version,
            version = self.version,
            "configuration rolled back"
        );

        let rollback = ConfigRollbackPayload {
            previous_version,
            current_version: self.version,
            reason: format!("rollback_to_{version}"),
            module: None,
            fingerprint_before: Some(fingerprint_before),
            fingerprint_after: Some(self.fingerprint()),
            diagnostics: Default::default(),
        };
        Ok((rollback, self.snapshot_payload()))
    }

    fn record_snapshot(&mut self) -> Result<(), ConfigError> {
        let payload =
            serde_json::to_value(&self.snapshot).map_err(|e| ConfigError::Persist(e.to_string()))?;
        self.history.push_back(SnapshotEntry {
            version: self.version,
            fingerprint: fingerprint_of(&self.snapshot),
            payload,
            timestamp: Utc::now(),
        });
        while self.history.len() > SNAPSHOT_HISTORY {
            self.history.pop_front();
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let entries: Vec<&SnapshotEntry> = self.history.iter().collect();
        let body = serde_json::to_string_pretty(&entries)
            .map_err(|e| ConfigError::Persist(e.to_string()))?;
        std::fs::write(path, body).map_err(|e| ConfigError::Persist(e.to_string()))
    }

    /// Loads persisted history; returns the highest persisted version
    /// (0 when none).
    fn restore_history(&mut self) -> u64 {
        let Some(path) = &self.persist_path else {
            return 0;
        };
        let Ok(body) = std::fs::read_to_string(path) else {
            return 0;
        };
        match serde_json::from_str::<Vec<SnapshotEntry>>(&body) {
            Ok(entries) => {
                let last = entries.iter().map(|e| e.version).max().unwrap_or(0);
                self.history = entries
                    .into_iter()
                    .rev()
                    .take(SNAPSHOT_HISTORY)
                    .rev()
                    .collect();
                last
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding unreadable snapshot history");
                0
            }
        }
    }
}

fn fingerprint_of(config: &VigilConfig) -> String {
    // serde_json maps are sorted, so the encoding is canonical.
    let encoded = serde_json::to_string(config).unwrap_or_default();
    let digest = Sha256::digest(encoded.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Replaces the value at a dotted path. Every segment, including the
/// leaf, must already exist; arrays are addressed by numeric index.
fn set_value_at_path(tree: &mut Value, path: &str, new_value: Value) -> Result<(), ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::UnknownPath(path.to_string()));
    }
    let mut current = tree;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match current {
            Value::Object(map) => {
                let slot = map
                    .get_mut(*segment)
                    .ok_or_else(|| ConfigError::UnknownPath(path.to_string()))?;
                if last {
                    *slot = new_value;
                    return Ok(());
                }
                current = slot;
            }
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| ConfigError::UnknownPath(path.to_string()))?;
                let slot = items
                    .get_mut(index)
                    .ok_or_else(|| ConfigError::UnknownPath(path.to_string()))?;
                if last {
                    *slot = new_value;
                    return Ok(());
                }
                current = slot;
            }
            _ => return Err(ConfigError::UnknownPath(path.to_string())),
        }
    }
    unreachable!("loop returns on the last segment")
}
