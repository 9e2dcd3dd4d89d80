//! Layered configuration loader.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Base file (`config.toml`)
//! 3. Environment overlay (`config.<env>.toml`, selected by
//!    `VIGIL_ENV` or the builder)
//! 4. Environment variables (`VIGIL_*`)
//! 5. Secrets document (`secrets.toml`, 0600, held out of the tree)
//!
//! Each layer overrides the previous. Missing files are silently
//! ignored; files that exist but fail to parse abort the load.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ConfigError, VigilConfig, CONFIG_FILE, SECRETS_FILE};

/// Helper macro for float environment overrides.
macro_rules! parse_env_f64 {
    ($field:expr, $var:literal) => {
        if let Ok(raw) = std::env::var($var) {
            $field = raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: $var.into(),
                message: format!("expected number, got '{raw}'"),
            })?;
        }
    };
}

/// Resolved secrets, addressed by `secrets.<section>.<key>` references.
///
/// Values never enter the configuration tree and never appear in
/// snapshot broadcasts.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    values: BTreeMap<String, String>,
}

impl SecretStore {
    /// Resolves a `secrets.`-prefixed reference.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when the reference is
    /// not held.
    pub fn resolve(&self, reference: &str) -> Result<&str, ConfigError> {
        let key = reference.strip_prefix("secrets.").unwrap_or(reference);
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingSecret(reference.to_string()))
    }

    /// True when no secrets are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn from_toml(raw: &toml::Value) -> Self {
        let mut values = BTreeMap::new();
        flatten_secrets(raw, String::new(), &mut values);
        Self { values }
    }
}

fn flatten_secrets(value: &toml::Value, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, inner) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_secrets(inner, path, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}

/// Result of a full load: the validated tree plus the secret store.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: VigilConfig,
    pub secrets: SecretStore,
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```ignore
/// let loaded = ConfigLoader::new("/etc/vigil")
///     .with_environment("production")
///     .load()?;
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    environment: Option<String>,
    skip_env: bool,
    skip_secrets_mode_check: bool,
}

impl ConfigLoader {
    /// Creates a loader rooted at a configuration directory.
    #[must_use]
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            environment: None,
            skip_env: false,
            skip_secrets_mode_check: false,
        }
    }

    /// Selects the environment overlay (`config.<env>.toml`).
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Skips `VIGIL_*` environment variables, for deterministic tests.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Skips the 0600 permission check on the secrets file (tests).
    #[must_use]
    pub fn skip_secrets_mode_check(mut self) -> Self {
        self.skip_secrets_mode_check = true;
        self
    }

    /// The configuration directory this loader reads.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Loads and merges all layers, validates, and loads secrets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable or unparseable files, a
    /// world-readable secrets document, or a tree that fails
    /// validation.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        // Start from defaults as a JSON tree so overlays can deep-merge.
        let mut tree = serde_json::to_value(VigilConfig::default())
            .map_err(|e| ConfigError::Persist(e.to_string()))?;

        let base = self.config_dir.join(CONFIG_FILE);
        if let Some(layer) = self.load_file(&base)? {
            debug!(path = %base.display(), "loaded base config");
            merge_values(&mut tree, layer);
        }

        let environment = self
            .environment
            .clone()
            .or_else(|| std::env::var("VIGIL_ENV").ok());
        if let Some(ref env) = environment {
            let overlay = self.config_dir.join(format!("config.{env}.toml"));
            if let Some(layer) = self.load_file(&overlay)? {
                debug!(path = %overlay.display(), environment = %env, "loaded overlay");
                merge_values(&mut tree, layer);
            }
        }

        let mut config: VigilConfig = serde_json::from_value(tree)
            .map_err(|e| ConfigError::invalid(vec![e.to_string()]))?;

        if !self.skip_env {
            apply_env_vars(&mut config)?;
        }

        config.validate()?;

        let secrets = self.load_secrets()?;
        Ok(LoadedConfig { config, secrets })
    }

    fn load_file(&self, path: &Path) -> Result<Option<Value>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let parsed: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseToml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let json = serde_json::to_value(parsed).map_err(|e| ConfigError::ParseToml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Some(json))
    }

    fn load_secrets(&self) -> Result<SecretStore, ConfigError> {
        let path = self.config_dir.join(SECRETS_FILE);
        if !path.exists() {
            return Ok(SecretStore::default());
        }
        if !self.skip_secrets_mode_check {
            check_secret_mode(&path)?;
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        let parsed: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseToml {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(SecretStore::from_toml(&parsed))
    }
}

#[cfg(unix)]
fn check_secret_mode(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    if metadata.permissions().mode() & 0o077 != 0 {
        return Err(ConfigError::SecretsPermissions {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_secret_mode(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

/// Deep-merges `overlay` into `base`: objects merge recursively,
/// everything else (including arrays) is replaced.
pub(crate) fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_vars(config: &mut VigilConfig) -> Result<(), ConfigError> {
    if let Ok(raw) = std::env::var("VIGIL_DEBUG") {
        config.system.debug = matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
    }
    if let Ok(name) = std::env::var("VIGIL_SYSTEM_NAME") {
        config.system.name = name;
    }
    parse_env_f64!(
        config.system.health_interval_secs,
        "VIGIL_HEALTH_INTERVAL_SECS"
    );
    parse_env_f64!(
        config.system.summary_interval_secs,
        "VIGIL_SUMMARY_INTERVAL_SECS"
    );
    parse_env_f64!(
        config.event.dedupe.window_seconds,
        "VIGIL_DEDUPE_WINDOW_SECONDS"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn defaults_when_directory_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = ConfigLoader::new(dir.path()).skip_env_vars().load().unwrap();
        assert_eq!(loaded.config, VigilConfig::default());
        assert!(loaded.secrets.is_empty());
    }

    #[test]
    fn base_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            CONFIG_FILE,
            r#"
[system]
name = "garage"

[event.dedupe]
window_seconds = 12.5
"#,
        );
        let loaded = ConfigLoader::new(dir.path()).skip_env_vars().load().unwrap();
        assert_eq!(loaded.config.system.name, "garage");
        assert_eq!(loaded.config.event.dedupe.window_seconds, 12.5);
        // Untouched sections keep their defaults.
        assert_eq!(loaded.config.outputs.rate_limit.capacity, 5);
    }

    #[test]
    fn environment_overlay_wins() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), CONFIG_FILE, "[system]\nname = \"base\"\n");
        write(
            dir.path(),
            "config.production.toml",
            "[system]\nname = \"prod\"\n",
        );
        let loaded = ConfigLoader::new(dir.path())
            .with_environment("production")
            .skip_env_vars()
            .load()
            .unwrap();
        assert_eq!(loaded.config.system.name, "prod");
    }

    #[test]
    fn invalid_file_aborts() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), CONFIG_FILE, "not [valid toml");
        assert!(matches!(
            ConfigLoader::new(dir.path()).skip_env_vars().load(),
            Err(ConfigError::ParseToml { .. })
        ));
    }

    #[test]
    fn invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            CONFIG_FILE,
            "[event.dedupe]\nwindow_seconds = -4.0\n",
        );
        assert!(matches!(
            ConfigLoader::new(dir.path()).skip_env_vars().load(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn secrets_resolved_by_reference() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            SECRETS_FILE,
            "[telegram]\nbot_token = \"t0ken\"\n",
        );
        let loaded = ConfigLoader::new(dir.path())
            .skip_env_vars()
            .skip_secrets_mode_check()
            .load()
            .unwrap();
        assert_eq!(
            loaded.secrets.resolve("secrets.telegram.bot_token").unwrap(),
            "t0ken"
        );
        assert!(matches!(
            loaded.secrets.resolve("secrets.telegram.missing"),
            Err(ConfigError::MissingSecret(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_secrets_rejected() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SECRETS_FILE);
        std::fs::write(&path, "[telegram]\nbot_token = \"x\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            ConfigLoader::new(dir.path()).skip_env_vars().load(),
            Err(ConfigError::SecretsPermissions { .. })
        ));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(ConfigLoader::new(dir.path()).skip_env_vars().load().is_ok());
    }

    #[test]
    fn merge_replaces_arrays() {
        let mut base = serde_json::json!({"cameras": [{"id": "a"}], "system": {"name": "x"}});
        merge_values(
            &mut base,
            serde_json::json!({"cameras": [{"id": "b"}, {"id": "c"}]}),
        );
        assert_eq!(base["cameras"].as_array().unwrap().len(), 2);
        assert_eq!(base["system"]["name"], "x");
    }
}
