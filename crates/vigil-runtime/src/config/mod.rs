//! Configuration management.
//!
//! # Layering
//!
//! Configuration is assembled from four sources, later layers
//! overriding earlier ones:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  4. Secrets document (secrets.toml)     │  referenced, never merged
//! ├─────────────────────────────────────────┤
//! │  3. Environment variables (VIGIL_*)     │  runtime override
//! ├─────────────────────────────────────────┤
//! │  2. Environment overlay                 │  config.<env>.toml
//! ├─────────────────────────────────────────┤
//! │  1. Base file (config.toml)             │  deployment settings
//! ├─────────────────────────────────────────┤
//! │  0. Default values (compile-time)       │  fallback
//! └─────────────────────────────────────────┘
//! ```
//!
//! Secrets are held out of the merged tree entirely: fragments carry
//! references of the form `secrets.telegram.bot_token`, resolved on
//! demand from [`SecretStore`]. Snapshot broadcasts therefore never
//! contain secret values.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.vigil/                    # default, override with --config-dir
//! ├── config.toml              # base configuration
//! ├── config.<env>.toml        # environment overlay
//! ├── secrets.toml             # 0600, referenced only
//! └── snapshots.json           # bounded snapshot history
//! ```
//!
//! # Snapshots
//!
//! The validated tree is versioned by [`ConfigService`]. Every accepted
//! merge bumps the version by one and appends to a bounded history
//! (8 entries), persisted to `snapshots.json` in the configuration
//! directory as `{version, fingerprint, payload, timestamp}` entries.

mod error;
mod loader;
mod service;
mod types;

pub use error::ConfigError;
pub use loader::{ConfigLoader, LoadedConfig, SecretStore};
pub use service::{ConfigService, SnapshotEntry};
pub use types::{
    CameraSettings, DedupeSettings, EventSection, Fragment, ModuleFragment, OutputSection,
    RateLimitSettings, ResilienceSettings, SectionSettings, SystemSettings, VigilConfig,
};

/// Default configuration directory (`~/.vigil`).
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".vigil")
}

/// Base configuration file name.
pub const CONFIG_FILE: &str = "config.toml";

/// Secrets document name, expected with 0600 permissions.
pub const SECRETS_FILE: &str = "secrets.toml";

/// Persisted snapshot history file name.
pub const SNAPSHOTS_FILE: &str = "snapshots.json";

/// How many snapshot versions the history retains.
pub const SNAPSHOT_HISTORY: usize = 8;
