//! Configuration errors.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`ConfigError::ReadFile`] | `CONFIG_READ_FILE` | No |
//! | [`ConfigError::ParseToml`] | `CONFIG_PARSE_TOML` | No |
//! | [`ConfigError::Invalid`] | `CONFIG_INVALID` | Yes |
//! | [`ConfigError::UnknownPath`] | `CONFIG_UNKNOWN_PATH` | Yes |
//! | [`ConfigError::UnknownVersion`] | `CONFIG_UNKNOWN_VERSION` | No |
//! | [`ConfigError::SecretsPermissions`] | `CONFIG_SECRETS_PERMISSIONS` | No |
//! | [`ConfigError::MissingSecret`] | `CONFIG_MISSING_SECRET` | No |
//! | [`ConfigError::Persist`] | `CONFIG_PERSIST` | Yes |
//! | [`ConfigError::InvalidEnvVar`] | `CONFIG_INVALID_ENV_VAR` | No |

use std::path::PathBuf;
use thiserror::Error;
use vigil_types::ErrorCode;

/// Failure while loading, validating, or persisting configuration.
///
/// `Invalid` and `UnknownPath` are the reject path of `apply_changes`:
/// the current snapshot stays in force and the diagnostics surface on
/// `status.contract`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file did not parse as TOML.
    #[error("failed to parse {path}: {message}")]
    ParseToml { path: PathBuf, message: String },

    /// The merged tree failed validation; diagnostics name each
    /// offending field.
    #[error("configuration invalid: {}", diagnostics.join("; "))]
    Invalid { diagnostics: Vec<String> },

    /// A dotted update path does not exist in the tree.
    #[error("unknown configuration path '{0}'")]
    UnknownPath(String),

    /// Rollback target is not in the retained history.
    #[error("no snapshot with version {0} in history")]
    UnknownVersion(u64),

    /// The secrets document is readable by group or others.
    #[error("secrets file {path} must have 0600 permissions")]
    SecretsPermissions { path: PathBuf },

    /// A fragment references a secret the store does not hold.
    #[error("missing secret '{0}'")]
    MissingSecret(String),

    /// Snapshot history could not be persisted.
    #[error("failed to persist snapshots: {0}")]
    Persist(String),

    /// An environment variable override did not parse.
    #[error("invalid value for {name}: {message}")]
    InvalidEnvVar { name: String, message: String },
}

impl ConfigError {
    /// Builds the invalid-tree error from collected diagnostics.
    #[must_use]
    pub fn invalid(diagnostics: Vec<String>) -> Self {
        Self::Invalid { diagnostics }
    }

    /// Flattens this error into the diagnostic strings carried on
    /// `status.contract`.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<String> {
        match self {
            Self::Invalid { diagnostics } => diagnostics.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "CONFIG_READ_FILE",
            Self::ParseToml { .. } => "CONFIG_PARSE_TOML",
            Self::Invalid { .. } => "CONFIG_INVALID",
            Self::UnknownPath(_) => "CONFIG_UNKNOWN_PATH",
            Self::UnknownVersion(_) => "CONFIG_UNKNOWN_VERSION",
            Self::SecretsPermissions { .. } => "CONFIG_SECRETS_PERMISSIONS",
            Self::MissingSecret(_) => "CONFIG_MISSING_SECRET",
            Self::Persist(_) => "CONFIG_PERSIST",
            Self::InvalidEnvVar { .. } => "CONFIG_INVALID_ENV_VAR",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Invalid { .. } | Self::UnknownPath(_) | Self::Persist(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::assert_error_codes;

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(
            &[
                ConfigError::ParseToml {
                    path: "x".into(),
                    message: "y".into(),
                },
                ConfigError::invalid(vec!["bad".into()]),
                ConfigError::UnknownPath("a.b".into()),
                ConfigError::UnknownVersion(3),
                ConfigError::SecretsPermissions { path: "x".into() },
                ConfigError::MissingSecret("s".into()),
                ConfigError::Persist("io".into()),
                ConfigError::InvalidEnvVar {
                    name: "VIGIL_X".into(),
                    message: "nope".into(),
                },
            ],
            "CONFIG_",
        );
    }

    #[test]
    fn diagnostics_flatten() {
        let err = ConfigError::invalid(vec!["a".into(), "b".into()]);
        assert_eq!(err.diagnostics(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ConfigError::UnknownPath("p".into()).diagnostics().len(), 1);
    }
}
