//! Orchestrator errors.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`OrchestratorError::FactoryMissing`] | `ORCH_FACTORY_MISSING` | No |
//! | [`OrchestratorError::ModuleCreate`] | `ORCH_MODULE_CREATE` | No |
//! | [`OrchestratorError::ModuleConfigureFailed`] | `ORCH_MODULE_CONFIGURE_FAILED` | Yes |
//! | [`OrchestratorError::ModuleStartFailed`] | `ORCH_MODULE_START_FAILED` | No |
//! | [`OrchestratorError::LifecycleDeadline`] | `ORCH_LIFECYCLE_DEADLINE` | No |
//! | [`OrchestratorError::Config`] | `CONFIG_*` (transparent) | varies |

use thiserror::Error;
use vigil_types::ErrorCode;

use crate::config::ConfigError;

/// Failure during boot or a lifecycle transition.
///
/// Lifecycle failures at runtime are handled inside the orchestrator
/// loop (quarantine, revert, restart); this error type surfaces only
/// from `boot`, where an unknown factory or invalid configuration is
/// fatal.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A fragment names a `type` with no registered factory.
    #[error("no factory registered for module type '{0}'")]
    FactoryMissing(String),

    /// A factory failed to instantiate its module.
    #[error("failed to create module '{id}': {message}")]
    ModuleCreate { id: String, message: String },

    /// `configure` failed; the module was reverted to its prior
    /// fragment.
    #[error("module '{id}' rejected configuration: {message}")]
    ModuleConfigureFailed { id: String, message: String },

    /// `start` failed; the module is marked errored.
    #[error("module '{id}' failed to start: {message}")]
    ModuleStartFailed { id: String, message: String },

    /// A lifecycle call missed its deadline.
    #[error("module '{id}' missed the {phase} deadline")]
    LifecycleDeadline { id: String, phase: &'static str },

    /// The bus rejected an orchestrator subscription or publication
    /// during boot.
    #[error("bus failure: {0}")]
    Bus(String),

    /// Configuration subsystem failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ErrorCode for OrchestratorError {
    fn code(&self) -> &'static str {
        match self {
            Self::FactoryMissing(_) => "ORCH_FACTORY_MISSING",
            Self::ModuleCreate { .. } => "ORCH_MODULE_CREATE",
            Self::ModuleConfigureFailed { .. } => "ORCH_MODULE_CONFIGURE_FAILED",
            Self::ModuleStartFailed { .. } => "ORCH_MODULE_START_FAILED",
            Self::LifecycleDeadline { .. } => "ORCH_LIFECYCLE_DEADLINE",
            Self::Bus(_) => "ORCH_BUS",
            Self::Config(inner) => inner.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::ModuleConfigureFailed { .. } => true,
            Self::Config(inner) => inner.is_recoverable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::assert_error_codes;

    #[test]
    fn orchestrator_error_codes_valid() {
        assert_error_codes(
            &[
                OrchestratorError::FactoryMissing("x".into()),
                OrchestratorError::ModuleCreate {
                    id: "m".into(),
                    message: "y".into(),
                },
                OrchestratorError::ModuleConfigureFailed {
                    id: "m".into(),
                    message: "y".into(),
                },
                OrchestratorError::ModuleStartFailed {
                    id: "m".into(),
                    message: "y".into(),
                },
                OrchestratorError::LifecycleDeadline {
                    id: "m".into(),
                    phase: "stop",
                },
            ],
            "ORCH_",
        );
    }

    #[test]
    fn config_errors_pass_through() {
        let err = OrchestratorError::Config(ConfigError::UnknownPath("a.b".into()));
        assert_eq!(err.code(), "CONFIG_UNKNOWN_PATH");
        assert!(err.is_recoverable());
    }
}
