//! Contract and module errors.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`ContractError::SchemaViolation`] | `CONTRACT_SCHEMA_VIOLATION` | No |
//! | [`ContractError::InvalidField`] | `CONTRACT_INVALID_FIELD` | No |
//! | [`ContractError::Topic`] | `CONTRACT_TOPIC` | No |
//! | [`ModuleError::ConfigInvalid`] | `MODULE_CONFIG_INVALID` | Yes |
//! | [`ModuleError::StartFailed`] | `MODULE_START_FAILED` | No |
//! | [`ModuleError::StopFailed`] | `MODULE_STOP_FAILED` | No |
//! | [`ModuleError::NotRunning`] | `MODULE_NOT_RUNNING` | No |
//! | [`ModuleError::Transport`] | `MODULE_TRANSPORT` | Yes |
//! | [`ModuleError::Handler`] | `MODULE_HANDLER` | Yes |

use thiserror::Error;
use vigil_types::{ErrorCode, TopicError};

/// Violation of the payload or topic contract.
///
/// Carried as structured diagnostics on `status.contract`; never
/// propagated to a publisher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    /// A value did not deserialize into any known payload kind.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A known payload kind failed semantic validation.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// A topic name failed validation.
    #[error(transparent)]
    Topic(#[from] TopicError),
}

impl ErrorCode for ContractError {
    fn code(&self) -> &'static str {
        match self {
            Self::SchemaViolation(_) => "CONTRACT_SCHEMA_VIOLATION",
            Self::InvalidField(_) => "CONTRACT_INVALID_FIELD",
            Self::Topic(_) => "CONTRACT_TOPIC",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Failure inside a module lifecycle call or handler.
///
/// Lifecycle errors propagate to the orchestrator, which decides
/// between quarantine and rollback. Handler errors are caught by the
/// bus consumer and only counted.
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// The provided fragment failed module-side validation. The
    /// orchestrator reverts to the prior fragment.
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    /// `start` failed; the module is marked errored and skipped.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// `stop` failed; reported, the module is abandoned.
    #[error("stop failed: {0}")]
    StopFailed(String),

    /// A lifecycle call arrived in a state that cannot accept it.
    #[error("module is not running")]
    NotRunning,

    /// Publish or subscribe through the module link failed.
    #[error("transport: {0}")]
    Transport(String),

    /// An event handler reported a failure for one delivery.
    #[error("handler: {0}")]
    Handler(String),
}

impl ErrorCode for ModuleError {
    fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "MODULE_CONFIG_INVALID",
            Self::StartFailed(_) => "MODULE_START_FAILED",
            Self::StopFailed(_) => "MODULE_STOP_FAILED",
            Self::NotRunning => "MODULE_NOT_RUNNING",
            Self::Transport(_) => "MODULE_TRANSPORT",
            Self::Handler(_) => "MODULE_HANDLER",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid(_) | Self::Transport(_) | Self::Handler(_)
        )
    }
}
