//! Lifecycle and health state types.
//!
//! # Lifecycle
//!
//! Module lifecycle transitions only through the orchestrator:
//!
//! ```text
//! Created ──configure──▶ Configured ──start──▶ Running
//!                             ▲                   │
//!                             └── reconfigure ────┤
//!                                                 ▼
//!                                              Stopped
//! ```
//!
//! # Health
//!
//! [`HealthState`] is ordered worst-first so the aggregate state of a
//! set of modules is simply the minimum:
//! `Stopped < Error < Degraded < Starting < Healthy`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed module.
///
/// # State Categories
///
/// | Category | States | Receives Traffic |
/// |----------|--------|------------------|
/// | Setup | `Created`, `Configured` | No |
/// | Active | `Running` | Yes |
/// | Terminal | `Stopped`, `Failed` | No |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Instantiated by the factory, not yet configured.
    #[default]
    Created,

    /// Configuration applied; ready to start.
    Configured,

    /// Started; subscriptions are live.
    Running,

    /// Stopped cleanly. Terminal.
    Stopped,

    /// A lifecycle call failed or missed its deadline. Terminal.
    Failed,
}

impl LifecycleState {
    /// Returns `true` if the module holds live subscriptions.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` if no further lifecycle calls are permitted.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Returns `true` if `configure` is a legal next call.
    ///
    /// Configure is idempotent: calling it on an already configured or
    /// running module is allowed.
    #[must_use]
    pub fn can_configure(&self) -> bool {
        matches!(self, Self::Created | Self::Configured | Self::Running)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Health classification reported by modules and aggregated into the
/// platform summary.
///
/// The derived `Ord` places the worst state first, so
/// `iter().min()` yields the overall state of a set of reports.
///
/// # Example
///
/// ```
/// use vigil_types::HealthState;
///
/// let states = [HealthState::Healthy, HealthState::Degraded];
/// assert_eq!(states.iter().min(), Some(&HealthState::Degraded));
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Module is stopped.
    Stopped,
    /// Module failed and is not processing.
    Error,
    /// Module is processing but impaired.
    Degraded,
    /// Module is starting up.
    #[default]
    Starting,
    /// Module is fully operational.
    Healthy,
}

impl HealthState {
    /// Returns the worse of two states.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.min(other)
    }

    /// Returns `true` when the module is processing traffic at all.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Degraded => "degraded",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
        };
        write!(f, "{name}")
    }
}
