//! Module categories and shutdown phases.
//!
//! Every module belongs to exactly one [`ModuleCategory`]; the
//! orchestrator derives startup order, configuration section, and the
//! staged-shutdown phase from it.
//!
//! # Shutdown Order
//!
//! Shutdown runs in reverse data-flow order so no stage receives input
//! from an already-stopped producer while it still matters:
//!
//! ```text
//! input → process → event → output → storage → dashboard → core
//! ```

use serde::{Deserialize, Serialize};

/// Functional category of a module.
///
/// Categories also name the top-level configuration sections that carry
/// the per-module fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCategory {
    /// Camera and other frame producers.
    Input,
    /// Detectors that turn frames into detection events.
    Process,
    /// Artifact builders and event-level stages (dedupe, snapshot, gif).
    Event,
    /// Notifiers and other egress (rate limiter, telegram, webhook).
    Output,
    /// Retention, S3 replication, and other persistence.
    Storage,
    /// Event logging and metrics aggregation.
    Analytics,
    /// Control surfaces: websocket gateway, command handler.
    Dashboard,
    /// Telemetry producers such as the resilience tester.
    Status,
    /// Bus, config service, and other platform internals.
    Core,
}

impl ModuleCategory {
    /// Returns the shutdown phase this category stops in.
    ///
    /// Analytics stops with storage, and status modules stop with the
    /// core: both are passive consumers with no downstream dependents.
    #[must_use]
    pub fn shutdown_phase(&self) -> ShutdownPhase {
        match self {
            Self::Input => ShutdownPhase::Input,
            Self::Process => ShutdownPhase::Process,
            Self::Event => ShutdownPhase::Event,
            Self::Output => ShutdownPhase::Output,
            Self::Storage | Self::Analytics => ShutdownPhase::Storage,
            Self::Dashboard => ShutdownPhase::Dashboard,
            Self::Status | Self::Core => ShutdownPhase::Core,
        }
    }

    /// Returns the configuration section name for this category.
    #[must_use]
    pub fn section(&self) -> &'static str {
        match self {
            Self::Input => "cameras",
            Self::Process => "process",
            Self::Event => "event",
            Self::Output => "outputs",
            Self::Storage => "storage",
            Self::Analytics => "analytics",
            Self::Dashboard => "dashboards",
            Self::Status => "status",
            Self::Core => "system",
        }
    }
}

impl std::fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::Process => "process",
            Self::Event => "event",
            Self::Output => "output",
            Self::Storage => "storage",
            Self::Analytics => "analytics",
            Self::Dashboard => "dashboard",
            Self::Status => "status",
            Self::Core => "core",
        };
        write!(f, "{name}")
    }
}

/// Staged-shutdown phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    Input,
    Process,
    Event,
    Output,
    Storage,
    Dashboard,
    Core,
}

impl ShutdownPhase {
    /// All phases in the order shutdown visits them.
    pub const ALL: [ShutdownPhase; 7] = [
        Self::Input,
        Self::Process,
        Self::Event,
        Self::Output,
        Self::Storage,
        Self::Dashboard,
        Self::Core,
    ];
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::Process => "process",
            Self::Event => "event",
            Self::Output => "output",
            Self::Storage => "storage",
            Self::Dashboard => "dashboard",
            Self::Core => "core",
        };
        write!(f, "{name}")
    }
}
