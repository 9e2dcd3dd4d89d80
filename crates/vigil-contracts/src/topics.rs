//! Reserved topic names.
//!
//! These are the exact-match topics the core publishes and consumes.
//! Domain modules derive their own topics from configuration
//! (`camera.<id>.frame`, `process.motion.detected`, ...) but the core
//! contract topics are fixed.

/// Configuration change requests consumed by the config service.
pub const CONFIG_UPDATE: &str = "config.update";

/// Broadcast after every successful configuration merge.
pub const CONFIG_SNAPSHOT: &str = "config.snapshot";

/// Broadcast after a rollback, scheduled drill, or reverted fragment.
pub const CONFIG_ROLLBACK: &str = "config.rollback";

/// Bus telemetry sampled on a fixed cadence.
pub const STATUS_BUS: &str = "status.bus";

/// Aggregated module health.
pub const STATUS_HEALTH_SUMMARY: &str = "status.health.summary";

/// Per-module health pushed by modules between polls.
pub const STATUS_MODULE_HEALTH: &str = "status.module.health";

/// Staged-shutdown progress frames.
pub const STATUS_SHUTDOWN_PROGRESS: &str = "status.shutdown.progress";

/// Chaos scenario toggles and injections.
pub const STATUS_RESILIENCE_EVENT: &str = "status.resilience.event";

/// Structured diagnostics for rejected config or schema violations.
pub const STATUS_CONTRACT: &str = "status.contract";

/// Per-key drop counters from the rate-limit stage.
pub const STATUS_RATE_LIMIT: &str = "status.rate_limit";

/// Control commands published by dashboards.
pub const DASHBOARD_CONTROL_COMMAND: &str = "dashboard.control.command";
