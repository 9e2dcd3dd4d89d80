//! Contract surface for the Vigil platform.
//!
//! This crate defines everything a module needs to participate in the
//! system without depending on the bus or orchestrator internals:
//!
//! - [`Envelope`] — the immutable wrapper around every published payload
//! - [`Payload`] — the canonical payload kinds with validators and a
//!   tolerant parser
//! - [`topics`] — the reserved topic names
//! - [`Capability`] — the static descriptor every module advertises
//! - [`Module`] — the lifecycle trait driven by the orchestrator
//!
//! # Message Flow
//!
//! ```text
//! ┌──────────┐ camera.<id>.frame ┌───────────┐ process.*  ┌──────────┐
//! │  Input   │ ────────────────▶ │ Processor │ ─────────▶ │  Event   │
//! │  module  │                   │  module   │            │  stages  │
//! └──────────┘                   └───────────┘            └──────────┘
//!                                                              │ event.*
//!                        ┌───────────┐      ┌──────────┐       ▼
//!                        │ Dashboard │ ◀─── │  Status  │ ◀─ outputs,
//!                        │  modules  │status│  frames  │    storage
//!                        └───────────┘   .* └──────────┘
//! ```
//!
//! # Versioning
//!
//! Every payload kind carries a schema version. Parsers tolerate
//! unknown fields when the observed version is newer than the known
//! one; breaking changes require a new topic name
//! (e.g. `process.detected.v2`).

mod capability;
mod envelope;
mod error;
mod module;
mod payload;
pub mod topics;

pub use capability::Capability;
pub use envelope::{Envelope, SCHEMA_VERSION};
pub use error::{ContractError, ModuleError};
pub use module::{
    handler, BoxedModule, EnvelopeFilter, EventHandler, HandlerFuture, Module, ModuleLink,
    OverflowPolicy, SubscribeOptions,
};
pub use payload::{
    AlertNotification, BusStatus, ConfigRejected, ConfigRollbackPayload, ConfigSnapshotPayload,
    ConfigUpdate, ControlCommand, DetectionEvent, DetectionKind, Frame, HealthReport,
    HealthSummary, MediaArtifact, MediaKind, Payload, RateLimitStatus, ResilienceAction,
    ResilienceEvent, ShutdownProgress, SubscriptionStatus, Watermark,
};

// Re-exports from vigil_types for module authors.
pub use vigil_types::{
    ErrorCode, HealthState, LifecycleState, ModuleCategory, ModuleId, ShutdownPhase, Topic,
};
