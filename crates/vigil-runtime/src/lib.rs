//! Vigil runtime: configuration service, orchestrator, and the
//! built-in stages.
//!
//! This crate is the internal implementation layer. Domain modules
//! depend only on `vigil-contracts`; this crate wires them to the bus
//! and drives their lifecycle.
//!
//! # Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Contract Layer                              │
//! │  vigil-types, vigil-contracts (SemVer stable)               │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Runtime Layer (THIS CRATE)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  config/       : ConfigLoader, ConfigService, snapshots     │
//! │  orchestrator/ : registry, lifecycle, health, shutdown      │
//! │  stages/       : dedupe, rate-limit, resilience             │
//! │  modules/      : shim modules (camera sim, relay)           │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Frontend (vigil-cli)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod modules;
pub mod orchestrator;
pub mod stages;

pub use config::{
    default_config_dir, ConfigError, ConfigLoader, ConfigService, SecretStore, SnapshotEntry,
    VigilConfig,
};
pub use orchestrator::{
    FactoryRegistry, ModuleFactory, Orchestrator, OrchestratorError, OrchestratorHandle,
    OrchestratorSettings,
};
