//! Core types for the Vigil surveillance platform.
//!
//! This crate is the leaf of the workspace: identifier types, topic
//! validation, lifecycle/health state enums, and the unified
//! [`ErrorCode`] interface. It has no runtime dependencies and no
//! knowledge of the bus or the orchestrator.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Contract Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  vigil-types     : ModuleId, Topic, states, ErrorCode ◄ HERE│
//! │  vigil-contracts : Envelope, payload schemas, Module trait  │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Runtime Layer                             │
//! │  vigil-bus       : fan-out, queues, interceptors            │
//! │  vigil-runtime   : ConfigService, Orchestrator, stages      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use vigil_types::{ModuleCategory, ModuleId, Topic};
//!
//! let dedupe = ModuleId::builtin(ModuleCategory::Event, "dedupe");
//! assert_eq!(dedupe.fqn(), "event::dedupe");
//!
//! let topic = Topic::parse("process.motion.detected").unwrap();
//! assert_eq!(topic.domain(), "process");
//! ```

mod category;
mod error;
mod id;
mod state;
mod topic;

pub use category::{ModuleCategory, ShutdownPhase};
pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{InterceptorId, ModuleId, SubscriptionId};
pub use state::{HealthState, LifecycleState};
pub use topic::{Topic, TopicError, RESERVED_DOMAINS};
