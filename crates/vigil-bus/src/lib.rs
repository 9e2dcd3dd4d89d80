//! In-process publish/subscribe bus for the Vigil platform.
//!
//! Topic-keyed fan-out with per-subscription bounded queues. Producers
//! and consumers never see each other; the bus owns every queue, every
//! counter, and one consumer task per subscription.
//!
//! # Delivery Model
//!
//! ```text
//!             ┌── interceptor chain ──┐
//! publish ──▶ │ chaos, tracing, ...   │ ──┬─▶ [queue] ─▶ consumer ─▶ handler
//!             └───────────────────────┘   ├─▶ [queue] ─▶ consumer ─▶ handler
//!                                         └─▶ [queue] ─▶ consumer ─▶ handler
//! ```
//!
//! - `publish` returns once enqueuing is complete; handler invocation
//!   is asynchronous.
//! - Within one subscription, envelopes arrive in publication order.
//!   There is no cross-subscription ordering.
//! - A full queue is resolved by the subscription's
//!   [`OverflowPolicy`]: block (bounded by the publish deadline),
//!   drop-newest, or drop-oldest.
//! - Handler failures and timeouts are counted, never propagated; three
//!   in a row mark the subscription degraded in [`BusStatus`]
//!   telemetry.
//!
//! # Example
//!
//! ```no_run
//! use vigil_bus::{Bus, BusSettings};
//! use vigil_contracts::{handler, Payload, SubscribeOptions};
//!
//! # async fn demo() -> Result<(), vigil_bus::BusError> {
//! let bus = Bus::new(BusSettings::default());
//! bus.start();
//!
//! let sub = bus.subscribe(
//!     "demo",
//!     "status.bus",
//!     SubscribeOptions::default(),
//!     handler(|envelope| async move {
//!         tracing::info!(sequence = envelope.sequence, "observed");
//!         Ok(())
//!     }),
//! )?;
//!
//! bus.unsubscribe(&sub)?;
//! bus.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod bus;
mod chaos;
mod error;
mod interceptor;
mod subscription;
mod telemetry;

pub use bus::{Bus, BusSettings, SubscriptionHandle};
pub use chaos::{ChaosInterceptor, ChaosState, Scenario};
pub use error::BusError;
pub use interceptor::{InterceptOutcome, Interceptor, InterceptorHandle};

// Contract types bus users need constantly.
pub use vigil_contracts::{
    handler, BusStatus, Envelope, EventHandler, OverflowPolicy, SubscribeOptions,
    SubscriptionStatus,
};
pub use vigil_types::{InterceptorId, SubscriptionId};
