//! Built-in pipeline stages.
//!
//! A stage is a small module that subscribes to one topic and
//! publishes to a derived one under a fixed policy. Stages ship with
//! the core because downstream fan-out is only correct with them in
//! place: dedupe bounds duplicate detections, rate-limit bounds
//! notification volume, resilience drives the chaos interceptor.

mod dedupe;
mod rate_limit;
mod resilience;

pub use dedupe::DedupeStage;
pub use rate_limit::RateLimitStage;
pub use resilience::ResilienceStage;
