//! Interceptor pipeline.
//!
//! Interceptors see every publication in installation order, before
//! fan-out. They may delay (by suspending), mutate, drop, or pass an
//! envelope through. An interceptor error is logged and treated as
//! pass-through; it never fails the publish.

use async_trait::async_trait;

use vigil_contracts::{Envelope, ModuleError};
use vigil_types::InterceptorId;

/// Decision returned by an interceptor for one publication.
#[derive(Debug)]
pub enum InterceptOutcome {
    /// Continue with this (possibly mutated) envelope.
    Continue(Envelope),
    /// Discard the publication; counted on the bus.
    Drop,
}

/// A stage in the publication pipeline.
///
/// # Contract
///
/// - Runs on the publisher's task: a slow interceptor delays `publish`.
/// - Must not publish back into the bus from inside `intercept`
///   (re-entrant publication would run the chain again).
/// - Errors are treated as pass-through with the original envelope.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str {
        "interceptor"
    }

    /// Inspects one publication.
    ///
    /// # Errors
    ///
    /// An error is logged by the bus and the original envelope
    /// continues unchanged.
    async fn intercept(
        &self,
        topic: &str,
        envelope: Envelope,
    ) -> Result<InterceptOutcome, ModuleError>;
}

/// Handle returned by `Bus::intercept`, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptorHandle {
    pub(crate) id: InterceptorId,
}

impl InterceptorHandle {
    /// The interceptor's identity on the bus.
    #[must_use]
    pub fn id(&self) -> InterceptorId {
        self.id
    }
}
