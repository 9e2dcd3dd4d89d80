//! Bus errors.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`BusError::Topic`] | `BUS_TOPIC` | No |
//! | [`BusError::Contract`] | `BUS_CONTRACT` | No |
//! | [`BusError::PublishTimeout`] | `BUS_PUBLISH_TIMEOUT` | Yes |
//! | [`BusError::PublishCancelled`] | `BUS_PUBLISH_CANCELLED` | No |
//! | [`BusError::UnknownSubscription`] | `BUS_UNKNOWN_SUBSCRIPTION` | No |
//! | [`BusError::CapacityOutOfRange`] | `BUS_CAPACITY_OUT_OF_RANGE` | No |
//! | [`BusError::Stopped`] | `BUS_STOPPED` | No |

use thiserror::Error;
use vigil_contracts::ContractError;
use vigil_types::{ErrorCode, SubscriptionId, TopicError};

/// Failure on a bus operation.
///
/// Enqueue failures are local to one subscription: a publish that times
/// out against one block-policy queue still reaches every other
/// subscriber before the error is returned.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Topic failed validation.
    #[error(transparent)]
    Topic(#[from] TopicError),

    /// Payload failed semantic validation before publication.
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// A block-policy enqueue missed the publish deadline.
    #[error("publish to '{topic}' timed out against subscriber '{subscriber}'")]
    PublishTimeout { topic: String, subscriber: String },

    /// The bus shut down while a publish waited for queue space.
    #[error("publish cancelled by bus shutdown")]
    PublishCancelled,

    /// No subscription with this id exists (already unsubscribed?).
    #[error("unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// Requested capacity is zero or above the bus maximum.
    #[error("capacity {0} out of range")]
    CapacityOutOfRange(usize),

    /// Operation on a bus that has been shut down.
    #[error("bus is stopped")]
    Stopped,
}

impl ErrorCode for BusError {
    fn code(&self) -> &'static str {
        match self {
            Self::Topic(_) => "BUS_TOPIC",
            Self::Contract(_) => "BUS_CONTRACT",
            Self::PublishTimeout { .. } => "BUS_PUBLISH_TIMEOUT",
            Self::PublishCancelled => "BUS_PUBLISH_CANCELLED",
            Self::UnknownSubscription(_) => "BUS_UNKNOWN_SUBSCRIPTION",
            Self::CapacityOutOfRange(_) => "BUS_CAPACITY_OUT_OF_RANGE",
            Self::Stopped => "BUS_STOPPED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::PublishTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::assert_error_codes;

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(
            &[
                BusError::Topic(TopicError::TooFewSegments("x".into())),
                BusError::Contract(ContractError::InvalidField("x".into())),
                BusError::PublishTimeout {
                    topic: "a.b".into(),
                    subscriber: "s".into(),
                },
                BusError::PublishCancelled,
                BusError::UnknownSubscription(SubscriptionId::new()),
                BusError::CapacityOutOfRange(0),
                BusError::Stopped,
            ],
            "BUS_",
        );
    }

    #[test]
    fn timeout_is_recoverable() {
        let err = BusError::PublishTimeout {
            topic: "a.b".into(),
            subscriber: "s".into(),
        };
        assert!(err.is_recoverable());
        assert!(!BusError::Stopped.is_recoverable());
    }
}
