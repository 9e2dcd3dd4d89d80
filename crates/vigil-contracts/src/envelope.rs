//! Message envelope.
//!
//! Every publication is wrapped in an [`Envelope`] before it reaches
//! the interceptor chain. Envelopes are immutable after publication:
//! the bus hands subscribers shared references and nothing downstream
//! may alter sequence, timestamp, or payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Payload;

/// Schema version stamped on envelopes produced by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Immutable wrapper around a published payload.
///
/// # Ordering
///
/// `sequence` is strictly increasing per bus instance and provides a
/// global observation order for logging. It is not a delivery
/// guarantee; only per-subscription FIFO is guaranteed.
///
/// # Example
///
/// ```
/// use vigil_contracts::{ControlCommand, Envelope, Payload};
/// use std::collections::BTreeMap;
///
/// let payload = Payload::Control(ControlCommand {
///     command: "camera.pause".into(),
///     target: Some("input::cam-front".into()),
///     arguments: BTreeMap::new(),
/// });
/// let envelope = Envelope::new(7, payload);
/// assert_eq!(envelope.sequence, 7);
/// assert!(envelope.correlation_id.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Strictly increasing, scoped to the publishing bus.
    pub sequence: u64,
    /// Publication time (RFC3339 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Propagated across related messages (frame → detection → artifact).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Payload schema version at publication time.
    pub schema_version: u32,
    pub payload: Payload,
}

impl Envelope {
    /// Creates an envelope stamped with the current time and the
    /// build's schema version.
    #[must_use]
    pub fn new(sequence: u64, payload: Payload) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            correlation_id: None,
            schema_version: SCHEMA_VERSION,
            payload,
        }
    }

    /// Creates an envelope with an explicit timestamp.
    ///
    /// Replay tooling and tests use this; the live bus stamps
    /// publication time itself.
    #[must_use]
    pub fn at(sequence: u64, timestamp: DateTime<Utc>, payload: Payload) -> Self {
        Self {
            sequence,
            timestamp,
            correlation_id: None,
            schema_version: SCHEMA_VERSION,
            payload,
        }
    }

    /// Attaches a correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Envelope age relative to `now`, in milliseconds. Zero when the
    /// envelope timestamp is in the future.
    #[must_use]
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.timestamp).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DetectionEvent, DetectionKind};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn payload() -> Payload {
        Payload::Detection(DetectionEvent {
            camera_id: "cam-a".into(),
            timestamp: Utc::now(),
            kind: DetectionKind::Motion,
            label: "motion".into(),
            confidence: 1.0,
            bbox: None,
            attributes: BTreeMap::new(),
        })
    }

    #[test]
    fn new_stamps_schema_version() {
        let env = Envelope::new(1, payload());
        assert_eq!(env.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn correlation_propagates() {
        let id = Uuid::new_v4();
        let env = Envelope::new(1, payload()).with_correlation(id);
        assert_eq!(env.correlation_id, Some(id));
    }

    #[test]
    fn age_is_clamped_to_zero() {
        let future = Utc::now() + chrono::Duration::seconds(60);
        let env = Envelope::at(1, future, payload());
        assert_eq!(env.age_ms(Utc::now()), 0);
    }

    #[test]
    fn serde_round_trip() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let env = Envelope::at(42, ts, payload());
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
