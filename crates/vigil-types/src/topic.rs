//! Topic names and validation.
//!
//! A topic is a dot-delimited routing key of the shape
//! `<domain>.<entity>[.<qualifier>...]`. Subscribers name exact topics;
//! there are no wildcards. The first segment must be one of the
//! reserved domains.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ErrorCode;

/// Domains permitted as the first topic segment.
pub const RESERVED_DOMAINS: [&str; 9] = [
    "camera",
    "process",
    "event",
    "notify",
    "storage",
    "analytics",
    "dashboard",
    "status",
    "config",
];

/// A validated topic name.
///
/// # Example
///
/// ```
/// use vigil_types::Topic;
///
/// let topic = Topic::parse("camera.front.frame").unwrap();
/// assert_eq!(topic.domain(), "camera");
/// assert_eq!(topic.as_str(), "camera.front.frame");
///
/// assert!(Topic::parse("frames").is_err());
/// assert!(Topic::parse("video.front.frame").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Parses and validates a topic name.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError`] if the name has fewer than two segments,
    /// contains an empty segment, holds characters outside
    /// `[a-z0-9_-]`, or starts with an unreserved domain.
    pub fn parse(name: impl Into<String>) -> Result<Self, TopicError> {
        let name = name.into();
        let segments: Vec<&str> = name.split('.').collect();
        if segments.len() < 2 {
            return Err(TopicError::TooFewSegments(name));
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(TopicError::EmptySegment(name.clone()));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            {
                return Err(TopicError::InvalidSegment {
                    topic: name.clone(),
                    segment: (*segment).to_string(),
                });
            }
        }
        if !RESERVED_DOMAINS.contains(&segments[0]) {
            return Err(TopicError::UnknownDomain {
                topic: name.clone(),
                domain: segments[0].to_string(),
            });
        }
        Ok(Self(name))
    }

    /// Returns the domain (first segment).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }

    /// Returns the full topic string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Topic validation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    /// Topics need at least `<domain>.<entity>`.
    #[error("topic '{0}' needs at least two segments")]
    TooFewSegments(String),

    /// A segment between dots was empty.
    #[error("topic '{0}' contains an empty segment")]
    EmptySegment(String),

    /// A segment held characters outside `[a-z0-9_-]`.
    #[error("topic '{topic}' has invalid segment '{segment}'")]
    InvalidSegment { topic: String, segment: String },

    /// The first segment is not a reserved domain.
    #[error("topic '{topic}' uses unreserved domain '{domain}'")]
    UnknownDomain { topic: String, domain: String },
}

impl ErrorCode for TopicError {
    fn code(&self) -> &'static str {
        match self {
            Self::TooFewSegments(_) => "TOPIC_TOO_FEW_SEGMENTS",
            Self::EmptySegment(_) => "TOPIC_EMPTY_SEGMENT",
            Self::InvalidSegment { .. } => "TOPIC_INVALID_SEGMENT",
            Self::UnknownDomain { .. } => "TOPIC_UNKNOWN_DOMAIN",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}
