//! Error types for the hub
//!
//! - [`ValidationError`]: malformed topic or pattern, raised at the call site
//! - [`ListenerError`]: failure reported by application callback code
//! - [`AggregateError`]: two or more listener failures from one emission
//! - [`HubError`]: everything an emission or registration can return

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Malformed topic or pattern
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Topic string is empty
    #[error("topic must not be empty")]
    EmptyTopic,

    /// Two delimiters in a row, or a leading/trailing delimiter
    #[error("topic '{topic}' contains an empty segment")]
    EmptySegment {
        /// The rejected topic
        topic: String,
    },

    /// Segment contains characters outside `[A-Za-z0-9_:-]`
    #[error("topic '{topic}' contains invalid segment '{segment}'")]
    InvalidSegment {
        /// The rejected topic
        topic: String,
        /// The offending segment
        segment: String,
    },

    /// Wildcard mixed with other characters, e.g. `a*` or `***`
    #[error("topic '{topic}' misuses a wildcard in segment '{segment}'")]
    InvalidWildcard {
        /// The rejected topic
        topic: String,
        /// The offending segment
        segment: String,
    },

    /// The pattern could not be compiled into a matcher
    #[error("pattern '{pattern}' could not be compiled: {reason}")]
    Uncompilable {
        /// The rejected pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

impl ValidationError {
    /// Topic or pattern the error refers to, if any
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::EmptyTopic => None,
            Self::EmptySegment { topic }
            | Self::InvalidSegment { topic, .. }
            | Self::InvalidWildcard { topic, .. } => Some(topic),
            Self::Uncompilable { pattern, .. } => Some(pattern),
        }
    }
}

/// Failure reported by a listener or filter
///
/// Carries a message and, optionally, the underlying error. Cloning is cheap;
/// the source is shared.
#[derive(Clone)]
pub struct ListenerError {
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ListenerError {
    /// Create an error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an existing error, keeping it as the source
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// Error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Convert the error into a JSON value (its message)
    pub fn to_value(&self) -> Value {
        Value::String(self.message.clone())
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerError")
            .field("message", &self.message)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for ListenerError {
    fn from(error: anyhow::Error) -> Self {
        let message = error.to_string();
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = error.into();
        Self {
            message,
            source: Some(Arc::from(boxed)),
        }
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<HubError> for ListenerError {
    fn from(error: HubError) -> Self {
        match error {
            HubError::Listener(e) => e,
            other => Self::from_error(other),
        }
    }
}

/// Two or more listener failures from a single emission
#[derive(Debug, Clone, Error)]
#[error("{}", format_errors(.errors))]
pub struct AggregateError {
    errors: Vec<ListenerError>,
}

impl AggregateError {
    /// Combine errors, kept in invocation order
    pub fn new(errors: Vec<ListenerError>) -> Self {
        Self { errors }
    }

    /// Error name, stable across versions
    pub fn name(&self) -> &'static str {
        "AggregateError"
    }

    /// Constituent errors in invocation order
    pub fn errors(&self) -> &[ListenerError] {
        &self.errors
    }

    /// Number of constituent errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether there are no constituent errors
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

fn format_errors(errors: &[ListenerError]) -> String {
    let mut message = String::from("Multiple listeners failed:");
    for error in errors {
        message.push_str("\n- ");
        message.push_str(error.message());
    }
    message
}

/// Errors returned by hub operations
#[derive(Debug, Clone, Error)]
pub enum HubError {
    /// Malformed topic or pattern
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A single listener failed
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Several listeners failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Waiting on a deferred result took too long
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Emissions nested deeper than the configured limit
    #[error("dispatch depth limit of {0} exceeded")]
    DepthExceeded(usize),
}

impl HubError {
    /// Create a listener error with a message
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener(ListenerError::new(message))
    }

    /// Whether this error came from callback code
    pub fn is_listener_failure(&self) -> bool {
        matches!(self, Self::Listener(_) | Self::Aggregate(_))
    }

    /// Listener errors carried by this error, in invocation order
    pub fn listener_errors(&self) -> Vec<&ListenerError> {
        match self {
            Self::Listener(e) => vec![e],
            Self::Aggregate(agg) => agg.errors().iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Listener(_) => "listener",
            Self::Aggregate(_) => "aggregate",
            Self::Timeout(_) => "timeout",
            Self::DepthExceeded(_) => "depth_exceeded",
        }
    }
}

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Result of an emission: the merged value, if any
pub type EmitResult = HubResult<Option<Value>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::InvalidSegment {
            topic: "a.b c".into(),
            segment: "b c".into(),
        };
        assert_eq!(
            err.to_string(),
            "topic 'a.b c' contains invalid segment 'b c'"
        );
        assert_eq!(err.topic(), Some("a.b c"));
        assert_eq!(ValidationError::EmptyTopic.topic(), None);
    }

    #[test]
    fn test_listener_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = ListenerError::from_error(io);
        assert_eq!(err.message(), "disk gone");
        assert!(std::error::Error::source(&err).is_some());

        let plain = ListenerError::new("boom");
        assert!(std::error::Error::source(&plain).is_none());
    }

    #[test]
    fn test_listener_error_from_anyhow() {
        let err: ListenerError = anyhow::anyhow!("bad input").into();
        assert_eq!(err.to_string(), "bad input");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_aggregate_message() {
        let agg = AggregateError::new(vec![
            ListenerError::new("first"),
            ListenerError::new("second"),
        ]);
        assert_eq!(agg.name(), "AggregateError");
        assert_eq!(agg.len(), 2);
        assert_eq!(
            agg.to_string(),
            "Multiple listeners failed:\n- first\n- second"
        );
    }

    #[test]
    fn test_hub_error_transparent_display() {
        let err = HubError::listener("exact message");
        assert_eq!(err.to_string(), "exact message");
        assert!(err.is_listener_failure());
        assert_eq!(err.category(), "listener");

        let err: HubError = ValidationError::EmptyTopic.into();
        assert!(!err.is_listener_failure());
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_listener_errors_accessor() {
        let err: HubError = AggregateError::new(vec![
            ListenerError::new("a"),
            ListenerError::new("b"),
        ])
        .into();
        let messages: Vec<_> = err.listener_errors().iter().map(|e| e.message()).collect();
        assert_eq!(messages, vec!["a", "b"]);

        assert!(HubError::Timeout(Duration::from_millis(5))
            .listener_errors()
            .is_empty());
    }

    #[test]
    fn test_hub_error_into_listener_error() {
        let original = ListenerError::new("kept");
        let back: ListenerError = HubError::Listener(original).into();
        assert_eq!(back.message(), "kept");

        let wrapped: ListenerError = HubError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(wrapped.message(), "timed out after 1s");
    }
}
