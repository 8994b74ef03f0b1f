//! Error types for the event bus.

use voxline_types::Topic;

/// Error raised by a single handler while processing an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One handler that failed during a publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Name reported by the failing handler.
    pub handler: String,
    pub error: HandlerError,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.handler, self.error)
    }
}

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The event's shape does not belong to the topic it was published on.
    #[error("event for topic {actual} published on topic {expected}")]
    TopicMismatch { expected: Topic, actual: Topic },

    /// The handler is already registered for this topic.
    #[error("handler '{handler}' is already subscribed to {topic}")]
    AlreadySubscribed { topic: Topic, handler: String },

    /// One or more handlers failed; every other handler still ran.
    #[error("{} handler(s) failed on {topic}: {}", failures.len(), join_failures(failures))]
    HandlerFailures {
        topic: Topic,
        failures: Vec<HandlerFailure>,
    },
}

fn join_failures(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
