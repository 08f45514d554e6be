//! Error types for the presence analytics agent.

use thiserror::Error;

/// A sample was rejected at the ingress boundary.
///
/// Validation failures are permanent: resending the same payload will fail
/// the same way.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} is not numeric: {value}")]
    NonNumeric { field: &'static str, value: String },

    #[error("field {field} is not a finite number")]
    NonFinite { field: &'static str },

    #[error("move_speed must be non-negative, got {0}")]
    NegativeSpeed(f64),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("device_id must not be empty")]
    EmptyDeviceId,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// A downstream store failed or refused a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// Lock timeouts and similar conditions that usually clear on their own.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected write: {0}")]
    Rejected(String),

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl PersistenceError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistenceError::Transient(_) | PersistenceError::Unavailable(_)
        )
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

/// Errors surfaced by a full ingest step (process + persist).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl PipelineError {
    /// Persistence failures may be retried; validation failures never.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Validation(_) => false,
            PipelineError::Persistence(e) => e.is_retryable(),
        }
    }
}

/// A sample could not be handed to its device worker.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The device queue is at capacity; the sample was shed.
    #[error("queue for device {0} is full")]
    QueueFull(String),

    #[error("worker for device {0} has stopped")]
    WorkerGone(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PersistenceError::Transient("lock wait timeout".into()).is_retryable());
        assert!(PersistenceError::Unavailable("down".into()).is_retryable());
        assert!(!PersistenceError::Rejected("duplicate".into()).is_retryable());

        let err = PipelineError::from(ValidationError::MissingField("x"));
        assert!(!err.is_retryable());
        let err = PipelineError::from(PersistenceError::Transient("busy".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::NonNumeric {
            field: "y",
            value: "\"abc\"".into(),
        };
        assert_eq!(err.to_string(), "field y is not numeric: \"abc\"");
        assert_eq!(
            ValidationError::MissingField("move_speed").to_string(),
            "missing required field: move_speed"
        );
    }
}
