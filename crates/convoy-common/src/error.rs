//! Error types for convoy

use thiserror::Error;

/// Result type alias for convoy operations
pub type Result<T> = std::result::Result<T, ConvoyError>;

/// Unified error type for all convoy operations
#[derive(Error, Debug, Clone)]
pub enum ConvoyError {
    /// A signal matched no registered handler. This is a wiring mistake,
    /// fatal to the whole round rather than local to one task.
    #[error("No handler registered for signal: {0}")]
    UnhandledSignal(String),

    /// A handle was resolved twice. Invariant violation, never a data error.
    #[error("Handle resolved twice: {0}")]
    DoubleCompletion(String),

    /// Step-protocol misuse: resuming with the wrong number of values, or
    /// stepping a task that has no more code to run.
    #[error("Task protocol error: {0}")]
    Task(String),

    /// Operation unclaimed by every operator in the chain.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvoyError {
    /// Returns true for structural faults that abort the scheduler run,
    /// as opposed to data errors local to a single handle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConvoyError::UnhandledSignal(_)
                | ConvoyError::DoubleCompletion(_)
                | ConvoyError::Task(_)
        )
    }

    /// Returns true if this error marks an operation cancelled by the
    /// operator chain rather than failed by the store.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConvoyError::Unsupported(_))
    }
}

impl From<bson::ser::Error> for ConvoyError {
    fn from(err: bson::ser::Error) -> Self {
        ConvoyError::Serialization(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for ConvoyError {
    fn from(err: bson::de::Error) -> Self {
        ConvoyError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

// Driver error conversions (when the mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for ConvoyError {
    fn from(err: mongodb::error::Error) -> Self {
        ConvoyError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unhandled_signal() {
        let err = ConvoyError::UnhandledSignal("count on users".to_string());
        assert_eq!(
            err.to_string(),
            "No handler registered for signal: count on users"
        );
    }

    #[test]
    fn test_error_display_double_completion() {
        let err = ConvoyError::DoubleCompletion("op 42".to_string());
        assert_eq!(err.to_string(), "Handle resolved twice: op 42");
    }

    #[test]
    fn test_error_display_task() {
        let err = ConvoyError::Task("no more code to run".to_string());
        assert_eq!(err.to_string(), "Task protocol error: no more code to run");
    }

    #[test]
    fn test_error_display_unsupported() {
        let err = ConvoyError::Unsupported("custom:cache".to_string());
        assert_eq!(err.to_string(), "Operation not supported: custom:cache");
    }

    #[test]
    fn test_error_display_store() {
        let err = ConvoyError::Store("connection refused".to_string());
        assert_eq!(err.to_string(), "Store error: connection refused");
    }

    #[test]
    fn test_is_fatal() {
        assert!(ConvoyError::UnhandledSignal("x".to_string()).is_fatal());
        assert!(ConvoyError::DoubleCompletion("x".to_string()).is_fatal());
        assert!(ConvoyError::Task("x".to_string()).is_fatal());
        assert!(!ConvoyError::Unsupported("x".to_string()).is_fatal());
        assert!(!ConvoyError::Store("x".to_string()).is_fatal());
        assert!(!ConvoyError::Handler("x".to_string()).is_fatal());
    }

    #[test]
    fn test_is_cancellation() {
        assert!(ConvoyError::Unsupported("x".to_string()).is_cancellation());
        assert!(!ConvoyError::Store("x".to_string()).is_cancellation());
    }

    #[test]
    fn test_result_type() {
        let ok: Result<i32> = Ok(7);
        assert_eq!(ok.unwrap(), 7);

        let err: Result<i32> = Err(ConvoyError::Internal("boom".to_string()));
        assert!(err.is_err());
    }
}
