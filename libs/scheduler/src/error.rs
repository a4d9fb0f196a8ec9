//! Error types for scheduler operations.

use thiserror::Error;

/// Errors returned by scheduler backends and status streams.
///
/// The type is `Clone` so that a single deployment outcome can be handed to
/// every caller of [`StatusStream::err`](crate::StatusStream::err).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The app is not known to the backend.
    #[error("app not found: {0}")]
    AppNotFound(String),

    /// The instance is not known to the backend.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The submitted app is malformed.
    #[error("invalid app: {0}")]
    InvalidApp(String),

    /// The backend does not support the requested exposure.
    #[error("unsupported exposure: {0}")]
    UnsupportedExposure(String),

    /// The desired state could not be achieved.
    #[error("deployment failed: {0}")]
    Deployment(String),

    /// A process exited unsuccessfully.
    #[error("process exited with status {}", exit_code(.0))]
    ExitStatus(Option<i32>),

    /// The backend is not configured to perform the operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The backend or its substrate rejected a call or is unreachable.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// I/O error on a process or sink stream.
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl SchedulerError {
    /// Returns true if this error means the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AppNotFound(_) | Self::InstanceNotFound(_))
    }

    /// Returns true if this error was caused by the caller's context rather
    /// than by the backend.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifiers() {
        assert!(SchedulerError::AppNotFound("acme".into()).is_not_found());
        assert!(SchedulerError::InstanceNotFound("i-123".into()).is_not_found());
        assert!(!SchedulerError::Cancelled.is_not_found());

        assert!(SchedulerError::Cancelled.is_cancellation());
        assert!(SchedulerError::DeadlineExceeded.is_cancellation());
        assert!(!SchedulerError::Deployment("image pull failed".into()).is_cancellation());
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(
            SchedulerError::ExitStatus(Some(2)).to_string(),
            "process exited with status 2"
        );
        assert_eq!(
            SchedulerError::ExitStatus(None).to_string(),
            "process exited with status signal"
        );
    }
}
