//! Error types for the kue job queue.

use thiserror::Error;

/// The main error type for kue.
#[derive(Error, Debug)]
pub enum KueError {
    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store operation failed (connection loss, wrong key type, ...).
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),
}

/// Result type alias using KueError.
pub type Result<T> = std::result::Result<T, KueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_serialization() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("invalid").unwrap_err();
        let err = KueError::Serialization(json_err);
        assert!(format!("{}", err).starts_with("Serialization error:"));
    }

    #[test]
    fn test_error_display_store() {
        let err = KueError::Store("connection refused".to_string());
        assert_eq!(format!("{}", err), "Store error: connection refused");
    }

    #[test]
    fn test_error_display_job_not_found() {
        let err = KueError::JobNotFound("abc-123".to_string());
        assert_eq!(format!("{}", err), "Job not found: abc-123");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: KueError = json_err.into();
        assert!(matches!(err, KueError::Serialization(_)));
    }
}
