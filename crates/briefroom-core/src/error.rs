//! Error types for briefroom.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using briefroom's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for briefroom operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ingestion job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Invalid input (rejected before anything is persisted)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation conflicts with the current state of the resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Another invocation currently holds the run lock for this job
    #[error("Job {0} is already being run")]
    JobLocked(Uuid),

    /// Object storage download failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// File-search service call failed
    #[error("File search error: {0}")]
    FileSearch(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a client-side problem (bad id, bad state, bad input)
    /// rather than an infrastructure failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::JobNotFound(_)
                | Error::InvalidInput(_)
                | Error::Conflict(_)
                | Error::JobLocked(_)
                | Error::Unauthorized(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("file store".to_string());
        assert_eq!(err.to_string(), "Not found: file store");
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
    }

    #[test]
    fn test_error_display_job_locked() {
        let id = Uuid::new_v4();
        let err = Error::JobLocked(id);
        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.to_string().contains("already being run"));
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("job is terminal".to_string());
        assert_eq!(err.to_string(), "Conflict: job is terminal");
    }

    #[test]
    fn test_error_display_external() {
        assert_eq!(
            Error::Storage("404".to_string()).to_string(),
            "Storage error: 404"
        );
        assert_eq!(
            Error::FileSearch("importFile failed".to_string()).to_string(),
            "File search error: importFile failed"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(Error::InvalidInput("empty".into()).is_client_error());
        assert!(Error::JobNotFound(Uuid::nil()).is_client_error());
        assert!(Error::Conflict("terminal".into()).is_client_error());
        assert!(Error::JobLocked(Uuid::nil()).is_client_error());
        assert!(!Error::Storage("io".into()).is_client_error());
        assert!(!Error::Internal("bug".into()).is_client_error());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
