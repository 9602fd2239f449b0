//! Error types for evalrun-reporting

use thiserror::Error;

/// Errors that can occur while delivering reports to a backend
#[derive(Error, Debug)]
pub enum ReportError {
    /// The request never reached the backend (connect, timeout, TLS, ...)
    #[error("Transport failed for {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The backend answered with a non-success status
    #[error("Backend rejected {endpoint} with status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Report referenced a run the backend does not know
    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Report targeted a run that has already ended
    #[error("Cannot act on an ended run: {run_id}")]
    RunEnded { run_id: String },

    /// Failure injected by a fake backend
    #[error("Injected failure: {0}")]
    Injected(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Serialization(err.to_string())
    }
}

/// Result type for reporting operations
pub type ReportResult<T> = std::result::Result<T, ReportError>;
