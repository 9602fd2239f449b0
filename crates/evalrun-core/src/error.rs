//! Engine error taxonomy.

use evalrun_reporting::{ErrorDetail, ReportError};

/// Errors produced by the execution engine itself.
///
/// Failures of user functions and evaluators are not engine errors: they
/// are captured per test case / evaluator and reported, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("suite validation failed: {0}")]
    Validation(String),

    #[error("invalid concurrency limit {0}: must be at least 1")]
    InvalidConcurrency(usize),

    #[error("cannot act on an ended run: {run_id}")]
    RunEnded { run_id: String },

    #[error("run has not been started")]
    RunNotStarted,

    #[error("run already started: {run_id}")]
    RunAlreadyStarted { run_id: String },

    #[error("reporting error: {0}")]
    Reporting(#[from] ReportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable name used as the `error.name` field of error reports.
    pub fn name(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "ValidationError",
            EngineError::InvalidConcurrency(_) => "InvalidConcurrencyError",
            EngineError::RunEnded { .. } => "RunEndedError",
            EngineError::RunNotStarted => "RunNotStartedError",
            EngineError::RunAlreadyStarted { .. } => "RunAlreadyStartedError",
            EngineError::Reporting(_) => "ReportingError",
            EngineError::Serialization(_) => "SerializationError",
        }
    }

    /// Flatten into the wire form used by `errors` reports.
    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            name: self.name().to_string(),
            message: self.to_string(),
            stacktrace: format!("{self:?}"),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A panic caught while running a user function or evaluator.
#[derive(Debug, thiserror::Error)]
#[error("panicked: {0}")]
pub struct Panicked(pub String);

impl Panicked {
    /// Build from a `catch_unwind` payload.
    pub fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Panicked(message)
    }
}

/// Flatten a user-side failure into the wire form used by `errors` reports.
///
/// The name is `Panic` for caught panics, `TransientError` for errors
/// marked transient and `Error` otherwise; the stacktrace carries the full
/// cause chain.
pub fn error_detail(err: &anyhow::Error) -> ErrorDetail {
    let name = if err.downcast_ref::<Panicked>().is_some() {
        "Panic"
    } else if err.downcast_ref::<crate::retry::Transient>().is_some() {
        "TransientError"
    } else {
        "Error"
    };
    ErrorDetail {
        name: name.to_string(),
        message: err.to_string(),
        stacktrace: format!("{err:?}"),
    }
}
