//! evalrun-reporting: where test-run reports go
//!
//! This crate provides the reporting layer for evalrun.
//! The engine only sees the [`ReportingBackend`] trait; this crate ships
//! an HTTP implementation (hosted API or local control plane) and an
//! in-memory fake for tests.

pub mod backend;
pub mod error;
pub mod fakes;
pub mod http;

pub use backend::{
    Assertion, EndRequest, ErrorDetail, ErrorReport, EvalReport, EventReport,
    HumanReviewJobRequest, ReportingBackend, ResultId, ResultReport, RunId, StartRequest,
    Threshold,
};
pub use error::{ReportError, ReportResult};
pub use fakes::{MemoryBackend, RecordedCall};
pub use http::{BackendTarget, HttpBackendConfig, HttpReportingBackend};
