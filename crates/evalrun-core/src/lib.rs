//! evalrun-core: concurrent test-suite execution engine
//!
//! A [`Suite`] pairs test cases with the function under test and a set of
//! evaluators. [`run_suite`] validates it, expands any grid search into run
//! groups, and runs every test case through the function and evaluators
//! under bounded concurrency, reporting each step to a
//! [`evalrun_reporting::ReportingBackend`].

pub mod case_runner;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod flusher;
pub mod gate;
pub mod grid;
pub mod identity;
pub mod metrics;
pub mod obs;
pub mod options;
pub mod orchestrator;
pub mod reporter;
pub mod retry;
pub mod run_group;
pub mod suite;
pub mod summary;
pub mod telemetry;

pub use context::{emit_event, EventSink, RecordedEvent, RunContext};
pub use error::{EngineError, EngineResult, Panicked};
pub use evaluator::{Evaluation, Evaluator, EvaluatorOutcome, FnEvaluator};
pub use flusher::{EventFlusher, TaskTicket, DEFAULT_FLUSH_TIMEOUT};
pub use gate::{EvaluatorGates, Gate, GatePermit, DEFAULT_MAX_CONCURRENCY};
pub use grid::{GridCombo, GridParams};
pub use identity::IdentityStrategy;
pub use options::{RunFilters, RunOptions};
pub use orchestrator::{run_suite, run_suite_with};
pub use retry::{RetryPolicy, Transient};
pub use run_group::{RunGroup, RunGroupState};
pub use suite::{HumanReviewJob, Suite, TestCase, TestOutput};
pub use summary::{CaseOutcome, CaseStatus, RunGroupStatus, RunGroupSummary, SuiteSummary};

pub use evalrun_reporting::{Assertion, ErrorDetail, ReportingBackend, RunId, Threshold};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
