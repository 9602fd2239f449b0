//! Reporting backend trait and wire types.
//!
//! The engine talks to exactly one abstraction, [`ReportingBackend`], which
//! posts run lifecycle calls (start/result/eval/error/end) plus telemetry
//! events. Implementations:
//! - `HttpReportingBackend`: hosted API or local control-plane process
//! - `MemoryBackend`: in-memory fake for tests (see `fakes`)
//!
//! Field names serialize in camelCase to match the HTTP contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReportResult;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of one RunGroup execution, assigned by the backend on `start`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored test-case result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultId(pub String);

impl std::fmt::Display for ResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Scoring payloads
// ---------------------------------------------------------------------------

/// Score bounds attached to an evaluation.
///
/// Every specified bound must hold for the score to pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
}

impl Threshold {
    /// Whether any bound is set.
    pub fn is_empty(&self) -> bool {
        self.lt.is_none() && self.lte.is_none() && self.gt.is_none() && self.gte.is_none()
    }

    /// `Some(true)` iff every specified bound holds, `None` when no bound is set.
    pub fn passed(&self, score: f64) -> Option<bool> {
        if self.is_empty() {
            return None;
        }
        let ok = self.lt.map_or(true, |b| score < b)
            && self.lte.map_or(true, |b| score <= b)
            && self.gt.map_or(true, |b| score > b)
            && self.gte.map_or(true, |b| score >= b);
        Some(ok)
    }
}

/// A named pass/fail check produced by an evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub criterion: String,
    pub passed: bool,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Flattened error sent with `errors` reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    pub stacktrace: String,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// `POST start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub test_external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_search_run_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_search_params_combo: Option<BTreeMap<String, String>>,
}

/// `POST results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultReport {
    pub test_external_id: String,
    pub run_id: RunId,
    pub test_case_hash: String,
    pub test_case_body: serde_json::Value,
    pub test_case_output: serde_json::Value,
    pub duration_ms: u64,
}

/// `POST evals`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalReport {
    pub test_external_id: String,
    pub run_id: RunId,
    pub test_case_hash: String,
    pub evaluator_external_id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,
}

/// `POST errors`
///
/// Suite-level errors carry only the test id; case errors add run id and
/// hash; evaluator errors add the evaluator id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub test_external_id: String,
    pub run_id: Option<RunId>,
    pub test_case_hash: Option<String>,
    pub evaluator_external_id: Option<String>,
    pub error: ErrorDetail,
}

/// `POST end`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRequest {
    pub test_external_id: String,
    pub run_id: RunId,
}

/// `POST events`: telemetry emitted from inside a test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
    pub test_external_id: String,
    pub run_id: RunId,
    pub test_case_hash: String,
    pub message: String,
    pub properties: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Downstream review job created after a RunGroup ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanReviewJobRequest {
    pub run_id: RunId,
    pub name: String,
    pub assignee_email_addresses: Vec<String>,
}

// ---------------------------------------------------------------------------
// ReportingBackend
// ---------------------------------------------------------------------------

/// Destination for test-run reports.
///
/// Guarantees expected by the engine:
/// - `start` returns a run id unique to this backend.
/// - Calls for a run after its `end` fail with `ReportError::RunEnded`.
/// - Every method other than `start` may fail without affecting the run;
///   the engine logs and drops such failures.
#[async_trait]
pub trait ReportingBackend: Send + Sync {
    /// Open a run for one RunGroup.
    async fn start(&self, request: StartRequest) -> ReportResult<RunId>;

    /// Record a test case's input/output.
    async fn result(&self, report: ResultReport) -> ReportResult<ResultId>;

    /// Record one evaluator's score for a test case.
    async fn eval(&self, report: EvalReport) -> ReportResult<()>;

    /// Record a suite, test-case or evaluator failure.
    async fn error(&self, report: ErrorReport) -> ReportResult<()>;

    /// Close a run.
    async fn end(&self, request: EndRequest) -> ReportResult<()>;

    /// Record a telemetry event emitted inside a test case.
    async fn event(&self, report: EventReport) -> ReportResult<()>;

    /// Create a review job for a finished run. Backends without review
    /// support accept and ignore the request.
    async fn human_review_job(&self, request: HumanReviewJobRequest) -> ReportResult<()> {
        tracing::debug!(run_id = %request.run_id, "human review jobs not supported by backend");
        Ok(())
    }
}
