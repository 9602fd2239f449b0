//! Structured observability hooks for suite execution.
//!
//! Every lifecycle step is emitted as a single `tracing` record carrying an
//! `event` field, so log pipelines can filter on it without parsing
//! messages. Per-case work runs inside a [`test_case_span`].

use std::time::Duration;

use tracing::{info, warn};

/// Span wrapping everything done on behalf of one test case.
pub fn test_case_span(run_id: &str, test_case_hash: &str) -> tracing::Span {
    tracing::info_span!(
        "evalrun.test_case",
        run_id = %run_id,
        test_case_hash = %test_case_hash
    )
}

/// Emit event: suite validated and about to dispatch.
pub fn emit_suite_started(suite_id: &str, test_cases: usize, run_groups: usize) {
    info!(
        event = "suite.started",
        suite_id = %suite_id,
        test_cases = test_cases,
        run_groups = run_groups,
    );
}

/// Emit event: suite excluded by the configured filters.
pub fn emit_suite_skipped(suite_id: &str) {
    info!(event = "suite.skipped", suite_id = %suite_id);
}

pub fn emit_suite_validation_failed(suite_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "suite.validation_failed", suite_id = %suite_id, error = %error);
}

/// Emit event: a run group received its run id.
pub fn emit_run_group_started(suite_id: &str, run_id: &str, combo: &str) {
    info!(
        event = "run_group.started",
        suite_id = %suite_id,
        run_id = %run_id,
        grid_combo = %combo,
    );
}

/// Emit event: a run group could not be started and was skipped.
pub fn emit_run_group_aborted(suite_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run_group.aborted", suite_id = %suite_id, error = %error);
}

/// Emit event: a run group settled all of its test cases and ended.
pub fn emit_run_group_ended(suite_id: &str, run_id: &str, test_cases: usize, failed: usize) {
    info!(
        event = "run_group.ended",
        suite_id = %suite_id,
        run_id = %run_id,
        test_cases = test_cases,
        failed = failed,
    );
}

pub fn emit_test_case_finished(test_case_hash: &str, success: bool, attempts: u32, duration_ms: u64) {
    info!(
        event = "test_case.finished",
        test_case_hash = %test_case_hash,
        success = success,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: a transient failure is about to be retried.
pub fn emit_test_case_retry(attempt: u32, error: &dyn std::fmt::Display) {
    info!(event = "test_case.retry", attempt = attempt, error = %error);
}

pub fn emit_evaluator_failed(test_case_hash: &str, evaluator_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "evaluator.failed",
        test_case_hash = %test_case_hash,
        evaluator_id = %evaluator_id,
        error = %error,
    );
}

/// Emit event: a best-effort report was lost (warning level).
pub fn emit_report_dropped(endpoint: &str, error: &dyn std::fmt::Display) {
    crate::metrics::METRICS.inc_reports_dropped();
    warn!(event = "report.dropped", endpoint = %endpoint, error = %error);
}

/// Emit event: draining background emissions gave up (warning level).
pub fn emit_flush_timeout(outstanding: usize, timeout: Duration) {
    warn!(
        event = "flush.timeout",
        outstanding = outstanding,
        timeout_ms = timeout.as_millis() as u64,
        "background emissions still in flight after flush timeout"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_report_dropped_logs_endpoint() {
        emit_report_dropped("evals", &"connection refused");
        assert!(logs_contain("report.dropped"));
        assert!(logs_contain("evals"));
    }

    #[traced_test]
    #[test]
    fn test_case_span_carries_hash() {
        let span = test_case_span("run-1", "abc123");
        let _entered = span.enter();
        emit_test_case_finished("abc123", true, 1, 5);
        assert!(logs_contain("evalrun.test_case"));
        assert!(logs_contain("test_case.finished"));
    }
}
