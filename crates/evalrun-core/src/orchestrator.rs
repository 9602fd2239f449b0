//! Suite orchestration: validate, expand the grid, run every group.
//!
//! Run groups run concurrently. Within a group, test cases are admitted
//! through the suite's test-case gate in case order and each admitted case
//! runs as its own task, so a panic in one case cannot take down its
//! siblings. A group ends only after every one of its cases has settled.

use std::sync::Arc;

use evalrun_reporting::{ErrorDetail, ReportingBackend, RunId};
use futures::future::join_all;
use tracing::{instrument, warn, Instrument};
use uuid::Uuid;

use crate::case_runner::CaseRunner;
use crate::error::EngineResult;
use crate::gate::{EvaluatorGates, Gate};
use crate::grid::{self, GridCombo};
use crate::metrics::METRICS;
use crate::obs;
use crate::options::RunOptions;
use crate::reporter::Reporter;
use crate::run_group::RunGroup;
use crate::suite::{Suite, TestCase, TestOutput};
use crate::summary::{CaseOutcome, CaseStatus, RunGroupStatus, RunGroupSummary, SuiteSummary};

/// Run `suite` against `backend` with options read from the environment.
pub async fn run_suite<T: TestCase, O: TestOutput>(
    suite: Suite<T, O>,
    backend: Arc<dyn ReportingBackend>,
) -> EngineResult<SuiteSummary> {
    run_suite_with(suite, backend, RunOptions::from_env()).await
}

/// Run `suite` against `backend`.
///
/// Returns `Err` only when the suite fails validation, in which case one
/// suite-level error has been reported and nothing was started. Failures of
/// individual groups, cases and evaluators are reported and summarised,
/// never propagated.
#[instrument(skip_all, fields(suite_id = %suite.id()))]
pub async fn run_suite_with<T: TestCase, O: TestOutput>(
    suite: Suite<T, O>,
    backend: Arc<dyn ReportingBackend>,
    options: RunOptions,
) -> EngineResult<SuiteSummary> {
    let suite_id = suite.id().to_string();
    if !options.filters.includes_suite(&suite_id) {
        obs::emit_suite_skipped(&suite_id);
        return Ok(SuiteSummary::skipped(suite_id));
    }

    let reporter = Arc::new(Reporter::new(backend, suite_id.clone()));
    let (hashes, case_gate, evaluator_gates) = match prepare(&suite) {
        Ok(prepared) => prepared,
        Err(e) => {
            obs::emit_suite_validation_failed(&suite_id, &e);
            reporter.error(None, None, None, e.to_detail()).await;
            return Err(e);
        }
    };

    // Overrides select from already-validated hashes.
    let selected: Vec<(usize, String)> = hashes
        .into_iter()
        .enumerate()
        .filter(|(_, hash)| options.filters.includes_case(&suite_id, hash))
        .collect();

    let combos = suite
        .grid()
        .map(grid::expand)
        .unwrap_or_else(|| vec![GridCombo::default()]);
    let grid_search_run_group_id = (combos.len() > 1).then(|| Uuid::new_v4().to_string());
    obs::emit_suite_started(&suite_id, selected.len(), combos.len());

    let runner = CaseRunner::new(
        Arc::new(suite),
        reporter,
        Arc::new(evaluator_gates),
        Arc::clone(&options.flusher),
        options.flush_timeout,
    );
    let groups = combos.into_iter().map(|combo| {
        run_group(
            &runner,
            &case_gate,
            combo,
            grid_search_run_group_id.clone(),
            &selected,
        )
    });
    let run_groups = join_all(groups).await;

    METRICS.flush();
    Ok(SuiteSummary {
        suite_id,
        skipped: false,
        grid_search_run_group_id,
        run_groups,
    })
}

/// Validate and allocate the suite-scoped gates.
fn prepare<T: TestCase, O: TestOutput>(
    suite: &Suite<T, O>,
) -> EngineResult<(Vec<String>, Gate, EvaluatorGates)> {
    let hashes = suite.validate()?;
    let case_gate = Gate::new(suite.max_test_case_concurrency())?;
    let mut evaluator_gates = EvaluatorGates::new();
    for evaluator in suite.evaluators() {
        evaluator_gates.register(evaluator.id(), evaluator.max_concurrency())?;
    }
    Ok((hashes, case_gate, evaluator_gates))
}

async fn run_group<T: TestCase, O: TestOutput>(
    runner: &CaseRunner<T, O>,
    case_gate: &Gate,
    combo: GridCombo,
    grid_search_run_group_id: Option<String>,
    cases: &[(usize, String)],
) -> RunGroupSummary {
    let reporter = Arc::clone(runner.reporter());
    let mut group = RunGroup::new(Arc::clone(&reporter), combo.clone(), grid_search_run_group_id);

    let run_id = match group.start().await {
        Ok(run_id) => run_id,
        Err(e) => {
            obs::emit_run_group_aborted(reporter.test_id(), &e);
            reporter.error(None, None, None, e.to_detail()).await;
            return RunGroupSummary::aborted(combo, e.to_string());
        }
    };

    let mut handles = Vec::with_capacity(cases.len());
    for (index, hash) in cases {
        // Admission in case order; the permit travels with the task.
        let permit = case_gate.acquire().await;
        let task_runner = runner.clone();
        let test_case = runner.suite().test_cases()[*index].clone();
        let (task_run_id, task_combo, task_hash) = (run_id.clone(), combo.clone(), hash.clone());
        let handle = tokio::spawn(
            async move {
                let _permit = permit;
                task_runner
                    .run(task_run_id, task_combo, test_case, task_hash)
                    .await
            }
            .in_current_span(),
        );
        handles.push((hash.clone(), handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (hash, handle) in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_err) => outcomes.push(case_crashed(&reporter, &run_id, hash, join_err).await),
        }
    }

    runner.drain_events().await;
    if let Err(e) = group.end().await {
        warn!(run_id = %run_id, error = %e, "run group did not end cleanly");
    }

    if let Some(job) = runner.suite().human_review() {
        reporter
            .human_review_job(&run_id, &job.name, &job.assignee_email_addresses)
            .await;
    }

    let summary = RunGroupSummary {
        run_id: Some(run_id.clone()),
        grid_combo: combo,
        status: RunGroupStatus::Completed,
        abort_reason: None,
        cases: outcomes,
    };
    obs::emit_run_group_ended(
        reporter.test_id(),
        &run_id.to_string(),
        summary.cases.len(),
        summary.failed_count(),
    );
    summary
}

/// A case task died outside the user function and evaluators.
async fn case_crashed(
    reporter: &Reporter,
    run_id: &RunId,
    test_case_hash: String,
    join_err: tokio::task::JoinError,
) -> CaseOutcome {
    METRICS.inc_test_cases_failed();
    let detail = ErrorDetail {
        name: "Panic".to_string(),
        message: join_err.to_string(),
        stacktrace: format!("{join_err:?}"),
    };
    reporter
        .error(Some(run_id), Some(&test_case_hash), None, detail.clone())
        .await;
    CaseOutcome {
        test_case_hash,
        status: CaseStatus::Failed,
        attempts: 0,
        duration_ms: 0,
        error: Some(detail),
        evaluations: Vec::new(),
        events: Vec::new(),
    }
}
