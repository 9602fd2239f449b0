//! What a suite run returns to its caller.

use evalrun_reporting::{ErrorDetail, RunId};
use serde::Serialize;

use crate::context::RecordedEvent;
use crate::evaluator::EvaluatorOutcome;
use crate::grid::GridCombo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// The function returned; a result was reported and evaluators ran.
    Succeeded,
    /// The function failed after retries; an error was reported.
    Failed,
}

/// Outcome of one test case within one run group.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub test_case_hash: String,
    pub status: CaseStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<ErrorDetail>,
    pub evaluations: Vec<EvaluatorOutcome>,
    pub events: Vec<RecordedEvent>,
}

impl CaseOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CaseStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunGroupStatus {
    Completed,
    /// `start` failed; nothing in the group ran.
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunGroupSummary {
    pub run_id: Option<RunId>,
    pub grid_combo: GridCombo,
    pub status: RunGroupStatus,
    pub abort_reason: Option<String>,
    pub cases: Vec<CaseOutcome>,
}

impl RunGroupSummary {
    pub fn aborted(grid_combo: GridCombo, reason: impl Into<String>) -> Self {
        Self {
            run_id: None,
            grid_combo,
            status: RunGroupStatus::Aborted,
            abort_reason: Some(reason.into()),
            cases: Vec::new(),
        }
    }

    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| !c.is_success()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteSummary {
    pub suite_id: String,
    /// Excluded by the run filters; nothing was reported.
    pub skipped: bool,
    pub grid_search_run_group_id: Option<String>,
    pub run_groups: Vec<RunGroupSummary>,
}

impl SuiteSummary {
    pub fn skipped(suite_id: impl Into<String>) -> Self {
        Self {
            suite_id: suite_id.into(),
            skipped: true,
            grid_search_run_group_id: None,
            run_groups: Vec::new(),
        }
    }

    fn cases(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.run_groups.iter().flat_map(|g| g.cases.iter())
    }

    /// Number of results reported across all run groups.
    pub fn result_count(&self) -> usize {
        self.cases().filter(|c| c.is_success()).count()
    }

    pub fn failed_cases(&self) -> Vec<&CaseOutcome> {
        self.cases().filter(|c| !c.is_success()).collect()
    }

    /// Number of successful evaluations across all run groups.
    pub fn evaluation_count(&self) -> usize {
        self.cases()
            .flat_map(|c| c.evaluations.iter())
            .filter(|e| e.is_ok())
            .count()
    }

    pub fn evaluator_failure_count(&self) -> usize {
        self.cases()
            .flat_map(|c| c.evaluations.iter())
            .filter(|e| !e.is_ok())
            .count()
    }

    pub fn aborted_groups(&self) -> usize {
        self.run_groups
            .iter()
            .filter(|g| g.status == RunGroupStatus::Aborted)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::Evaluation;

    fn case(hash: &str, status: CaseStatus, evals: Vec<EvaluatorOutcome>) -> CaseOutcome {
        CaseOutcome {
            test_case_hash: hash.to_string(),
            status,
            attempts: 1,
            duration_ms: 1,
            error: None,
            evaluations: evals,
            events: Vec::new(),
        }
    }

    #[test]
    fn test_counts_span_run_groups() {
        let ok = EvaluatorOutcome {
            evaluator_id: "e1".to_string(),
            result: Ok(Evaluation::new(1.0)),
        };
        let bad = EvaluatorOutcome {
            evaluator_id: "e2".to_string(),
            result: Err(ErrorDetail {
                name: "Error".to_string(),
                message: "x".to_string(),
                stacktrace: String::new(),
            }),
        };
        let group = RunGroupSummary {
            run_id: Some(RunId("r1".to_string())),
            grid_combo: GridCombo::default(),
            status: RunGroupStatus::Completed,
            abort_reason: None,
            cases: vec![
                case("h1", CaseStatus::Succeeded, vec![ok.clone(), bad]),
                case("h2", CaseStatus::Failed, vec![]),
            ],
        };
        let summary = SuiteSummary {
            suite_id: "s".to_string(),
            skipped: false,
            grid_search_run_group_id: None,
            run_groups: vec![group, RunGroupSummary::aborted(GridCombo::default(), "start failed")],
        };

        assert_eq!(summary.result_count(), 1);
        assert_eq!(summary.failed_cases().len(), 1);
        assert_eq!(summary.evaluation_count(), 1);
        assert_eq!(summary.evaluator_failure_count(), 1);
        assert_eq!(summary.aborted_groups(), 1);
        assert_eq!(summary.run_groups[0].failed_count(), 1);
    }
}
