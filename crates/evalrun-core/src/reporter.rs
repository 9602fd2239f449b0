//! Suite-bound adapter over a [`ReportingBackend`].
//!
//! Stamps every request with the suite's external id. Only [`Reporter::start`]
//! surfaces failures; every other call is best-effort and a failure is logged
//! as a dropped report.

use std::sync::Arc;

use evalrun_reporting::{
    EndRequest, ErrorDetail, ErrorReport, EvalReport, HumanReviewJobRequest, ReportResult,
    ReportingBackend, ResultId, ResultReport, RunId, StartRequest,
};

use crate::evaluator::Evaluation;
use crate::grid::GridCombo;
use crate::obs;

pub struct Reporter {
    backend: Arc<dyn ReportingBackend>,
    test_id: String,
}

impl Reporter {
    pub fn new(backend: Arc<dyn ReportingBackend>, test_id: impl Into<String>) -> Self {
        Self {
            backend,
            test_id: test_id.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ReportingBackend> {
        &self.backend
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Open a run. An empty combo is sent as no combo at all.
    pub async fn start(
        &self,
        grid_search_run_group_id: Option<String>,
        combo: &GridCombo,
    ) -> ReportResult<RunId> {
        self.backend
            .start(StartRequest {
                test_external_id: self.test_id.clone(),
                grid_search_run_group_id,
                grid_search_params_combo: (!combo.is_empty()).then(|| combo.to_map()),
            })
            .await
    }

    pub async fn result(
        &self,
        run_id: &RunId,
        test_case_hash: &str,
        test_case_body: serde_json::Value,
        test_case_output: serde_json::Value,
        duration_ms: u64,
    ) -> Option<ResultId> {
        let report = ResultReport {
            test_external_id: self.test_id.clone(),
            run_id: run_id.clone(),
            test_case_hash: test_case_hash.to_string(),
            test_case_body,
            test_case_output,
            duration_ms,
        };
        match self.backend.result(report).await {
            Ok(id) => Some(id),
            Err(e) => {
                obs::emit_report_dropped("results", &e);
                None
            }
        }
    }

    pub async fn eval(
        &self,
        run_id: &RunId,
        test_case_hash: &str,
        evaluator_id: &str,
        evaluation: &Evaluation,
    ) {
        let report = EvalReport {
            test_external_id: self.test_id.clone(),
            run_id: run_id.clone(),
            test_case_hash: test_case_hash.to_string(),
            evaluator_external_id: evaluator_id.to_string(),
            score: evaluation.score,
            passed: evaluation.passed(),
            threshold: evaluation.threshold,
            metadata: evaluation.metadata.clone(),
            assertions: evaluation.assertions.clone(),
        };
        if let Err(e) = self.backend.eval(report).await {
            obs::emit_report_dropped("evals", &e);
        }
    }

    /// Report a failure. Suite-level failures carry no run id or hash.
    pub async fn error(
        &self,
        run_id: Option<&RunId>,
        test_case_hash: Option<&str>,
        evaluator_id: Option<&str>,
        error: ErrorDetail,
    ) {
        let report = ErrorReport {
            test_external_id: self.test_id.clone(),
            run_id: run_id.cloned(),
            test_case_hash: test_case_hash.map(str::to_string),
            evaluator_external_id: evaluator_id.map(str::to_string),
            error,
        };
        if let Err(e) = self.backend.error(report).await {
            obs::emit_report_dropped("errors", &e);
        }
    }

    pub async fn end(&self, run_id: &RunId) -> ReportResult<()> {
        self.backend
            .end(EndRequest {
                test_external_id: self.test_id.clone(),
                run_id: run_id.clone(),
            })
            .await
    }

    pub async fn human_review_job(&self, run_id: &RunId, name: &str, assignees: &[String]) {
        let request = HumanReviewJobRequest {
            run_id: run_id.clone(),
            name: name.to_string(),
            assignee_email_addresses: assignees.to_vec(),
        };
        if let Err(e) = self.backend.human_review_job(request).await {
            obs::emit_report_dropped("human-review-job", &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalrun_reporting::MemoryBackend;
    use serde_json::json;

    #[tokio::test]
    async fn test_start_omits_empty_combo() {
        let backend = Arc::new(MemoryBackend::new());
        let reporter = Reporter::new(backend.clone(), "suite-a");
        reporter.start(None, &GridCombo::default()).await.unwrap();
        let starts = backend.starts();
        assert_eq!(starts[0].0.test_external_id, "suite-a");
        assert!(starts[0].0.grid_search_params_combo.is_none());
    }

    #[tokio::test]
    async fn test_posts_after_failure_are_swallowed() {
        let backend = Arc::new(MemoryBackend::new());
        let reporter = Reporter::new(backend.clone(), "suite-a");
        let run_id = reporter.start(None, &GridCombo::default()).await.unwrap();
        backend.fail_all_posts(true);

        let id = reporter
            .result(&run_id, "h1", json!({}), json!("out"), 3)
            .await;
        assert!(id.is_none());
        reporter
            .eval(&run_id, "h1", "e1", &Evaluation::new(1.0))
            .await;
        assert!(backend.results().is_empty());
        assert!(backend.evals().is_empty());
    }

    #[tokio::test]
    async fn test_eval_carries_derived_pass() {
        let backend = Arc::new(MemoryBackend::new());
        let reporter = Reporter::new(backend.clone(), "suite-a");
        let run_id = reporter.start(None, &GridCombo::default()).await.unwrap();
        let evaluation = Evaluation::new(0.4).with_threshold(evalrun_reporting::Threshold {
            gte: Some(0.5),
            ..Default::default()
        });
        reporter.eval(&run_id, "h1", "e1", &evaluation).await;
        assert_eq!(backend.evals()[0].passed, Some(false));
    }
}
