//! Evaluators and the per-case evaluator runner.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use evalrun_reporting::{Assertion, ErrorDetail, RunId, Threshold};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{error_detail, Panicked};
use crate::gate::{EvaluatorGates, DEFAULT_MAX_CONCURRENCY};
use crate::metrics::METRICS;
use crate::obs;
use crate::reporter::Reporter;

/// Score produced by one evaluator for one test case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

impl Evaluation {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            ..Default::default()
        }
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Derived pass/fail; `None` without a threshold or with an empty one.
    pub fn passed(&self) -> Option<bool> {
        self.threshold.and_then(|t| t.passed(self.score))
    }
}

/// Scores a test case's output.
///
/// Evaluators are shared by every test case and run group of a suite, so
/// implementations must not depend on call order.
#[async_trait]
pub trait Evaluator<T, O>: Send + Sync {
    /// Stable external id, unique within a suite.
    fn id(&self) -> &str;

    /// Upper bound on concurrent `evaluate` calls across the whole suite.
    fn max_concurrency(&self) -> usize {
        DEFAULT_MAX_CONCURRENCY
    }

    async fn evaluate(&self, test_case: &T, output: &O) -> anyhow::Result<Evaluation>;
}

/// Evaluator backed by a synchronous closure.
pub struct FnEvaluator<F> {
    id: String,
    max_concurrency: usize,
    score: F,
}

impl<F> FnEvaluator<F> {
    pub fn new(id: impl Into<String>, score: F) -> Self {
        Self {
            id: id.into(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            score,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

#[async_trait]
impl<T, O, F> Evaluator<T, O> for FnEvaluator<F>
where
    T: Sync,
    O: Sync,
    F: Fn(&T, &O) -> anyhow::Result<Evaluation> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    async fn evaluate(&self, test_case: &T, output: &O) -> anyhow::Result<Evaluation> {
        (self.score)(test_case, output)
    }
}

/// What happened to one evaluator on one test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatorOutcome {
    pub evaluator_id: String,
    pub result: Result<Evaluation, ErrorDetail>,
}

impl EvaluatorOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Where evaluator outcomes are reported.
pub struct EvalTarget<'a> {
    pub reporter: &'a Reporter,
    pub run_id: &'a RunId,
    pub test_case_hash: &'a str,
}

/// Run every evaluator on one output, each under its own gate.
///
/// Evaluators run concurrently and are polled in registration order.
/// Outcomes come back in the same order. Failures and panics are reported
/// against `(hash, evaluator id)` and never affect sibling evaluators.
pub async fn run_all<T, O>(
    test_case: &T,
    output: &O,
    evaluators: &[Arc<dyn Evaluator<T, O>>],
    gates: &EvaluatorGates,
    target: EvalTarget<'_>,
) -> Vec<EvaluatorOutcome>
where
    T: Sync,
    O: Sync,
{
    let target = &target;
    let runs = evaluators.iter().map(|evaluator| async move {
        let id = evaluator.id();
        // `evaluate` itself may panic before returning a future.
        let attempt =
            AssertUnwindSafe(async move { evaluator.evaluate(test_case, output).await })
                .catch_unwind();
        let caught = match gates.get(id) {
            Some(gate) => gate.run(|| attempt).await,
            None => {
                tracing::debug!(evaluator_id = %id, "no gate registered; running ungated");
                attempt.await
            }
        };
        let result = caught.unwrap_or_else(|payload| {
            Err(anyhow::Error::new(Panicked::from_payload(payload.as_ref())))
        });

        let result = match result {
            Ok(evaluation) => {
                METRICS.inc_evaluations();
                target
                    .reporter
                    .eval(target.run_id, target.test_case_hash, id, &evaluation)
                    .await;
                Ok(evaluation)
            }
            Err(err) => {
                METRICS.inc_evaluator_failures();
                obs::emit_evaluator_failed(target.test_case_hash, id, &err);
                let detail = error_detail(&err);
                target
                    .reporter
                    .error(
                        Some(target.run_id),
                        Some(target.test_case_hash),
                        Some(id),
                        detail.clone(),
                    )
                    .await;
                Err(detail)
            }
        };

        EvaluatorOutcome {
            evaluator_id: id.to_string(),
            result,
        }
    });

    join_all(runs).await
}
