//! Runs one test case within one run group.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use evalrun_reporting::RunId;
use futures::FutureExt;
use tracing::{warn, Instrument};

use crate::context::{EventSink, RunContext};
use crate::error::{error_detail, Panicked};
use crate::evaluator::{self, EvalTarget};
use crate::flusher::EventFlusher;
use crate::gate::EvaluatorGates;
use crate::grid::GridCombo;
use crate::metrics::METRICS;
use crate::obs;
use crate::reporter::Reporter;
use crate::retry::run_with_retry;
use crate::suite::{Suite, TestCase, TestOutput};
use crate::summary::{CaseOutcome, CaseStatus};

/// Everything a test case needs from its suite run. Cheap to clone.
pub struct CaseRunner<T, O> {
    suite: Arc<Suite<T, O>>,
    reporter: Arc<Reporter>,
    gates: Arc<EvaluatorGates>,
    flusher: Arc<EventFlusher>,
    flush_timeout: Duration,
}

impl<T, O> Clone for CaseRunner<T, O> {
    fn clone(&self) -> Self {
        Self {
            suite: Arc::clone(&self.suite),
            reporter: Arc::clone(&self.reporter),
            gates: Arc::clone(&self.gates),
            flusher: Arc::clone(&self.flusher),
            flush_timeout: self.flush_timeout,
        }
    }
}

impl<T: TestCase, O: TestOutput> CaseRunner<T, O> {
    pub fn new(
        suite: Arc<Suite<T, O>>,
        reporter: Arc<Reporter>,
        gates: Arc<EvaluatorGates>,
        flusher: Arc<EventFlusher>,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            suite,
            reporter,
            gates,
            flusher,
            flush_timeout,
        }
    }

    pub fn suite(&self) -> &Suite<T, O> {
        &self.suite
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Wait, within the flush timeout, for background emissions to settle.
    pub async fn drain_events(&self) -> bool {
        self.flusher.drain(self.flush_timeout).await
    }

    /// Run the function (with retries), report its result or error, and on
    /// success run every evaluator. The caller holds the test-case permit.
    pub async fn run(
        &self,
        run_id: RunId,
        combo: GridCombo,
        test_case: T,
        test_case_hash: String,
    ) -> CaseOutcome {
        let context = RunContext::new(run_id.clone(), self.suite.id(), test_case_hash.clone())
            .with_grid_combo(combo)
            .with_sink(EventSink::new(
                Arc::clone(self.reporter.backend()),
                Arc::clone(&self.flusher),
            ));
        let span = obs::test_case_span(&run_id.to_string(), &test_case_hash);

        let mut outcome = context
            .clone()
            .scope(self.execute(&run_id, &test_case, &test_case_hash).instrument(span))
            .await;
        outcome.events = context.events();
        outcome
    }

    async fn execute(&self, run_id: &RunId, test_case: &T, test_case_hash: &str) -> CaseOutcome {
        METRICS.inc_test_cases_run();
        let function = self.suite.function();
        let started = Instant::now();
        let (result, attempts) = run_with_retry(self.suite.retry(), || {
            // Closures may panic before handing back their future.
            AssertUnwindSafe(async move { function(test_case.clone()).await })
                .catch_unwind()
                .map(|caught| {
                    caught.unwrap_or_else(|payload| {
                        Err(anyhow::Error::new(Panicked::from_payload(payload.as_ref())))
                    })
                })
        })
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                METRICS.inc_test_cases_failed();
                let detail = error_detail(&err);
                self.reporter
                    .error(Some(run_id), Some(test_case_hash), None, detail.clone())
                    .await;
                obs::emit_test_case_finished(test_case_hash, false, attempts, duration_ms);
                return CaseOutcome {
                    test_case_hash: test_case_hash.to_string(),
                    status: CaseStatus::Failed,
                    attempts,
                    duration_ms,
                    error: Some(detail),
                    evaluations: Vec::new(),
                    events: Vec::new(),
                };
            }
        };

        // Events emitted by the function land before its result.
        self.drain_events().await;

        self.reporter
            .result(
                run_id,
                test_case_hash,
                to_json(test_case, "test case"),
                to_json(&output, "output"),
                duration_ms,
            )
            .await;

        let evaluations = evaluator::run_all(
            test_case,
            &output,
            self.suite.evaluators(),
            &self.gates,
            EvalTarget {
                reporter: &self.reporter,
                run_id,
                test_case_hash,
            },
        )
        .await;

        obs::emit_test_case_finished(test_case_hash, true, attempts, duration_ms);
        CaseOutcome {
            test_case_hash: test_case_hash.to_string(),
            status: CaseStatus::Succeeded,
            attempts,
            duration_ms,
            error: None,
            evaluations,
            events: Vec::new(),
        }
    }
}

fn to_json<V: serde::Serialize>(value: &V, what: &str) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "could not serialize {what}; reporting null");
        serde_json::Value::Null
    })
}
