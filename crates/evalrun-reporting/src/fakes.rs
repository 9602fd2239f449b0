//! In-memory fake reporting backend (testing only)
//!
//! `MemoryBackend` keeps an ordered log of every accepted call and enforces
//! the run state machine (calls against an ended run are rejected), so tests
//! can assert both the content and the order of reports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::*;
use crate::error::{ReportError, ReportResult};

/// One accepted backend call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Start { request: StartRequest, run_id: RunId },
    Result(ResultReport),
    Eval(EvalReport),
    Error(ErrorReport),
    End(EndRequest),
    Event(EventReport),
    HumanReviewJob(HumanReviewJobRequest),
}

impl RecordedCall {
    /// Compact label used in ordering assertions, e.g. `eval:<hash>:<evaluator>`.
    pub fn label(&self) -> String {
        match self {
            RecordedCall::Start { .. } => "start".to_string(),
            RecordedCall::Result(r) => format!("result:{}", r.test_case_hash),
            RecordedCall::Eval(e) => {
                format!("eval:{}:{}", e.test_case_hash, e.evaluator_external_id)
            }
            RecordedCall::Error(e) => format!(
                "error:{}:{}",
                e.test_case_hash.as_deref().unwrap_or("-"),
                e.evaluator_external_id.as_deref().unwrap_or("-")
            ),
            RecordedCall::End(_) => "end".to_string(),
            RecordedCall::Event(e) => format!("event:{}", e.test_case_hash),
            RecordedCall::HumanReviewJob(_) => "human_review_job".to_string(),
        }
    }
}

#[derive(Debug)]
struct RunState {
    ended: bool,
}

/// In-memory reporting backend backed by an ordered call log.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    calls: Mutex<Vec<RecordedCall>>,
    runs: Mutex<HashMap<String, RunState>>,
    fail_start: AtomicBool,
    fail_posts: AtomicBool,
    event_delay: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `start` fail.
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent call other than `start` fail.
    pub fn fail_all_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    /// Delay acceptance of `event` calls, simulating a slow endpoint.
    pub fn with_event_delay(self, delay: Duration) -> Self {
        *self.event_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Labels of every call, in order.
    pub fn labels(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::label).collect()
    }

    /// Labels excluding telemetry events.
    pub fn lifecycle_labels(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|c| !matches!(c, RecordedCall::Event(_)))
            .map(RecordedCall::label)
            .collect()
    }

    pub fn starts(&self) -> Vec<(StartRequest, RunId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Start { request, run_id } => Some((request, run_id)),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<ResultReport> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Result(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn evals(&self) -> Vec<EvalReport> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Eval(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Error(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<EventReport> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn ends(&self) -> Vec<EndRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::End(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn review_jobs(&self) -> Vec<HumanReviewJobRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::HumanReviewJob(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// Whether `end` has been accepted for the run.
    pub fn is_ended(&self, run_id: &RunId) -> bool {
        self.runs
            .lock()
            .unwrap()
            .get(&run_id.0)
            .map(|s| s.ended)
            .unwrap_or(false)
    }

    fn check_posts_enabled(&self, endpoint: &str) -> ReportResult<()> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(ReportError::Injected(format!("{endpoint} disabled")));
        }
        Ok(())
    }

    fn check_active(&self, run_id: &RunId) -> ReportResult<()> {
        let runs = self.runs.lock().unwrap();
        let state = runs.get(&run_id.0).ok_or_else(|| ReportError::RunNotFound {
            run_id: run_id.0.clone(),
        })?;
        if state.ended {
            return Err(ReportError::RunEnded {
                run_id: run_id.0.clone(),
            });
        }
        Ok(())
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ReportingBackend for MemoryBackend {
    async fn start(&self, request: StartRequest) -> ReportResult<RunId> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ReportError::Injected("start disabled".to_string()));
        }
        let run_id = RunId::new();
        self.runs
            .lock()
            .unwrap()
            .insert(run_id.0.clone(), RunState { ended: false });
        self.record(RecordedCall::Start {
            request,
            run_id: run_id.clone(),
        });
        Ok(run_id)
    }

    async fn result(&self, report: ResultReport) -> ReportResult<ResultId> {
        self.check_posts_enabled("results")?;
        self.check_active(&report.run_id)?;
        let id = ResultId(uuid::Uuid::new_v4().to_string());
        self.record(RecordedCall::Result(report));
        Ok(id)
    }

    async fn eval(&self, report: EvalReport) -> ReportResult<()> {
        self.check_posts_enabled("evals")?;
        self.check_active(&report.run_id)?;
        self.record(RecordedCall::Eval(report));
        Ok(())
    }

    async fn error(&self, report: ErrorReport) -> ReportResult<()> {
        self.check_posts_enabled("errors")?;
        if let Some(run_id) = &report.run_id {
            self.check_active(run_id)?;
        }
        self.record(RecordedCall::Error(report));
        Ok(())
    }

    async fn end(&self, request: EndRequest) -> ReportResult<()> {
        self.check_posts_enabled("end")?;
        {
            let mut runs = self.runs.lock().unwrap();
            let state = runs
                .get_mut(&request.run_id.0)
                .ok_or_else(|| ReportError::RunNotFound {
                    run_id: request.run_id.0.clone(),
                })?;
            if state.ended {
                return Err(ReportError::RunEnded {
                    run_id: request.run_id.0.clone(),
                });
            }
            state.ended = true;
        }
        self.record(RecordedCall::End(request));
        Ok(())
    }

    async fn event(&self, report: EventReport) -> ReportResult<()> {
        let delay = *self.event_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_posts_enabled("events")?;
        self.check_active(&report.run_id)?;
        self.record(RecordedCall::Event(report));
        Ok(())
    }

    async fn human_review_job(&self, request: HumanReviewJobRequest) -> ReportResult<()> {
        self.check_posts_enabled("human-review-job")?;
        self.record(RecordedCall::HumanReviewJob(request));
        Ok(())
    }
}
