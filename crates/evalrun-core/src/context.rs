//! Ambient per-test-case run context.
//!
//! The context is bound to the logical task with `tokio::task_local!`, so it
//! stays current across every `.await` inside the test case (including code
//! deep inside the user function) and is never visible to concurrently
//! running test cases. Work handed to `tokio::spawn` starts without a
//! context; use [`RunContext::spawn_in_current`] to carry it over.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use evalrun_reporting::{EventReport, ReportingBackend, RunId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::flusher::EventFlusher;
use crate::grid::GridCombo;

tokio::task_local! {
    static RUN_CONTEXT: RunContext;
}

/// A telemetry event captured while a test case was running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub message: String,
    pub properties: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Where events emitted under a context are posted.
#[derive(Clone)]
pub struct EventSink {
    backend: Arc<dyn ReportingBackend>,
    flusher: Arc<EventFlusher>,
}

impl EventSink {
    pub fn new(backend: Arc<dyn ReportingBackend>, flusher: Arc<EventFlusher>) -> Self {
        Self { backend, flusher }
    }
}

/// Identity of the running test case plus its event accumulator.
///
/// Clones share the accumulator.
#[derive(Clone)]
pub struct RunContext {
    run_id: RunId,
    test_id: String,
    test_case_hash: String,
    grid_combo: GridCombo,
    events: Arc<Mutex<Vec<RecordedEvent>>>,
    sink: Option<EventSink>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("test_id", &self.test_id)
            .field("test_case_hash", &self.test_case_hash)
            .field("grid_combo", &self.grid_combo)
            .finish()
    }
}

impl RunContext {
    pub fn new(run_id: RunId, test_id: impl Into<String>, test_case_hash: impl Into<String>) -> Self {
        Self {
            run_id,
            test_id: test_id.into(),
            test_case_hash: test_case_hash.into(),
            grid_combo: GridCombo::default(),
            events: Arc::new(Mutex::new(Vec::new())),
            sink: None,
        }
    }

    /// Post emitted events through `sink` in addition to recording them.
    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_grid_combo(mut self, combo: GridCombo) -> Self {
        self.grid_combo = combo;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn test_case_hash(&self) -> &str {
        &self.test_case_hash
    }

    /// Grid parameters of the run group this test case belongs to.
    pub fn grid_combo(&self) -> &GridCombo {
        &self.grid_combo
    }

    /// Value of one grid parameter for the current run group.
    pub fn grid_param(&self, name: &str) -> Option<&str> {
        self.grid_combo.get(name)
    }

    /// Events recorded so far, in emission order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The context of the enclosing test case, if any.
    pub fn current() -> Option<RunContext> {
        RUN_CONTEXT.try_with(Clone::clone).ok()
    }

    /// Run `fut` with this context as the current one.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        RUN_CONTEXT.scope(self, fut).await
    }

    /// Spawn `fut` so that it runs under the current context, if any.
    pub fn spawn_in_current<F>(fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match Self::current() {
            Some(ctx) => tokio::spawn(ctx.scope(fut)),
            None => tokio::spawn(fut),
        }
    }

    fn record(&self, message: String, properties: serde_json::Value) {
        let event = RecordedEvent {
            message,
            properties,
            timestamp: Utc::now(),
        };

        if let Some(sink) = &self.sink {
            let report = EventReport {
                test_external_id: self.test_id.clone(),
                run_id: self.run_id.clone(),
                test_case_hash: self.test_case_hash.clone(),
                message: event.message.clone(),
                properties: event.properties.clone(),
                timestamp: event.timestamp,
            };
            let backend = Arc::clone(&sink.backend);
            sink.flusher.spawn(async move {
                if let Err(e) = backend.event(report).await {
                    crate::obs::emit_report_dropped("events", &e);
                }
            });
        }

        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Emit a telemetry event attributed to the current test case.
///
/// Returns `false` (and drops the event) when called outside a test case.
pub fn emit_event(message: impl Into<String>, properties: serde_json::Value) -> bool {
    match RunContext::current() {
        Some(ctx) => {
            ctx.record(message.into(), properties);
            true
        }
        None => {
            debug!("event emitted outside a test case; dropping");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalrun_reporting::MemoryBackend;
    use serde_json::json;
    use std::time::Duration;

    fn ctx(hash: &str) -> RunContext {
        RunContext::new(RunId("run-1".to_string()), "suite", hash)
    }

    #[tokio::test]
    async fn test_no_context_outside_scope() {
        assert!(RunContext::current().is_none());
        assert!(!emit_event("orphan", json!({})));
    }

    #[tokio::test]
    async fn test_context_survives_suspension() {
        let seen = ctx("h1")
            .scope(async {
                tokio::task::yield_now().await;
                tokio::time::sleep(Duration::from_millis(1)).await;
                RunContext::current().map(|c| c.test_case_hash().to_string())
            })
            .await;
        assert_eq!(seen.as_deref(), Some("h1"));
        assert!(RunContext::current().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_scopes_are_isolated() {
        let mut tasks = Vec::new();
        for i in 0..8 {
            let hash = format!("h{i}");
            tasks.push(tokio::spawn(ctx(&hash).scope(async move {
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                    let current = RunContext::current().unwrap();
                    assert_eq!(current.test_case_hash(), hash);
                }
                emit_event("done", json!({ "i": i }));
                RunContext::current().unwrap().events().len()
            })));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_spawn_in_current_propagates() {
        let inner = ctx("parent")
            .scope(async {
                RunContext::spawn_in_current(async {
                    RunContext::current().map(|c| c.test_case_hash().to_string())
                })
                .await
                .unwrap()
            })
            .await;
        assert_eq!(inner.as_deref(), Some("parent"));
    }

    #[tokio::test]
    async fn test_grid_param_lookup() {
        let combo = crate::grid::expand(&crate::grid::GridParams::new().param("model", ["m1"]))
            .remove(0);
        let model = ctx("h1")
            .with_grid_combo(combo)
            .scope(async {
                RunContext::current().and_then(|c| c.grid_param("model").map(str::to_string))
            })
            .await;
        assert_eq!(model.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_emit_event_posts_through_sink() {
        let backend = Arc::new(MemoryBackend::new());
        let run_id = backend
            .start(evalrun_reporting::StartRequest {
                test_external_id: "suite".to_string(),
                grid_search_run_group_id: None,
                grid_search_params_combo: None,
            })
            .await
            .unwrap();
        let flusher = EventFlusher::new();
        let sink = EventSink::new(backend.clone(), Arc::clone(&flusher));
        let context = RunContext::new(run_id, "suite", "h1").with_sink(sink);

        let events = context
            .clone()
            .scope(async {
                emit_event("llm.request", json!({"model": "m1"}));
                emit_event("llm.response", json!({"tokens": 12}));
                RunContext::current().unwrap().events()
            })
            .await;

        assert_eq!(events.len(), 2);
        assert!(flusher.drain(Duration::from_secs(1)).await);
        let posted = backend.events();
        assert_eq!(posted.len(), 2);
        assert!(posted.iter().all(|e| e.test_case_hash == "h1"));
    }
}
