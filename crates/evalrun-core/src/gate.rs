//! Bounded concurrency gate.
//!
//! A counting admission gate over tokio's fair [`Semaphore`]: at most
//! `max_concurrent` tasks run inside the gate at once, waiters are admitted
//! in FIFO order, and a slot is released on every exit path because the
//! permit is held by an RAII guard (error returns and panics included).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{EngineError, EngineResult};

/// Default limit for test cases and evaluators.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Counting admission gate. Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

/// An admitted slot; the slot frees when this is dropped.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl Gate {
    /// Create a gate admitting at most `max_concurrent` tasks.
    pub fn new(max_concurrent: usize) -> EngineResult<Self> {
        if max_concurrent == 0 {
            return Err(EngineError::InvalidConcurrency(max_concurrent));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks currently inside the gate.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Wait for a slot. Callers are admitted in the order they started waiting.
    pub async fn acquire(&self) -> GatePermit {
        // The semaphore is never closed, so acquisition only fails if that
        // invariant is broken; in that case run ungated rather than hang.
        GatePermit {
            _permit: Arc::clone(&self.permits).acquire_owned().await.ok(),
        }
    }

    /// Run `task` inside the gate.
    pub async fn run<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        task().await
    }
}

/// Per-suite registry of evaluator gates, keyed by evaluator id.
///
/// Every test case and every RunGroup of one suite invocation shares the
/// same gate for a given evaluator; the registry is dropped with the run.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorGates {
    gates: HashMap<String, Gate>,
}

impl EvaluatorGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gate for `evaluator_id`. Re-registering keeps the first gate.
    pub fn register(&mut self, evaluator_id: &str, max_concurrent: usize) -> EngineResult<()> {
        if !self.gates.contains_key(evaluator_id) {
            self.gates
                .insert(evaluator_id.to_string(), Gate::new(max_concurrent)?);
        }
        Ok(())
    }

    pub fn get(&self, evaluator_id: &str) -> Option<&Gate> {
        self.gates.get(evaluator_id)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
