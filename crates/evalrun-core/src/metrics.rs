//! Process-wide execution counters.
//!
//! Counters are bumped silently where the work happens; the orchestrator
//! calls [`Metrics::flush`] once per suite to log a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    test_cases_run: AtomicU64,
    test_cases_failed: AtomicU64,
    evaluations: AtomicU64,
    evaluator_failures: AtomicU64,
    retries: AtomicU64,
    reports_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub test_cases_run: u64,
    pub test_cases_failed: u64,
    pub evaluations: u64,
    pub evaluator_failures: u64,
    pub retries: u64,
    pub reports_dropped: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            test_cases_run: AtomicU64::new(0),
            test_cases_failed: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
            evaluator_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            reports_dropped: AtomicU64::new(0),
        }
    }

    pub fn inc_test_cases_run(&self) {
        self.test_cases_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_test_cases_failed(&self) {
        self.test_cases_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_evaluator_failures(&self) {
        self.evaluator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    pub fn inc_reports_dropped(&self) {
        self.reports_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reports_dropped", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            test_cases_run: self.test_cases_run.load(Ordering::Relaxed),
            test_cases_failed: self.test_cases_failed.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            evaluator_failures: self.evaluator_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            test_cases_run = s.test_cases_run,
            test_cases_failed = s.test_cases_failed,
            evaluations = s.evaluations,
            evaluator_failures = s.evaluator_failures,
            retries = s.retries,
            reports_dropped = s.reports_dropped,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.test_cases_run.store(0, Ordering::Relaxed);
        self.test_cases_failed.store(0, Ordering::Relaxed);
        self.evaluations.store(0, Ordering::Relaxed);
        self.evaluator_failures.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.reports_dropped.store(0, Ordering::Relaxed);
    }
}
