//! Suite definition and pre-dispatch validation.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::evaluator::Evaluator;
use crate::gate::DEFAULT_MAX_CONCURRENCY;
use crate::grid::GridParams;
use crate::identity::{self, IdentityStrategy};
use crate::retry::RetryPolicy;

/// Bounds every test case type must satisfy.
pub trait TestCase: Serialize + Clone + Send + Sync + 'static {}
impl<T: Serialize + Clone + Send + Sync + 'static> TestCase for T {}

/// Bounds every test function output must satisfy.
pub trait TestOutput: Serialize + Send + Sync + 'static {}
impl<O: Serialize + Send + Sync + 'static> TestOutput for O {}

/// The function under test, type-erased.
pub type TestFn<T, O> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<O>> + Send + Sync>;

/// Human review job opened for each run group once it has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanReviewJob {
    pub name: String,
    pub assignee_email_addresses: Vec<String>,
}

impl HumanReviewJob {
    pub fn new<I, S>(name: impl Into<String>, assignees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            assignee_email_addresses: assignees.into_iter().map(Into::into).collect(),
        }
    }
}

/// A test suite: cases, the function under test, and its evaluators.
///
/// Built once with the `with_*` / `add_*` methods, then handed to
/// [`crate::orchestrator::run_suite`], which never mutates it.
pub struct Suite<T, O> {
    id: String,
    test_cases: Vec<T>,
    identity: IdentityStrategy<T>,
    evaluators: Vec<Arc<dyn Evaluator<T, O>>>,
    function: TestFn<T, O>,
    max_test_case_concurrency: usize,
    grid: Option<GridParams>,
    retry: Option<RetryPolicy>,
    human_review: Option<HumanReviewJob>,
}

impl<T, O> fmt::Debug for Suite<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let evaluator_ids: Vec<&str> = self.evaluators.iter().map(|e| e.id()).collect();
        f.debug_struct("Suite")
            .field("id", &self.id)
            .field("test_cases", &self.test_cases.len())
            .field("identity", &self.identity)
            .field("evaluators", &evaluator_ids)
            .field("max_test_case_concurrency", &self.max_test_case_concurrency)
            .field("grid", &self.grid)
            .field("retry", &self.retry)
            .field("human_review", &self.human_review)
            .finish()
    }
}

impl<T: TestCase, O: TestOutput> Suite<T, O> {
    pub fn new<F, Fut>(id: impl Into<String>, identity: IdentityStrategy<T>, function: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let function: TestFn<T, O> = Arc::new(move |test_case| function(test_case).boxed());
        Self {
            id: id.into(),
            test_cases: Vec::new(),
            identity,
            evaluators: Vec::new(),
            function,
            max_test_case_concurrency: DEFAULT_MAX_CONCURRENCY,
            grid: None,
            retry: None,
            human_review: None,
        }
    }

    pub fn with_test_cases(mut self, test_cases: impl IntoIterator<Item = T>) -> Self {
        self.test_cases.extend(test_cases);
        self
    }

    pub fn add_test_case(mut self, test_case: T) -> Self {
        self.test_cases.push(test_case);
        self
    }

    pub fn add_evaluator<E>(mut self, evaluator: E) -> Self
    where
        E: Evaluator<T, O> + 'static,
    {
        self.evaluators.push(Arc::new(evaluator));
        self
    }

    pub fn add_shared_evaluator(mut self, evaluator: Arc<dyn Evaluator<T, O>>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn with_max_test_case_concurrency(mut self, max: usize) -> Self {
        self.max_test_case_concurrency = max;
        self
    }

    pub fn with_grid(mut self, grid: GridParams) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_human_review(mut self, job: HumanReviewJob) -> Self {
        self.human_review = Some(job);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn test_cases(&self) -> &[T] {
        &self.test_cases
    }

    pub fn identity(&self) -> &IdentityStrategy<T> {
        &self.identity
    }

    pub fn evaluators(&self) -> &[Arc<dyn Evaluator<T, O>>] {
        &self.evaluators
    }

    pub fn function(&self) -> &TestFn<T, O> {
        &self.function
    }

    pub fn max_test_case_concurrency(&self) -> usize {
        self.max_test_case_concurrency
    }

    pub fn grid(&self) -> Option<&GridParams> {
        self.grid.as_ref()
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn human_review(&self) -> Option<&HumanReviewJob> {
        self.human_review.as_ref()
    }

    /// Check everything that must hold before any work is dispatched.
    ///
    /// Returns the test case hashes, in case order.
    pub fn validate(&self) -> EngineResult<Vec<String>> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Validation("suite id must not be empty".to_string()));
        }
        if self.test_cases.is_empty() {
            return Err(EngineError::Validation(format!(
                "suite {} has no test cases",
                self.id
            )));
        }
        if self.max_test_case_concurrency == 0 {
            return Err(EngineError::InvalidConcurrency(0));
        }

        let mut evaluator_ids = HashSet::new();
        for evaluator in &self.evaluators {
            let id = evaluator.id();
            if id.trim().is_empty() {
                return Err(EngineError::Validation(
                    "evaluator id must not be empty".to_string(),
                ));
            }
            if !evaluator_ids.insert(id) {
                return Err(EngineError::Validation(format!(
                    "evaluator {id} is registered more than once"
                )));
            }
            if evaluator.max_concurrency() == 0 {
                return Err(EngineError::Validation(format!(
                    "evaluator {id} has max concurrency 0; must be at least 1"
                )));
            }
        }

        if let Some(grid) = &self.grid {
            grid.validate()?;
        }

        identity::hash_all(&self.test_cases, &self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{Evaluation, FnEvaluator};
    use serde_json::{json, Value};

    fn echo_suite() -> Suite<Value, Value> {
        Suite::new("echo", IdentityStrategy::fields(["input"]), |tc: Value| async move {
            Ok(tc["input"].clone())
        })
    }

    fn constant(id: &str) -> FnEvaluator<impl Fn(&Value, &Value) -> anyhow::Result<Evaluation>> {
        FnEvaluator::new(id, |_: &Value, _: &Value| -> anyhow::Result<Evaluation> {
            Ok(Evaluation::new(1.0))
        })
    }

    #[test]
    fn test_valid_suite_returns_hashes() {
        let suite = echo_suite()
            .add_test_case(json!({"input": "a"}))
            .add_test_case(json!({"input": "b"}))
            .add_evaluator(constant("e1"));
        let hashes = suite.validate().unwrap();
        assert_eq!(hashes.len(), 2);
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn test_empty_suite_is_invalid() {
        assert!(matches!(echo_suite().validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_duplicate_hashes_are_invalid() {
        let suite = echo_suite().with_test_cases(vec![
            json!({"input": "same", "expected": 1}),
            json!({"input": "same", "expected": 2}),
        ]);
        let err = suite.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate test case hash"));
    }

    #[test]
    fn test_duplicate_evaluator_ids_are_invalid() {
        let suite = echo_suite()
            .add_test_case(json!({"input": "a"}))
            .add_evaluator(constant("e1"))
            .add_evaluator(constant("e1"));
        assert!(suite.validate().unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let suite = echo_suite()
            .add_test_case(json!({"input": "a"}))
            .with_max_test_case_concurrency(0);
        assert!(matches!(suite.validate(), Err(EngineError::InvalidConcurrency(0))));

        let suite = echo_suite()
            .add_test_case(json!({"input": "a"}))
            .add_evaluator(constant("e1").with_max_concurrency(0));
        assert!(suite.validate().is_err());
    }

    #[test]
    fn test_malformed_grid_is_invalid() {
        let suite = echo_suite()
            .add_test_case(json!({"input": "a"}))
            .with_grid(GridParams::new().param("model", Vec::<String>::new()));
        assert!(suite.validate().is_err());
    }
}
