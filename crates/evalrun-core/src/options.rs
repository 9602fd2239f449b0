//! Run-time options: flush bound, event flusher, and env-driven filters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::flusher::{EventFlusher, DEFAULT_FLUSH_TIMEOUT};

/// JSON list of substrings; only suites whose id contains one of them run.
pub const FILTERS_TEST_SUITES_ENV: &str = "EVALRUN_FILTERS_TEST_SUITES";
/// JSON map of suite id to the test case hashes to run.
pub const OVERRIDES_TESTS_AND_HASHES_ENV: &str = "EVALRUN_OVERRIDES_TESTS_AND_HASHES";

/// Restricts which suites and test cases run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilters {
    pub suite_substrings: Vec<String>,
    pub hash_overrides: HashMap<String, Vec<String>>,
}

impl RunFilters {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Malformed values are logged
    /// and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            suite_substrings: parse_var(&lookup, FILTERS_TEST_SUITES_ENV).unwrap_or_default(),
            hash_overrides: parse_var(&lookup, OVERRIDES_TESTS_AND_HASHES_ENV).unwrap_or_default(),
        }
    }

    pub fn with_suite_filter(mut self, substring: impl Into<String>) -> Self {
        self.suite_substrings.push(substring.into());
        self
    }

    pub fn with_hash_override<I, S>(mut self, suite_id: impl Into<String>, hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hash_overrides.insert(
            suite_id.into(),
            hashes.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// An empty filter list lets every suite through.
    pub fn includes_suite(&self, suite_id: &str) -> bool {
        self.suite_substrings.is_empty()
            || self
                .suite_substrings
                .iter()
                .any(|s| suite_id.contains(s.as_str()))
    }

    /// Cases of suites without an override all run.
    pub fn includes_case(&self, suite_id: &str, test_case_hash: &str) -> bool {
        match self.hash_overrides.get(suite_id) {
            Some(hashes) => hashes.iter().any(|h| h == test_case_hash),
            None => true,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(variable = %key, error = %e, "ignoring malformed run filter");
            None
        }
    }
}

/// Options for one suite invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on each wait for background emissions to settle.
    pub flush_timeout: Duration,
    pub filters: RunFilters,
    pub flusher: Arc<EventFlusher>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            filters: RunFilters::default(),
            flusher: EventFlusher::global(),
        }
    }
}

impl RunOptions {
    /// Defaults plus filters read from the environment.
    pub fn from_env() -> Self {
        Self {
            filters: RunFilters::from_env(),
            ..Self::default()
        }
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn with_filters(mut self, filters: RunFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Use a private flusher instead of the process-wide one.
    pub fn with_flusher(mut self, flusher: Arc<EventFlusher>) -> Self {
        self.flusher = flusher;
        self
    }
}
