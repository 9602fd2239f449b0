//! Retry policy for user test functions.
//!
//! Only the user function is retried, only for errors the policy classifies
//! as transient, and at most `retry_count` extra times, one attempt after
//! another.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Marker error: wrap a failure in this to have the default classifier
/// retry it.
#[derive(Debug, thiserror::Error)]
#[error("transient: {0}")]
pub struct Transient(pub String);

impl Transient {
    pub fn new(message: impl Into<String>) -> Self {
        Transient(message.into())
    }
}

/// Decides whether an error is worth another attempt.
pub type Classifier = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Default transient classifier.
///
/// Looks through the whole cause chain for a [`Transient`] marker, an
/// elapsed tokio timeout, or an I/O error of a timeout or connection kind.
pub fn is_transient_default(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if cause.is::<Transient>() || cause.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        cause.downcast_ref::<io::Error>().is_some_and(|e| {
            matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::Interrupted
            )
        })
    })
}

#[derive(Clone)]
pub struct RetryPolicy {
    retry_count: u32,
    backoff: Option<Duration>,
    classifier: Classifier,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retry_count", &self.retry_count)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Allow up to `retry_count` extra attempts with the default classifier.
    pub fn new(retry_count: u32) -> Self {
        Self {
            retry_count,
            backoff: None,
            classifier: Arc::new(is_transient_default),
        }
    }

    /// Fixed delay between attempts.
    pub fn with_backoff(mut self, delay: Duration) -> Self {
        self.backoff = Some(delay);
        self
    }

    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn backoff(&self) -> Option<Duration> {
        self.backoff
    }

    pub fn is_transient(&self, err: &anyhow::Error) -> bool {
        (self.classifier)(err)
    }
}

/// Run `attempt` until it succeeds, fails non-transiently, or the policy's
/// retries are spent. Returns the last result and the number of attempts.
pub async fn run_with_retry<F, Fut, O>(
    policy: Option<&RetryPolicy>,
    mut attempt: F,
) -> (anyhow::Result<O>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<O>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let result = attempt().await;
        let err = match result {
            Ok(output) => return (Ok(output), attempts),
            Err(err) => err,
        };

        let Some(policy) = policy else {
            return (Err(err), attempts);
        };
        if attempts > policy.retry_count || !policy.is_transient(&err) {
            return (Err(err), attempts);
        }

        crate::metrics::METRICS.inc_retries();
        crate::obs::emit_test_case_retry(attempts, &err);
        if let Some(delay) = policy.backoff {
            tokio::time::sleep(delay).await;
        }
    }
}
