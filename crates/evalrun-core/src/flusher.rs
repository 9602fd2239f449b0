//! Outstanding fire-and-forget emissions and a bounded drain.
//!
//! Every background report (e.g. a telemetry event posted from inside a
//! user function) holds a [`TaskTicket`] for as long as it is in flight.
//! [`EventFlusher::drain`] waits until no tickets remain or a timeout
//! elapses. Completion is signalled, not polled.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Default bound for [`EventFlusher::drain`].
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

static GLOBAL: OnceLock<Arc<EventFlusher>> = OnceLock::new();

/// Tracks outstanding background tasks.
#[derive(Debug, Default)]
pub struct EventFlusher {
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Membership of one task in the outstanding set; removed on drop.
#[derive(Debug)]
pub struct TaskTicket {
    flusher: Arc<EventFlusher>,
}

impl Drop for TaskTicket {
    fn drop(&mut self) {
        if self.flusher.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.flusher.idle.notify_waiters();
        }
    }
}

impl EventFlusher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide flusher.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(EventFlusher::new))
    }

    /// Add a task to the outstanding set.
    pub fn track(self: &Arc<Self>) -> TaskTicket {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        TaskTicket {
            flusher: Arc::clone(self),
        }
    }

    /// Remove a task from the outstanding set.
    pub fn untrack(&self, ticket: TaskTicket) {
        drop(ticket);
    }

    /// Spawn `fut` as a tracked background task.
    pub fn spawn<F>(self: &Arc<Self>, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.track();
        tokio::spawn(async move {
            let _ticket = ticket;
            fut.await;
        })
    }

    /// Number of tasks still in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until every tracked task has finished, or `timeout` elapses.
    ///
    /// Returns `true` when drained. A timeout is logged, not raised.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let settled = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.outstanding() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, settled).await {
            Ok(()) => true,
            Err(_) => {
                crate::obs::emit_flush_timeout(self.outstanding(), timeout);
                false
            }
        }
    }
}
