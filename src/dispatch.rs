use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{OdbcStatementError, Result};

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Runs blocking units of work on dedicated threads and hands their outcome back to the awaiting
/// task through a one-shot channel.
///
/// One OS thread per dispatched unit, no pooling. A unit that is dispatched runs to completion;
/// dropping the returned future only discards the outcome.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    thread_prefix: Arc<str>,
    id: u64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(thread_prefix: &str) -> Self {
        Self {
            thread_prefix: Arc::from(thread_prefix),
            id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Run `work` off the calling thread and wait for its outcome.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::WorkerError`] if the thread cannot be spawned or exits
    /// without reporting (e.g. the work panicked).
    pub async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (respond_to, outcome) = oneshot::channel();
        thread::Builder::new()
            .name(format!("{}-{}-{operation}", self.thread_prefix, self.id))
            .spawn(move || {
                trace!(operation, "worker started");
                // The receiver is gone only if the caller stopped waiting.
                let _ = respond_to.send(work());
            })
            .map_err(|err| {
                OdbcStatementError::WorkerError(format!(
                    "failed to spawn worker thread for {operation}: {err}"
                ))
            })?;

        outcome.await.map_err(|_| {
            OdbcStatementError::WorkerError(format!("worker dropped while running {operation}"))
        })
    }
}
