//! Bounded task scheduler for kernel workloads.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Errors produced by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Scheduler is closed and will not accept new tasks.
    #[error("scheduler closed")]
    Closed,
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Spawns kernel tasks while capping how many run at once.
///
/// Inbound capability calls and background workers all go through one
/// scheduler, so a flood of inbound calls is bounded before it can exhaust
/// the runtime.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    permits: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    max_concurrency: NonZeroUsize,
}

impl TaskScheduler {
    /// Creates a scheduler allowing at most `max_concurrency` tasks to run
    /// concurrently.
    #[must_use]
    pub fn new(max_concurrency: NonZeroUsize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.get())),
            closed: Arc::new(AtomicBool::new(false)),
            max_concurrency,
        }
    }

    /// Returns the configured concurrency cap.
    #[must_use]
    pub const fn max_concurrency(&self) -> NonZeroUsize {
        self.max_concurrency
    }

    /// Returns `true` once the scheduler has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the scheduler. Tasks already accepted keep their place in
    /// the permit queue and run to completion; new submissions fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Spawns a future once a concurrency permit is available.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the scheduler was closed
    /// before the task could be enqueued.
    pub fn spawn<F, T>(&self, future: F) -> SchedulerResult<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let permits = Arc::clone(&self.permits);
        Ok(tokio::spawn(async move {
            // The semaphore is never closed, so acquisition cannot fail.
            let _permit = permits
                .acquire_owned()
                .await
                .expect("kernel semaphore closed");
            future.await
        }))
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(32).expect("non-zero"))
    }
}
