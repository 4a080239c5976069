//! Shared worker pool for CPU-bound encode jobs.
//!
//! Jobs run on Tokio's blocking thread pool; a fair semaphore caps how
//! many run at once, so a burst from one scheduler cannot starve the
//! others and admission order follows submission order.
//!
//! One pool per process is the norm: [`EncodePool::shared`] lazily
//! builds it on first use, sized to the available CPUs, and it lives for
//! the rest of the process. Schedulers receive it explicitly, which lets
//! tests hand in a small private pool instead.

use std::sync::{Arc, OnceLock};
use std::thread;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RcaError;

/// Handle to a submitted job. Await it to get the job's result.
pub type JobHandle<T> = JoinHandle<Result<T, RcaError>>;

static SHARED: OnceLock<Arc<EncodePool>> = OnceLock::new();

/// Bounded-parallelism pool for pure, CPU-bound jobs.
#[derive(Debug)]
pub struct EncodePool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl EncodePool {
    /// Create a private pool running at most `workers` jobs at once
    /// (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// The process-wide pool, built on first call.
    pub fn shared() -> Arc<EncodePool> {
        Arc::clone(SHARED.get_or_init(|| {
            let workers = thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            debug!(workers, "initialising shared encode pool");
            Arc::new(EncodePool::new(workers))
        }))
    }

    /// Maximum concurrent jobs.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs that could start right now without waiting.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Submit a job. Must be called from within a Tokio runtime.
    ///
    /// The job starts as soon as a worker is free; the returned handle
    /// resolves with its result.
    pub fn submit<F, T>(&self, job: F) -> JobHandle<T>
    where
        F: FnOnce() -> Result<T, RcaError> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| RcaError::Worker("encode pool closed".into()))?;
            tokio::task::spawn_blocking(job).await?
        })
    }
}

impl Default for EncodePool {
    fn default() -> Self {
        Self::new(thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}
