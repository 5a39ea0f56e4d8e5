//! CPU offload for heavy filtering work.
//!
//! Parsing, ranking and projecting large payloads must never run inline on
//! the I/O loop. Work is submitted as self-contained closures to a bounded
//! pool of blocking workers; the bound keeps a burst of drill-in calls from
//! saturating the runtime's blocking threads.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::ProxyError;

/// Bounded offload pool for CPU-heavy work.
pub struct CpuExecutor {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl CpuExecutor {
    /// Sizes the pool as `min(32, cpu_count + 4)`.
    pub fn new() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1);
        let workers = (cpu_count + 4).min(32);

        log::debug!("CPU executor initialized with {workers} workers");

        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Runs a self-contained unit on a worker thread and awaits its result.
    pub async fn run<T, F>(&self, task: F) -> Result<T, ProxyError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProxyError::Internal("CPU executor is shut down".to_string()))?;

        tokio::task::spawn_blocking(task)
            .await
            .map_err(|err| ProxyError::Internal(format!("worker task failed: {err}")))
    }

    /// Number of concurrent workers the pool allows.
    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Default for CpuExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::CpuExecutor;

    #[tokio::test]
    async fn runs_work_and_returns_result() {
        let executor = CpuExecutor::new();
        let result = executor.run(|| 2 + 2).await.unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn pool_size_is_bounded() {
        let executor = CpuExecutor::new();
        assert!(executor.workers() <= 32);
        assert!(executor.workers() >= 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_submissions_all_complete() {
        let executor = Arc::new(CpuExecutor::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let executor = executor.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .run(move || counter.fetch_add(1, Ordering::SeqCst))
                    .await
                    .unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }
}
