//! Bounded pool for CPU-bound raster work
//!
//! Decoding, resampling and convolution block a thread for a long time, so
//! they run on tokio's blocking pool. A semaphore caps how many run at once
//! so a burst of large images cannot exhaust memory.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::error::{EngineError, EngineResult};

/// Runs raster jobs off the async control path, at most `max_jobs` at a time
#[derive(Debug, Clone)]
pub struct RasterWorkerPool {
    permits: Arc<Semaphore>,
    max_jobs: usize,
}

impl RasterWorkerPool {
    pub fn new(max_jobs: usize) -> Self {
        let max_jobs = max_jobs.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
        }
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }

    /// Jobs that could start right now without waiting
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on the blocking pool once a permit is free
    pub async fn run<F, T>(&self, stage: &'static str, job: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal("Raster worker pool closed".to_string()))?;

        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| {
            error!(stage, error = %e, "Raster job aborted");
            let reason = if e.is_panic() { "worker panicked" } else { "worker cancelled" };
            EngineError::transform(stage, reason)
        })?;

        debug!(
            stage,
            elapsed_ms = start.elapsed().as_millis(),
            ok = result.is_ok(),
            "Raster job finished"
        );

        result
    }
}
