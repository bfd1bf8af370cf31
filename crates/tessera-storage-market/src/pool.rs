//! Bounded pool for CPU-bound work (archive builds, commitments, proofs).

use crate::error::{Result, StorageMarketError};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs closures on tokio's blocking threads, at most `size` at a time, so
/// bursts of heavy work cannot starve the async tasks polling the network.
#[derive(Debug, Clone)]
pub struct ComputePool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl ComputePool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// One slot per available core
    pub fn with_available_cores() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StorageMarketError::Cancelled)?;

        // The permit travels with the job so it is released when the work
        // finishes, even if the caller stops waiting.
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| StorageMarketError::Other(format!("compute task failed: {}", e)))
    }
}

impl Default for ComputePool {
    fn default() -> Self {
        Self::with_available_cores()
    }
}
