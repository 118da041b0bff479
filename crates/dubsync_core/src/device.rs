//! Compute device resolution.
//!
//! A [`Device`] is resolved once at startup and injected into the analyzer.
//! It sizes the rayon pool used for per-chunk work.

use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisError, AnalysisResult};

/// CPU worker budget for chunk analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    threads: usize,
}

impl Device {
    /// Resolve from a configured thread count; 0 means one per core.
    pub fn resolve(threads: usize) -> Self {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };
        tracing::debug!("Resolved device: {} worker threads", threads);
        Self { threads }
    }

    /// Single worker, for deterministic tests and tiny inputs.
    pub fn single_threaded() -> Self {
        Self { threads: 1 }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Build a bounded rayon pool for this device.
    pub fn thread_pool(&self) -> AnalysisResult<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("dubsync-chunk-{}", i))
            .build()
            .map_err(|e| AnalysisError::ThreadPool(e.to_string()))
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::resolve(0)
    }
}
