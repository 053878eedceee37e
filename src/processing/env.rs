//! Explicit processing environment passed to every constructor.

use crate::config::ProcessingConfig;
use crate::error::{ProcessingError, Result};
use crate::processing::{Metrics, ProcessorPool};
use std::sync::Arc;

/// Configuration and counters shared by all stages of one or more chains.
///
/// Cloning is cheap; clones share the same metrics.
#[derive(Debug, Clone)]
pub struct ProcessingEnv {
    config: Arc<ProcessingConfig>,
    metrics: Arc<Metrics>,
}

impl Default for ProcessingEnv {
    fn default() -> Self {
        Self::new(ProcessingConfig::default())
    }
}

impl ProcessingEnv {
    pub fn new(config: ProcessingConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Metrics::new(),
        }
    }

    /// Environment with the given default worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self::new(ProcessingConfig {
            workers,
            ..ProcessingConfig::default()
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// A new pool with `workers` threads (0 = configured default).
    pub fn pool(&self, workers: usize) -> ProcessorPool {
        ProcessorPool::new(self, workers)
    }

    /// Run `f` on a detached, named thread.
    pub(crate) fn spawn<F>(&self, role: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("{}-{}", self.config.thread_name, role);
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .map(|_| ())
            .map_err(|source| ProcessingError::Spawn { name, source })
    }
}
