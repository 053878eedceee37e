//! Reference-counted worker pool.
//!
//! Workers only exist while at least one user holds a request on the pool.
//! Parallel stages request the pool when they are created and release it once
//! all of their tasks have finished, so consecutive stages can share one pool
//! without knowing about each other.

use crate::error::{ProcessingError, Result};
use crate::processing::{Metrics, ProcessingEnv};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A bounded set of worker threads fed through a bounded queue.
#[derive(Clone)]
pub struct ProcessorPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    size: usize,
    queue_capacity: usize,
    name: String,
    metrics: Arc<Metrics>,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    users: usize,
    queue: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    activations: u64,
    teardowns: u64,
}

impl ProcessorPool {
    /// Create an idle pool with `size` workers (0 = configured default).
    pub fn new(env: &ProcessingEnv, size: usize) -> Self {
        let size = if size == 0 {
            env.config().effective_workers()
        } else {
            size
        };
        Self {
            inner: Arc::new(PoolInner {
                size,
                queue_capacity: env.config().queue_capacity.max(1),
                name: format!("{}-worker", env.config().thread_name),
                metrics: env.metrics().clone(),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Number of workers started per activation.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Current number of users.
    pub fn users(&self) -> usize {
        self.inner.state.lock().users
    }

    pub fn is_active(&self) -> bool {
        self.users() > 0
    }

    /// Workers currently alive.
    pub fn active_workers(&self) -> usize {
        self.inner.state.lock().workers.len()
    }

    /// How often the pool went from idle to active.
    pub fn activations(&self) -> u64 {
        self.inner.state.lock().activations
    }

    /// How often the pool was torn down.
    pub fn teardowns(&self) -> u64 {
        self.inner.state.lock().teardowns
    }

    /// Register a user, starting the workers if the pool was idle.
    pub fn request(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.users += 1;
        if state.users > 1 {
            return Ok(());
        }

        let (tx, rx) = crossbeam_channel::bounded::<Job>(self.inner.queue_capacity);
        let mut workers = Vec::with_capacity(self.inner.size);
        let mut last_error = None;
        for i in 0..self.inner.size {
            let rx = rx.clone();
            let name = format!("{}-{}", self.inner.name, i);
            match std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(rx))
            {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    tracing::error!("failed to start pool worker {}: {}", name, source);
                    last_error = Some(ProcessingError::Spawn { name, source });
                }
            }
        }

        if workers.is_empty() {
            state.users -= 1;
            return Err(last_error.unwrap_or(ProcessingError::PoolNotActive));
        }

        tracing::debug!(pool = %self.inner.name, workers = workers.len(), "processor pool started");
        self.inner.metrics.add_pool_activation(workers.len() as u64);
        state.queue = Some(tx);
        state.workers = workers;
        state.activations += 1;
        Ok(())
    }

    /// Drop a user. The last release closes the queue and waits for the
    /// workers to drain it.
    pub fn release(&self) -> Result<()> {
        let workers = {
            let mut state = self.inner.state.lock();
            if state.users == 0 {
                tracing::warn!(pool = %self.inner.name, "release on idle processor pool");
                return Err(ProcessingError::PoolNotRequested);
            }
            state.users -= 1;
            if state.users > 0 {
                return Ok(());
            }
            state.queue = None;
            state.teardowns += 1;
            std::mem::take(&mut state.workers)
        };

        self.inner.metrics.add_pool_teardown();
        let current = std::thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(pool = %self.inner.name, "pool worker terminated abnormally");
            }
        }
        tracing::debug!(pool = %self.inner.name, "processor pool stopped");
        Ok(())
    }

    /// Request the pool for the lifetime of the returned lease.
    pub fn lease(&self) -> Result<PoolLease> {
        self.request()?;
        Ok(PoolLease { pool: self.clone() })
    }

    /// Queue a unit of work. Blocks while the queue is full.
    pub fn exec<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self
            .inner
            .state
            .lock()
            .queue
            .clone()
            .ok_or(ProcessingError::PoolNotActive)?;

        let metrics = self.inner.metrics.clone();
        let job: Job = Box::new(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::error!("pool job panicked: {}", message);
            }
            metrics.add_task_completed();
        });
        queue.send(job).map_err(|_| ProcessingError::PoolNotActive)?;
        self.inner.metrics.add_task_submitted();
        Ok(())
    }
}

impl std::fmt::Debug for ProcessorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorPool")
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("users", &self.users())
            .finish()
    }
}

/// Releases its pool when dropped.
pub struct PoolLease {
    pool: ProcessorPool,
}

impl PoolLease {
    pub fn pool(&self) -> &ProcessorPool {
        &self.pool
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        if let Err(err) = self.pool.release() {
            tracing::warn!("failed to release processor pool: {}", err);
        }
    }
}

fn worker_loop(rx: Receiver<Job>) {
    // jobs are wrapped by `exec` and never unwind
    for job in rx.iter() {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pool(size: usize) -> ProcessorPool {
        ProcessingEnv::default().pool(size)
    }

    #[test]
    fn test_exec_without_request_fails() {
        let pool = pool(2);
        assert!(matches!(pool.exec(|| {}), Err(ProcessingError::PoolNotActive)));
    }

    #[test]
    fn test_release_without_request_fails() {
        let pool = pool(2);
        assert!(matches!(pool.release(), Err(ProcessingError::PoolNotRequested)));
    }

    #[test]
    fn test_request_starts_workers() {
        let pool = pool(3);
        assert_eq!(pool.active_workers(), 0);
        pool.request().unwrap();
        assert_eq!(pool.active_workers(), 3);
        assert!(pool.is_active());
        pool.release().unwrap();
        assert_eq!(pool.active_workers(), 0);
        assert!(!pool.is_active());
    }

    #[test]
    fn test_jobs_run_before_teardown_completes() {
        let pool = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));
        pool.request().unwrap();
        for _ in 0..50 {
            let counter = counter.clone();
            pool.exec(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.release().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_shared_pool_torn_down_once() {
        let pool = pool(2);
        let first = pool.clone();
        let second = pool.clone();

        first.request().unwrap();
        second.request().unwrap();
        assert_eq!(pool.users(), 2);

        first.release().unwrap();
        assert_eq!(pool.active_workers(), 2);
        assert!(pool.exec(|| {}).is_ok());
        assert_eq!(pool.teardowns(), 0);

        second.release().unwrap();
        assert_eq!(pool.active_workers(), 0);
        assert_eq!(pool.activations(), 1);
        assert_eq!(pool.teardowns(), 1);
        assert!(pool.exec(|| {}).is_err());
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let pool = pool(2);
        let lease = pool.lease().unwrap();
        assert!(lease.pool().is_active());
        let second = pool.lease().unwrap();
        drop(lease);
        assert_eq!(pool.active_workers(), 2);
        drop(second);
        assert!(!pool.is_active());
        assert_eq!(pool.teardowns(), 1);
    }

    #[test]
    fn test_pool_can_be_reactivated() {
        let pool = pool(1);
        pool.request().unwrap();
        pool.release().unwrap();
        pool.request().unwrap();
        pool.release().unwrap();
        assert_eq!(pool.activations(), 2);
        assert_eq!(pool.teardowns(), 2);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = pool(1);
        let counter = Arc::new(AtomicUsize::new(0));
        pool.request().unwrap();
        pool.exec(|| panic!("job failure")).unwrap();
        let c = counter.clone();
        pool.exec(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.release().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
