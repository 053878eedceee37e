//! Engine counters and periodic reporting.

use crossbeam_channel::{select, tick, Receiver, Sender};
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters shared by every stage created from one environment.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Units of work handed to a processor pool
    pub tasks_submitted: AtomicU64,

    /// Units of work that finished (successfully or not)
    pub tasks_completed: AtomicU64,

    /// Entries carrying a value appended to any buffer
    pub values_added: AtomicU64,

    /// Placeholder entries (filtered elements, explode declarations)
    pub placeholders_added: AtomicU64,

    /// Failure entries produced by a stage
    pub failures: AtomicU64,

    /// Children emitted by explode stages
    pub children_exploded: AtomicU64,

    /// Stages instantiated
    pub stages_created: AtomicU64,

    /// Pool activations (usage counter went 0 → 1)
    pub pool_activations: AtomicU64,

    /// Pool teardowns (usage counter went 1 → 0)
    pub pool_teardowns: AtomicU64,

    /// Worker threads started
    pub workers_spawned: AtomicU64,

    /// Buffers closed
    pub buffers_closed: AtomicU64,

    /// Buffers closed while an ordering gap was still open
    pub forced_closes: AtomicU64,

    start_time: Option<Instant>,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_value(&self) {
        self.values_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_placeholder(&self) {
        self.placeholders_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure entry.
    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_children(&self, count: u64) {
        self.children_exploded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_stage(&self) {
        self.stages_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_pool_activation(&self, workers: u64) {
        self.pool_activations.fetch_add(1, Ordering::Relaxed);
        self.workers_spawned.fetch_add(workers, Ordering::Relaxed);
    }

    pub fn add_pool_teardown(&self) {
        self.pool_teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_buffer_closed(&self, forced: bool) {
        self.buffers_closed.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.forced_closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Completed tasks per second.
    pub fn tasks_per_second(&self) -> f64 {
        let tasks = self.tasks_completed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            tasks as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            values_added: self.values_added.load(Ordering::Relaxed),
            placeholders_added: self.placeholders_added.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            children_exploded: self.children_exploded.load(Ordering::Relaxed),
            stages_created: self.stages_created.load(Ordering::Relaxed),
            pool_activations: self.pool_activations.load(Ordering::Relaxed),
            pool_teardowns: self.pool_teardowns.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            buffers_closed: self.buffers_closed.load(Ordering::Relaxed),
            forced_closes: self.forced_closes.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            tasks_per_second: self.tasks_per_second(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub values_added: u64,
    pub placeholders_added: u64,
    pub failures: u64,
    pub children_exploded: u64,
    pub stages_created: u64,
    pub pool_activations: u64,
    pub pool_teardowns: u64,
    pub workers_spawned: u64,
    pub buffers_closed: u64,
    pub forced_closes: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub tasks_per_second: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    /// Tasks submitted but not yet finished.
    pub fn tasks_in_flight(&self) -> u64 {
        self.tasks_submitted.saturating_sub(self.tasks_completed)
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stages: {} | Tasks: {} done, {} in flight @ {:.1}/s | \
             Entries: {} values, {} placeholders, {} exploded | Failures: {} | \
             Pools: {} up, {} down, {} workers | Buffers: {} closed ({} forced) | \
             Elapsed: {:.1}s",
            self.stages_created,
            self.tasks_completed,
            self.tasks_in_flight(),
            self.tasks_per_second,
            self.values_added,
            self.placeholders_added,
            self.children_exploded,
            self.failures,
            self.pool_activations,
            self.pool_teardowns,
            self.workers_spawned,
            self.buffers_closed,
            self.forced_closes,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter running on its own thread.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporter. Dropping or stopping the handle ends it.
    pub fn start(self) -> std::io::Result<ReporterHandle> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("metrics-reporter".to_string())
            .spawn(move || self.run(shutdown_rx))?;
        Ok(ReporterHandle {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    fn run(self, shutdown: Receiver<()>) {
        let ticker = tick(Duration::from_secs(self.interval_secs.max(1)));

        loop {
            select! {
                recv(ticker) -> _ => {
                    tracing::info!("{}", self.metrics.snapshot());
                }
                recv(shutdown) -> _ => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }

    /// Print a final summary to stderr.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        eprintln!("\n=== Processing Summary ===");
        eprintln!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        eprintln!("Stages created: {}", snapshot.stages_created);
        eprintln!("Tasks completed: {}", snapshot.tasks_completed);
        eprintln!("Task rate: {:.1} tasks/s", snapshot.tasks_per_second);
        eprintln!("Values: {}", snapshot.values_added);
        eprintln!("Placeholders: {}", snapshot.placeholders_added);
        eprintln!("Exploded children: {}", snapshot.children_exploded);
        eprintln!("Failures: {}", snapshot.failures);
        eprintln!(
            "Pools: {} activations, {} teardowns, {} workers",
            snapshot.pool_activations, snapshot.pool_teardowns, snapshot.workers_spawned
        );
        if snapshot.forced_closes > 0 {
            eprintln!(
                "Buffers closed with open gaps: {} of {}",
                snapshot.forced_closes, snapshot.buffers_closed
            );
        }
        eprintln!("==========================\n");
    }
}

/// Handle of a running [`MetricsReporter`].
pub struct ReporterHandle {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReporterHandle {
    /// Emit the final report and wait for the reporter thread.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
