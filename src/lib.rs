//! Ordered Processing
//!
//! Concurrent stream processing that keeps the order of its input.
//!
//! # Architecture
//!
//! The crate consists of:
//!
//! - **Data**: Hierarchical ordering keys and the pull-based `Iterable` contract
//! - **Processing**: Worker pools, order-restoring buffers, and chains of
//!   map/filter/explode/sort/transform stages, each run synchronously, as a
//!   background task or on a worker pool
//! - **Pipeline**: A configurable line-oriented text pipeline built on the engine
//!
//! # Usage
//!
//! ```no_run
//! use ordered_processing::{ProcessChain, ProcessingEnv};
//!
//! let env = ProcessingEnv::default();
//! let chain = ProcessChain::<i32>::new(&env).parallel(3).map(|x| x + 1);
//! assert_eq!(chain.process(vec![1, 2, 3]).values().unwrap(), vec![2, 3, 4]);
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod processing;

pub use config::{Config, ProcessingConfig};
pub use data::{Element, Index, Iterable, Sequence};
pub use error::{Outcome, ProcessingError, StageError};
pub use pipeline::RunSummary;
pub use processing::{
    IncrementalSource, Metrics, ProcessChain, ProcessingBuffer, ProcessingEntry, ProcessingEnv,
    ProcessingResult, ProcessorPool, StageResult, Strategy,
};

use anyhow::{Context, Result};
use processing::MetricsReporter;
use std::io::{BufReader, Write};
use std::path::Path;

/// Run the configured text pipeline over `input` (stdin if `None`) and
/// render the result to `out`.
pub fn run_pipeline<W: Write>(config: Config, input: Option<&Path>, out: &mut W) -> Result<RunSummary> {
    // Validate configuration
    config.validate()?;

    tracing::info!("Starting ordered processing pipeline");
    tracing::info!(
        "{} stages, {} default workers",
        config.pipeline.stages.len(),
        config.processing.effective_workers()
    );

    let env = ProcessingEnv::new(config.processing.clone());

    // Start metrics reporter if enabled
    let reporter = if config.processing.enable_metrics {
        let reporter = MetricsReporter::new(env.metrics().clone(), config.processing.metrics_interval_secs);
        Some(reporter.start().context("Failed to start metrics reporter")?)
    } else {
        None
    };

    let (results, summary) = match input {
        Some(path) => {
            tracing::info!("Reading input from {}", path.display());
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            pipeline::run(&env, &config, BufReader::new(file))?
        }
        None => {
            tracing::info!("Reading input from stdin");
            pipeline::run(&env, &config, BufReader::new(std::io::stdin()))?
        }
    };

    pipeline::render(&results, &config.output, out)?;

    // Print final summary and optionally save to file
    if let Some(handle) = reporter {
        handle.stop();
        MetricsReporter::new(env.metrics().clone(), config.processing.metrics_interval_secs).print_summary();

        if let Some(ref path) = config.processing.metrics_output_path {
            if let Err(e) = env.metrics().snapshot().save_to_file(path) {
                tracing::warn!("Failed to save metrics to {}: {}", path, e);
            }
        }
    }

    Ok(summary)
}
