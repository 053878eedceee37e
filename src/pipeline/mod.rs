//! Line-oriented text pipeline driven by configuration.

pub mod output;
pub mod stages;

pub use output::{render, FailureRecord, Report};
pub use stages::{build_chain, split_words};

use crate::config::Config;
use crate::error::Outcome;
use crate::processing::{IncrementalSource, ProcessingEnv};
use anyhow::{Context, Result};
use std::io::BufRead;
use std::time::{Duration, Instant};

/// Statistics from a pipeline run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Input lines read
    pub lines: usize,

    /// Elements in the output
    pub values: usize,

    /// Elements that failed
    pub failures: usize,

    pub elapsed: Duration,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Lines: {}, Values: {}, Failures: {}, Elapsed: {:.3}s",
            self.lines,
            self.values,
            self.failures,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Run the configured chain over every line of `reader`.
///
/// Lines are read on a separate thread into an incremental source. The
/// leading normalization stage is synchronous, so the configured stages start
/// once the whole input has been read.
pub fn run<R>(env: &ProcessingEnv, config: &Config, reader: R) -> Result<(Vec<Outcome<String>>, RunSummary)>
where
    R: BufRead + Send + 'static,
{
    let start = Instant::now();
    let chain = build_chain(env, &config.pipeline);
    let source = IncrementalSource::new(env);

    let feeder = {
        let source = source.clone();
        std::thread::Builder::new()
            .name(format!("{}-reader", env.config().thread_name))
            .spawn(move || {
                let mut count = 0usize;
                let mut result = Ok(());
                for line in reader.lines() {
                    match line {
                        Ok(line) => {
                            source.add(line);
                            count += 1;
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                source.close();
                result.map(|_| count)
            })
            .context("Failed to start input reader")?
    };

    let results = chain.process(source).as_slice();

    let lines = feeder
        .join()
        .map_err(|_| anyhow::anyhow!("Input reader panicked"))?
        .context("Failed to read input")?;

    let failures = results.iter().filter(|r| r.is_err()).count();
    let summary = RunSummary {
        lines,
        values: results.len() - failures,
        failures,
        elapsed: start.elapsed(),
    };
    tracing::info!("Pipeline complete: {}", summary);
    Ok((results, summary))
}
