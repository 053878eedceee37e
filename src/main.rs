//! Ordered Processing CLI
//!
//! Runs a configurable text pipeline over lines of input, keeping their order.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ordered_processing::{run_pipeline, Config};

#[derive(Parser)]
#[command(name = "ordered-processing")]
#[command(about = "Process lines of text through an order-preserving concurrent pipeline", long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults if omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the default worker count
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run {
        /// Input file (stdin if omitted)
        input: Option<PathBuf>,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the results
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => {
            run_command(cli.config, cli.workers, None)?;
        }

        Some(Commands::Run { input }) => {
            run_command(cli.config, cli.workers, input)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::from_file(&path),
        None => Ok(Config::default()),
    }
}

fn run_command(config_path: Option<PathBuf>, workers: Option<usize>, input: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;

    // Apply overrides
    if let Some(w) = workers {
        config.processing.workers = w;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = run_pipeline(config, input.as_deref(), &mut out)?;
    tracing::info!("{}", summary);

    Ok(())
}

fn validate_command(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    println!("Configuration is valid!");
    println!();
    println!("Processing:");
    println!("  Workers: {}", config.processing.effective_workers());
    println!("  Queue capacity: {}", config.processing.queue_capacity);
    println!("  Thread name prefix: {}", config.processing.thread_name);
    println!("  Metrics: {}", config.processing.enable_metrics);
    println!();
    println!("Pipeline:");
    for (i, stage) in config.pipeline.stages.iter().enumerate() {
        println!("  {}. {:?}", i + 1, stage);
    }
    println!();
    println!("Output:");
    println!("  Format: {:?}", config.output.format);
    println!("  Failures: {:?}", config.output.failures);

    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Ordered Processing Configuration

# === PROCESSING: Engine tuning ===
processing:
  # Default worker count for parallel stages (0 = number of CPUs)
  workers: 0

  # Capacity of each pool's work queue
  queue_capacity: 64

  # Prefix for worker and feeder thread names
  thread_name: "proc"

  # Print engine metrics during processing
  enable_metrics: false

  # Metrics reporting interval in seconds
  metrics_interval_secs: 10

  # Save final metrics as JSON (optional)
  # metrics_output_path: "metrics.json"

# === PIPELINE: Stages applied to every input line, in order ===
# Input lines are always trimmed and blank lines dropped first.
pipeline:
  stages:
    # Split lines into words, stripping surrounding punctuation
    - stage: split_words

    # Run the following stages on a worker pool (0 = default worker count)
    - stage: parallel
      workers: 0

    # Drop common words (case-insensitive)
    - stage: drop_stopwords
      words: ["a", "an", "and", "the", "of", "or", "to", "in"]

    # Other stages:
    # - stage: lowercase
    # - stage: trim
    # - stage: min_length
    #   length: 3
    # - stage: dedup
    # - stage: unordered        # following parallel stages yield in completion order
    # - stage: synchronously    # continue on the calling thread
    # - stage: asynchronously   # continue as one background task per stage

    # Sort lexicographically
    - stage: sort
      descending: false

# === OUTPUT: Rendering of the results ===
output:
  # text, json or yaml
  format: text

  # inline (one error line per failed element) or count
  failures: inline
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
