//! Configuration for the processing engine and the text pipeline CLI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Stages applied by the `run` command
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Output rendering
    #[serde(default)]
    pub output: OutputConfig,
}

/// Engine configuration, shared by every stage built from one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Default worker count for parallel stages (0 = available CPUs)
    #[serde(default)]
    pub workers: usize,

    /// Capacity of a pool's bounded work queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Prefix for the names of worker and feeder threads
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Enable periodic metrics reporting
    #[serde(default)]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after a run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: default_queue_capacity(),
            thread_name: default_thread_name(),
            enable_metrics: false,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

impl ProcessingConfig {
    /// Worker count to use when a stage asks for the default (`0`).
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// Stages of the text pipeline, applied in order to every input line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
        }
    }
}

/// One text pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageConfig {
    /// Split each line into words, stripping surrounding punctuation
    SplitWords,
    /// Lowercase every element
    Lowercase,
    /// Trim surrounding whitespace
    Trim,
    /// Drop elements contained in the stopword list
    DropStopwords {
        #[serde(default = "default_stopwords")]
        words: Vec<String>,
    },
    /// Drop elements shorter than `length` characters
    MinLength { length: usize },
    /// Sort lexicographically
    Sort {
        #[serde(default)]
        descending: bool,
    },
    /// Remove repeated elements, keeping the first occurrence
    Dedup,
    /// Switch to a worker pool (0 = default worker count)
    Parallel {
        #[serde(default)]
        workers: usize,
    },
    /// Give up input order for the following parallel stages
    Unordered,
    /// Continue on the calling thread
    Synchronously,
    /// Continue on a background thread
    Asynchronously,
}

/// Output rendering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    #[serde(default)]
    pub failures: FailureReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// How failed elements are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReport {
    /// One error line at the position of each failed element
    #[default]
    Inline,
    /// A single aggregate count after the output
    Count,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.processing.queue_capacity == 0 {
            anyhow::bail!("Queue capacity must be > 0");
        }
        if self.processing.thread_name.is_empty() {
            anyhow::bail!("Thread name prefix must not be empty");
        }
        if self.processing.enable_metrics && self.processing.metrics_interval_secs == 0 {
            anyhow::bail!("Metrics interval must be > 0 when metrics are enabled");
        }
        for (i, stage) in self.pipeline.stages.iter().enumerate() {
            match stage {
                StageConfig::MinLength { length: 0 } => {
                    anyhow::bail!("Stage {}: min_length must be > 0", i);
                }
                StageConfig::DropStopwords { words } if words.is_empty() => {
                    anyhow::bail!("Stage {}: drop_stopwords needs at least one word", i);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_queue_capacity() -> usize { 64 }
fn default_thread_name() -> String { "proc".to_string() }
fn default_metrics_interval() -> u64 { 10 }

pub(crate) fn default_stopwords() -> Vec<String> {
    ["a", "an", "and", "the", "of", "or", "to", "in"]
        .iter()
        .map(|w| w.to_string())
        .collect()
}

fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::SplitWords,
        StageConfig::Parallel { workers: 0 },
        StageConfig::DropStopwords {
            words: default_stopwords(),
        },
        StageConfig::Sort { descending: false },
    ]
}
