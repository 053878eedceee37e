//! Rendering of pipeline results.

use crate::config::{FailureReport, OutputConfig, OutputFormat};
use crate::error::Outcome;
use anyhow::Result;
use serde::Serialize;
use std::io::Write;

/// A failed element and where it surfaced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    /// Position in the output sequence
    pub position: usize,
    pub stage: Option<&'static str>,
    pub message: String,
}

/// Structured form of a run's output.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub values: Vec<String>,

    /// Individual failures (only with inline failure reporting)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,

    /// Number of failed elements
    pub failed: usize,
}

impl Report {
    pub fn new(results: &[Outcome<String>], mode: FailureReport) -> Self {
        let mut values = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        let mut failed = 0;
        for (position, result) in results.iter().enumerate() {
            match result {
                Ok(value) => values.push(value.clone()),
                Err(err) => {
                    failed += 1;
                    if mode == FailureReport::Inline {
                        failures.push(FailureRecord {
                            position,
                            stage: err.stage(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
        Self {
            values,
            failures,
            failed,
        }
    }
}

/// Write `results` in the configured format.
pub fn render<W: Write>(results: &[Outcome<String>], config: &OutputConfig, out: &mut W) -> Result<()> {
    match config.format {
        OutputFormat::Text => render_text(results, config.failures, out)?,
        OutputFormat::Json => {
            let report = Report::new(results, config.failures);
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
        OutputFormat::Yaml => {
            let report = Report::new(results, config.failures);
            out.write_all(serde_yaml::to_string(&report)?.as_bytes())?;
        }
    }
    out.flush()?;
    Ok(())
}

fn render_text<W: Write>(results: &[Outcome<String>], mode: FailureReport, out: &mut W) -> Result<()> {
    let mut failed = 0;
    for result in results {
        match result {
            Ok(value) => writeln!(out, "{}", value)?,
            Err(err) => {
                failed += 1;
                if mode == FailureReport::Inline {
                    writeln!(out, "error: {}", err)?;
                }
            }
        }
    }
    if mode == FailureReport::Count && failed > 0 {
        writeln!(out, "{} element(s) failed", failed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;

    fn results() -> Vec<Outcome<String>> {
        vec![
            Ok("alpha".to_string()),
            Err(StageError::Failed {
                stage: "try_map",
                message: "bad input".to_string(),
            }),
            Ok("beta".to_string()),
        ]
    }

    fn rendered(format: OutputFormat, failures: FailureReport) -> String {
        let mut buf = Vec::new();
        render(&results(), &OutputConfig { format, failures }, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_text_inline() {
        assert_eq!(
            rendered(OutputFormat::Text, FailureReport::Inline),
            "alpha\nerror: try_map stage failed: bad input\nbeta\n"
        );
    }

    #[test]
    fn test_text_count() {
        assert_eq!(
            rendered(OutputFormat::Text, FailureReport::Count),
            "alpha\nbeta\n1 element(s) failed\n"
        );
    }

    #[test]
    fn test_json_report() {
        let json: serde_json::Value =
            serde_json::from_str(&rendered(OutputFormat::Json, FailureReport::Inline)).unwrap();
        assert_eq!(json["values"], serde_json::json!(["alpha", "beta"]));
        assert_eq!(json["failed"], 1);
        assert_eq!(json["failures"][0]["position"], 1);
        assert_eq!(json["failures"][0]["stage"], "try_map");
    }

    #[test]
    fn test_yaml_count_omits_failure_list() {
        let yaml = rendered(OutputFormat::Yaml, FailureReport::Count);
        assert!(yaml.contains("failed: 1"));
        assert!(!yaml.contains("failures"));
        assert!(yaml.contains("- alpha"));
    }
}
