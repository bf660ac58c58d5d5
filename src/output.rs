//! Rendering advice for the terminal.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use clap::ValueEnum;
use ruleops_advisor::RunReport;
use ruleops_rules::Advice;

/// Output format for advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One line per finding.
    #[default]
    Text,
    Json,
    Yaml,
}

/// Render an advice list.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_advice(advice: &[Advice], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(advice_lines(advice)),
        OutputFormat::Json => serde_json::to_string_pretty(advice).context("Failed to render advice as JSON"),
        OutputFormat::Yaml => serde_yaml::to_string(advice).context("Failed to render advice as YAML"),
    }
}

/// Render one scheduled run.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_report(report: &RunReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => {
            let mut out = format!("run {} at {}", report.id, report.started_at.to_rfc3339());
            match &report.error {
                Some(error) => {
                    let _ = write!(out, ": failed: {error}");
                }
                None => {
                    let _ = write!(out, ": {} finding(s)\n{}", report.advice.len(), advice_lines(&report.advice));
                }
            }
            Ok(out)
        }
        // One document per line so watch output can be streamed.
        OutputFormat::Json => serde_json::to_string(report).context("Failed to render report as JSON"),
        OutputFormat::Yaml => serde_yaml::to_string(report)
            .map(|doc| format!("---\n{doc}"))
            .context("Failed to render report as YAML"),
    }
}

fn advice_lines(advice: &[Advice]) -> String {
    if advice.is_empty() {
        return "No advice.".to_string();
    }
    advice.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}
