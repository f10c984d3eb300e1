//! Result analysis and reporting.
//!
//! Results persisted by the runner are loaded back from disk, aggregated
//! into a [`BenchmarkSummary`] and rendered as JSON, JSON lines, YAML or a
//! Markdown report.

pub mod markdown;

use std::collections::btree_map::Entry;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ReportError;
use crate::runner::{BenchmarkSummary, EvalResult, LlmSummary, TaskResult};
use crate::task::Difficulty;

/// Report output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Jsonl,
    Yaml,
    #[default]
    Markdown,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Yaml => "yaml",
            OutputFormat::Markdown => "markdown",
        }
    }

    /// File extension for a report in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            other => other.as_str(),
        }
    }

    /// Renders a report.
    pub fn render(
        &self,
        summary: &BenchmarkSummary,
        results: &[EvalResult],
    ) -> Result<String, ReportError> {
        let rendered = match self {
            OutputFormat::Json => serde_json::to_string_pretty(&Report { summary, results })?,
            OutputFormat::Jsonl => results
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()?
                .join("\n"),
            OutputFormat::Yaml => serde_yaml::to_string(&Report { summary, results })?,
            OutputFormat::Markdown => markdown::render(summary, results),
        };
        Ok(rendered)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "jsonl" => Ok(OutputFormat::Jsonl),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "" | "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(ReportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Envelope for the JSON and YAML reports.
#[derive(Serialize)]
struct Report<'a> {
    summary: &'a BenchmarkSummary,
    results: &'a [EvalResult],
}

/// Loads every result file under `dir`, recursively.
///
/// Files that do not parse as a result (reports, partial writes) are
/// skipped. A missing directory yields no results.
pub fn load_results(dir: impl AsRef<Path>) -> Result<Vec<EvalResult>, ReportError> {
    let dir = dir.as_ref();
    let mut results = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.path() == Some(dir) => {
                debug!(dir = %dir.display(), error = %e, "Results directory not readable");
                return Ok(results);
            }
            Err(e) => return Err(ReportError::Io(e.into())),
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }

        let data = std::fs::read_to_string(path)?;
        match serde_json::from_str::<EvalResult>(&data) {
            Ok(result) => results.push(result),
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping non-result file"),
        }
    }

    Ok(results)
}

/// Aggregates results into a summary.
pub fn analyze(results: &[EvalResult]) -> BenchmarkSummary {
    let mut summary = BenchmarkSummary::empty();
    let Some(first) = results.first() else {
        return summary;
    };

    summary.run_id = first.run_id.clone();
    summary.start_time = results.iter().map(|r| r.start_time).min().unwrap_or(first.start_time);
    summary.end_time = results.iter().map(|r| r.end_time).max().unwrap_or(first.end_time);
    summary.duration = (summary.end_time - summary.start_time).to_std().unwrap_or_default();

    for result in results {
        summary.total_tasks += 1;
        let success = result.result == TaskResult::Success;

        match result.result {
            TaskResult::Success => summary.success_count += 1,
            TaskResult::Fail => summary.fail_count += 1,
            TaskResult::Error | TaskResult::Timeout => summary.error_count += 1,
            TaskResult::Skipped => summary.skipped_count += 1,
            TaskResult::Unknown => {}
        }

        let (hits, total) = match result.difficulty {
            Difficulty::Easy => (&mut summary.easy_success, &mut summary.easy_total),
            Difficulty::Medium => (&mut summary.medium_success, &mut summary.medium_total),
            Difficulty::Hard => (&mut summary.hard_success, &mut summary.hard_total),
        };
        *total += 1;
        if success {
            *hits += 1;
        }

        let llm = match summary.llm_results.entry(result.llm_config.id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(LlmSummary::new(result.llm_config.clone())),
        };
        llm.total_tasks += 1;
        llm.avg_duration += result.duration;
        match result.result {
            TaskResult::Success => llm.success_count += 1,
            TaskResult::Fail => llm.fail_count += 1,
            _ => llm.error_count += 1,
        }
    }

    summary.pass_at_1 = percentage(summary.success_count, summary.total_tasks);
    for llm in summary.llm_results.values_mut() {
        llm.pass_rate = percentage(llm.success_count, llm.total_tasks);
        llm.avg_duration /= llm.total_tasks.max(1) as u32;
    }

    summary
}

/// Writes a report to `output`, or to stdout when `output` is `None`.
pub fn write_report(
    format: OutputFormat,
    summary: &BenchmarkSummary,
    results: &[EvalResult],
    output: Option<&Path>,
) -> Result<(), ReportError> {
    let rendered = format.render(summary, results)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            debug!(path = %path.display(), format = %format, "Report written");
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Every result that did not succeed, in input order.
pub fn failed_results(results: &[EvalResult]) -> Vec<&EvalResult> {
    results.iter().filter(|r| !r.is_success()).collect()
}

/// Prints a short summary block to stdout.
pub fn print_summary(summary: &BenchmarkSummary) {
    println!("{}", summary_text(summary));
}

fn summary_text(summary: &BenchmarkSummary) -> String {
    let rule = "=".repeat(50);
    let mut out = format!(
        "\n{rule}\nBENCHMARK SUMMARY\n{rule}\n\
         Run ID:     {}\n\
         Duration:   {}\n\
         Total:      {} tasks\n\
         Success:    {} ({:.1}%)\n\
         Failed:     {}\n\
         Errors:     {}\n\
         {rule}",
        summary.run_id,
        format_duration(round_to(summary.duration, Duration::from_secs(1))),
        summary.total_tasks,
        summary.success_count,
        summary.pass_at_1,
        summary.fail_count,
        summary.error_count,
    );

    if summary.llm_results.len() > 1 {
        out.push_str("\n\nPer-LLM Results:");
        for (id, llm) in &summary.llm_results {
            out.push_str(&format!(
                "\n  {}: {:.1}% ({}/{})",
                id, llm.pass_rate, llm.success_count, llm.total_tasks
            ));
        }
    }
    out
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Rounds `d` to the nearest multiple of `unit`.
pub(crate) fn round_to(d: Duration, unit: Duration) -> Duration {
    let unit_nanos = unit.as_nanos().max(1);
    let rounded = (d.as_nanos() + unit_nanos / 2) / unit_nanos * unit_nanos;
    Duration::from_nanos(u64::try_from(rounded).unwrap_or(u64::MAX))
}

/// Human-readable duration, `0s` for zero.
pub(crate) fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        "0s".to_string()
    } else {
        humantime::format_duration(d).to_string()
    }
}
