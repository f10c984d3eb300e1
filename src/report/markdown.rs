//! Markdown report.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

use super::{format_duration, round_to};
use crate::runner::{BenchmarkSummary, EvalResult, TaskResult};
use crate::task::Difficulty;
use crate::utils::truncate;

const NOTE_CHARS: usize = 50;

/// Emoji shown for an outcome in the detail tables.
pub fn result_emoji(result: TaskResult) -> &'static str {
    match result {
        TaskResult::Success => "✅",
        TaskResult::Fail => "❌",
        TaskResult::Error => "⚠️",
        TaskResult::Timeout => "⏱️",
        TaskResult::Skipped => "⏭️",
        TaskResult::Unknown => "❓",
    }
}

/// Renders the full Markdown report.
pub fn render(summary: &BenchmarkSummary, results: &[EvalResult]) -> String {
    let mut md = String::new();
    // Writing into a String cannot fail.
    let _ = render_into(&mut md, summary, results);
    md
}

fn render_into(md: &mut String, summary: &BenchmarkSummary, results: &[EvalResult]) -> std::fmt::Result {
    write_header(md, summary)?;
    write_overall(md, summary)?;
    write_difficulty(md, summary)?;
    write_llms(md, summary)?;
    write_details(md, results)
}

fn write_header(md: &mut String, summary: &BenchmarkSummary) -> std::fmt::Result {
    writeln!(md, "# Kubernetes AI Benchmark Results\n")?;
    writeln!(md, "**Run ID:** {}", summary.run_id)?;
    writeln!(
        md,
        "**Duration:** {}",
        format_duration(round_to(summary.duration, Duration::from_secs(1)))
    )?;
    writeln!(md, "**Date:** {}\n", summary.start_time.to_rfc3339())
}

fn write_overall(md: &mut String, summary: &BenchmarkSummary) -> std::fmt::Result {
    writeln!(md, "## Overall Summary\n")?;
    writeln!(md, "| Metric | Value |")?;
    writeln!(md, "|--------|-------|")?;
    writeln!(md, "| Total Tasks | {} |", summary.total_tasks)?;
    writeln!(md, "| Success | {} |", summary.success_count)?;
    writeln!(md, "| Failed | {} |", summary.fail_count)?;
    writeln!(md, "| Errors | {} |", summary.error_count)?;
    writeln!(md, "| Pass@1 | {:.1}% |\n", summary.pass_at_1)
}

fn write_difficulty(md: &mut String, summary: &BenchmarkSummary) -> std::fmt::Result {
    writeln!(md, "## Results by Difficulty\n")?;
    writeln!(md, "| Difficulty | Success | Total | Rate |")?;
    writeln!(md, "|------------|---------|-------|------|")?;
    for difficulty in Difficulty::ALL {
        let (success, total) = summary.difficulty_counts(difficulty);
        if total == 0 {
            continue;
        }
        let rate = success as f64 / total as f64 * 100.0;
        writeln!(
            md,
            "| {} | {} | {} | {:.1}% |",
            capitalize(difficulty.as_str()),
            success,
            total,
            rate
        )?;
    }
    writeln!(md)
}

fn write_llms(md: &mut String, summary: &BenchmarkSummary) -> std::fmt::Result {
    writeln!(md, "## Results by LLM\n")?;
    writeln!(md, "| LLM | Success | Failed | Errors | Pass Rate | Avg Duration |")?;
    writeln!(md, "|-----|---------|--------|--------|-----------|-------------|")?;
    for (id, llm) in &summary.llm_results {
        writeln!(
            md,
            "| {} | {} | {} | {} | {:.1}% | {} |",
            id,
            llm.success_count,
            llm.fail_count,
            llm.error_count,
            llm.pass_rate,
            format_duration(round_to(llm.avg_duration, Duration::from_secs(1)))
        )?;
    }
    writeln!(md)
}

fn write_details(md: &mut String, results: &[EvalResult]) -> std::fmt::Result {
    writeln!(md, "## Detailed Results\n")?;

    let mut by_task: BTreeMap<&str, Vec<&EvalResult>> = BTreeMap::new();
    for result in results {
        by_task.entry(result.task_id.as_str()).or_default().push(result);
    }

    for (task_id, task_results) in by_task {
        writeln!(md, "### {}\n", task_id)?;
        let first = task_results[0];
        if !first.task_name.is_empty() {
            writeln!(md, "**{}** ({})\n", first.task_name, first.difficulty)?;
        }

        writeln!(md, "| LLM | Result | Duration | Notes |")?;
        writeln!(md, "|-----|--------|----------|-------|")?;
        for result in task_results {
            writeln!(
                md,
                "| {} | {} | {} | {} |",
                result.llm_config.id,
                result_emoji(result.result),
                format_duration(round_to(result.duration, Duration::from_millis(1))),
                truncate(result.note(), NOTE_CHARS)
            )?;
        }
        writeln!(md)?;
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
