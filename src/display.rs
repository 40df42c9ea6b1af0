use chrono::NaiveDateTime;
use owo_colors::{OwoColorize, Stream, Style};
use serde::Serialize;

use crate::dataset::Summary;
use crate::ledger::RunRecord;
use crate::shell::escape_for_native_shell;
use crate::types::{ExecResult, Job};

const STARTED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header of the CSV job log.
pub fn csv_header() -> String {
    format!("{:>10};{:>10};{:>10}; Command", "Job ID", "Runtime", "Exit code")
}

/// One CSV job log line: index, runtime and exit code right-aligned, then the
/// command line quoted for the native shell.
pub fn csv_line(job: &Job, result: &ExecResult) -> String {
    format!(
        "{:>10};{:>10};{:>10}; {}",
        job.index,
        result.runtime(),
        result.exit_code(),
        escape_for_native_shell(job)
    )
}

/// Format a duration into a compact relative time string like "2m ago", "1h ago".
pub fn format_relative_time(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        "<1m ago".to_string()
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
    } else if secs < 604800 {
        format!("{}d ago", secs / 86400)
    } else {
        format!("{}w ago", secs / 604800)
    }
}

fn style_value() -> Style {
    Style::new().cyan().bold()
}

fn dimmed(s: &str) -> String {
    s.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string()
}

fn seconds(value: u32) -> String {
    format!("{}s", value)
        .if_supports_color(Stream::Stdout, |s| s.style(style_value()))
        .to_string()
}

fn timeout_label(timeout: u32) -> String {
    if timeout == 0 {
        "none".to_string()
    } else {
        format!("{}s", timeout)
    }
}

/// Human-readable statistics of one experiment.
pub fn format_summary(summary: &Summary) -> String {
    let mut out = String::new();

    out.push_str(&dimmed("Summary:"));
    out.push_str("\n\n");

    let successful = format!("{}/{}", summary.successful_runs, summary.runs);
    let successful = if summary.successful_runs == summary.runs {
        successful
            .if_supports_color(Stream::Stdout, |s| s.green())
            .to_string()
    } else {
        successful
            .if_supports_color(Stream::Stdout, |s| s.yellow())
            .to_string()
    };

    out.push_str(&format!(
        "  {}   {}  {}\n",
        dimmed("successful runs"),
        successful,
        dimmed(&format!("(timeout {})", timeout_label(summary.timeout))),
    ));
    out.push_str(&format!(
        "  {}          median {}  MAD {}\n",
        dimmed("all runs"),
        seconds(summary.median_all),
        seconds(summary.mad_all),
    ));
    out.push_str(&format!(
        "  {}        median {}  MAD {}\n",
        dimmed("successful"),
        seconds(summary.median_successful),
        seconds(summary.mad_successful),
    ));

    out
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    run_id: Option<i64>,
    #[serde(flatten)]
    summary: &'a Summary,
}

pub fn format_summary_json(summary: &Summary, run_id: Option<i64>) -> String {
    serde_json::to_string_pretty(&JsonSummary { run_id, summary })
        .unwrap_or_else(|_| "{}".to_string())
}

/// Expanded job list: index and command line, one job per line.
pub fn format_jobs(jobs: &[Job]) -> String {
    let width = jobs
        .last()
        .map(|j| j.index.to_string().len())
        .unwrap_or(1);

    let mut out = String::new();
    for job in jobs {
        let idx = format!("{:>width$}", job.index, width = width);
        out.push_str(&format!(
            "{}  {}\n",
            idx.if_supports_color(Stream::Stdout, |s| s.style(style_value())),
            escape_for_native_shell(job)
        ));
    }
    out
}

/// A recorded run with statistics recomputed from its job rows.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub run: RunRecord,
    pub summary: Summary,
}

/// Table of recorded runs, oldest first.
pub fn format_history(entries: &[HistoryEntry], now: NaiveDateTime) -> String {
    if entries.is_empty() {
        return format!("{}\n", dimmed("No runs recorded."));
    }

    let mut out = String::new();
    out.push_str(&dimmed("Recorded runs:"));
    out.push_str("\n\n");

    let id_width = entries
        .iter()
        .map(|e| e.run.run_id.to_string().len())
        .max()
        .unwrap_or(1);

    for entry in entries {
        let id = format!("{:>width$}", entry.run.run_id, width = id_width);
        let ago = format!("{:>8}", format_relative_time(now - entry.run.started_at));
        let s = &entry.summary;

        out.push_str(&format!(
            "  {}  {}  {}  {:>4} jobs  {:>4} ok  median {}  MAD {}\n",
            id.if_supports_color(Stream::Stdout, |s| s.style(style_value())),
            entry.run.started_at.format(STARTED_FORMAT),
            ago.if_supports_color(Stream::Stdout, |s| s.yellow()),
            entry.run.jobs,
            s.successful_runs,
            seconds(s.median_all),
            seconds(s.mad_all),
        ));
    }

    out
}

#[derive(Serialize)]
struct JsonRun<'a> {
    run_id: i64,
    started_at: String,
    jobs: usize,
    summary: &'a Summary,
}

pub fn format_history_json(entries: &[HistoryEntry]) -> String {
    let runs: Vec<JsonRun> = entries
        .iter()
        .map(|e| JsonRun {
            run_id: e.run.run_id,
            started_at: e.run.started_at.format(STARTED_FORMAT).to_string(),
            jobs: e.run.jobs,
            summary: &e.summary,
        })
        .collect();

    serde_json::to_string_pretty(&runs).unwrap_or_else(|_| "[]".to_string())
}
