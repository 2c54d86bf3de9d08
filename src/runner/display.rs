use std::fmt::Write as _;

use crate::model::TestStatus;
use crate::runner::context::LogStream;
use crate::runner::report::{RunSummary, StepReport, TestRunReport};

/// Format a status label for terminal output.
fn status_label(step: &StepReport) -> String {
    match step.status {
        TestStatus::Passed => "PASSED".into(),
        _ => step.outcome.to_uppercase(),
    }
}

/// Format one step, indented by its depth in the step tree.
pub fn format_step_result(step: &StepReport, depth: usize, verbose: bool) -> String {
    let indent = "  ".repeat(depth + 1);
    let duration_secs = step.duration_ms as f64 / 1000.0;
    let mut line = format!(
        "{indent}[{}] {} ({duration_secs:.1}s)",
        status_label(step),
        step.name
    );

    let mut detail = |stream: LogStream| {
        if let Some(text) = step.logs.get(&stream) {
            for text_line in text.lines() {
                let _ = write!(line, "\n{indent}       → {text_line}");
            }
        }
    };
    match step.status {
        TestStatus::Failed => detail(LogStream::Failures),
        TestStatus::Skipped | TestStatus::Inconclusive => detail(LogStream::Warnings),
        TestStatus::Passed => {}
    }
    if verbose {
        detail(LogStream::Output);
    }

    line
}

/// Format every step of a report, parents before children.
pub fn format_steps(report: &TestRunReport, verbose: bool) -> String {
    fn walk(step: &StepReport, depth: usize, verbose: bool, out: &mut Vec<String>) {
        out.push(format_step_result(step, depth, verbose));
        for child in &step.children {
            walk(child, depth + 1, verbose, out);
        }
    }

    let mut lines = Vec::new();
    for step in &report.steps {
        walk(step, 0, verbose, &mut lines);
    }
    lines.join("\n")
}

/// Format the final summary after all steps complete.
pub fn format_summary(summary: &RunSummary, duration_ms: u64) -> String {
    let duration_secs = duration_ms as f64 / 1000.0;
    let mut parts = Vec::new();

    if summary.passed > 0 {
        parts.push(format!("{} passed", summary.passed));
    }
    if summary.failed > 0 {
        parts.push(format!("{} failed", summary.failed));
    }
    if summary.skipped > 0 {
        parts.push(format!("{} skipped", summary.skipped));
    }
    if summary.inconclusive > 0 {
        parts.push(format!("{} inconclusive", summary.inconclusive));
    }

    if parts.is_empty() {
        parts.push("0 tests".into());
    }

    format!("\nResults: {} ({duration_secs:.1}s)", parts.join(", "))
}

/// Format the run header line.
pub fn format_run_header(plan_name: &str, controller: &str) -> String {
    format!("Running {plan_name} ({controller} controller)...\n")
}

/// Header, step tree and summary of a finished run.
pub fn format_report(report: &TestRunReport, verbose: bool) -> String {
    let mut out = format_run_header(&report.plan.name, &report.run.controller);
    out.push_str(&format_steps(report, verbose));
    out.push('\n');
    out.push_str(&format_summary(&report.summary, report.run.duration_ms));
    out
}
