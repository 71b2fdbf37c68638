//! Rendering run results as pull-request comments.

use std::fmt::Write as _;

use crate::command::Operation;
use crate::error::ActionError;
use crate::pipeline::{ProjectOutcome, RunReport};
use crate::provider::PullRequestRef;

/// Body posted when nothing matched.
pub const NO_PROJECTS_MESSAGE: &str = "No projects matched the criteria";

/// Per-stream output budget. Comments on GitHub cap out at 65536 characters.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 20_000;

/// Turns run results into comment bodies.
pub trait ReportFormatter: Send + Sync {
    fn render(&self, report: &RunReport) -> String;

    /// Body for a run that aborted before producing a report.
    fn render_failure(&self, pr: &PullRequestRef, error: &ActionError) -> String;

    fn render_no_projects(&self, operation: Operation) -> String;
}

/// GitHub-flavoured markdown with one collapsible section per project.
#[derive(Debug, Clone)]
pub struct MarkdownFormatter {
    max_output_chars: usize,
}

impl Default for MarkdownFormatter {
    fn default() -> Self {
        Self {
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

impl MarkdownFormatter {
    pub fn new(max_output_chars: usize) -> Self {
        Self { max_output_chars }
    }

    fn push_output(&self, body: &mut String, label: &str, text: &str) {
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }
        let (truncated, shown) = tail(text, self.max_output_chars);
        let _ = writeln!(body, "<details><summary>{label}</summary>\n");
        if truncated {
            let _ = writeln!(
                body,
                "_Output truncated to the last {} characters._\n",
                self.max_output_chars
            );
        }
        let _ = writeln!(body, "```\n{shown}\n```\n</details>\n");
    }
}

impl ReportFormatter for MarkdownFormatter {
    fn render(&self, report: &RunReport) -> String {
        let mut body = String::new();
        let icon = if report.is_success() { "✅" } else { "❌" };
        let _ = writeln!(
            body,
            "### {icon} Terraform {}: {} executed, {} skipped\n",
            report.operation,
            report.executed_count(),
            report.skipped_count()
        );

        for outcome in &report.outcomes {
            match outcome {
                ProjectOutcome::Executed { result, notices } => {
                    let summary = match (report.operation, result.has_changes) {
                        (Operation::Plan, true) => "changes detected",
                        (Operation::Plan, false) => "no changes",
                        (Operation::Apply, _) if result.used_saved_plan => "applied reviewed plan",
                        (Operation::Apply, _) => "applied",
                    };
                    let _ = writeln!(body, "#### `{}`: {summary}\n", result.project);
                    for notice in notices {
                        let _ = writeln!(body, "> ⚠️ {notice}\n");
                    }
                    self.push_output(&mut body, "Output", &result.stdout);
                }
                ProjectOutcome::Skipped { project, reason } => {
                    let _ = writeln!(body, "#### `{project}`: skipped\n\n{reason}\n");
                }
                ProjectOutcome::Failed { project, error } => {
                    let _ = writeln!(
                        body,
                        "#### `{project}`: failed\n\n**{}**: {error}\n",
                        error.kind()
                    );
                    if let Some(stderr) = error.stderr() {
                        self.push_output(&mut body, "Error output", stderr);
                    }
                }
                ProjectOutcome::NotRun { project } => {
                    let _ = writeln!(body, "#### `{project}`: not run\n");
                }
            }
        }

        let _ = write!(body, "<sub>run `{}` in {} ms</sub>", report.run_id, report.duration_ms);
        body
    }

    fn render_failure(&self, pr: &PullRequestRef, error: &ActionError) -> String {
        format!("### ❌ Terraform run failed for {pr}\n\n**{}**: {error}", error.kind())
    }

    fn render_no_projects(&self, _operation: Operation) -> String {
        NO_PROJECTS_MESSAGE.to_string()
    }
}

/// Last `max_chars` characters of `text`, and whether anything was cut.
/// Terraform prints its summary last, so the tail is the part to keep.
fn tail(text: &str, max_chars: usize) -> (bool, &str) {
    let count = text.chars().count();
    if count <= max_chars {
        return (false, text);
    }
    let start = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    (true, &text[start..])
}
