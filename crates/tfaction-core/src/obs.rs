//! Structured lifecycle events for a run.
//!
//! Every event is emitted with an `event` field so log pipelines can filter
//! on it, e.g. `event=project.skipped`. [`run_span`] ties everything a run
//! logs to one `run_id`.

use tracing::{info, warn, Span};

use crate::command::Operation;

/// Span for one run. Attach it to the run future with
/// `tracing::Instrument::instrument` rather than entering it across awaits.
pub fn run_span(run_id: &str, pr: &str) -> Span {
    tracing::info_span!("tfaction.run", run_id = %run_id, pr = %pr)
}

/// Fresh random run identifier.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn emit_run_started(run_id: &str, operation: Operation, projects: usize) {
    info!(event = "run.started", run_id = %run_id, operation = %operation, projects = projects);
}

pub fn emit_project_skipped(project: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "project.skipped", project = %project, reason = %reason);
}

pub fn emit_project_executed(
    project: &str,
    operation: Operation,
    exit_code: i32,
    duration_ms: u64,
) {
    info!(
        event = "project.executed",
        project = %project,
        operation = %operation,
        exit_code = exit_code,
        duration_ms = duration_ms,
    );
}

pub fn emit_project_failed(project: &str, error: &dyn std::fmt::Display) {
    warn!(event = "project.failed", project = %project, error = %error);
}

pub fn emit_artifact_saved(project: &str, artifact: &dyn std::fmt::Display) {
    info!(event = "artifact.saved", project = %project, artifact = %artifact);
}

/// Apply continues without a reviewed plan.
pub fn emit_artifact_fallback(project: &str, error: &dyn std::fmt::Display) {
    warn!(event = "artifact.fallback", project = %project, error = %error);
}

pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    executed: usize,
    skipped: usize,
    success: bool,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        executed = executed,
        skipped = skipped,
        success = success,
    );
}
