//! Comment-to-report orchestration.
//!
//! One run: parse the comment, take one snapshot of the pull request,
//! resolve projects, then for each project in order gate, execute and keep
//! the plan. Gate failures skip a project; execution failures stop the run
//! and leave the remaining projects unexecuted. The report is posted back to
//! the pull request at the end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn, Instrument};

use crate::artifact::PlanArtifactStore;
use crate::command::{CommentGrammar, Operation, ParsedCommand};
use crate::context::RunContext;
use crate::error::Result;
use crate::executor::{ExecutionError, ExecutionResult, TerraformExecutor, ToolRunner};
use crate::gate::{GateError, PullRequestStatus, RequirementGate};
use crate::obs;
use crate::project::{ChangeFilter, ProjectDefinition, ProjectRegistry};
use crate::provider::{CommentPoster, PullRequestProvider, PullRequestRef};
use crate::report::{MarkdownFormatter, ReportFormatter};

/// What happened to one resolved project.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProjectOutcome {
    Executed {
        result: ExecutionResult,
        /// Non-fatal problems worth surfacing, such as a plan that could not
        /// be kept.
        notices: Vec<String>,
    },
    Skipped {
        project: String,
        #[serde(serialize_with = "display")]
        reason: GateError,
    },
    Failed {
        project: String,
        #[serde(serialize_with = "display")]
        error: ExecutionError,
    },
    /// Not attempted because an earlier project failed.
    NotRun { project: String },
}

impl ProjectOutcome {
    pub fn project(&self) -> &str {
        match self {
            ProjectOutcome::Executed { result, .. } => &result.project,
            ProjectOutcome::Skipped { project, .. }
            | ProjectOutcome::Failed { project, .. }
            | ProjectOutcome::NotRun { project } => project,
        }
    }
}

fn display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Everything a finished run produced.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub pr: PullRequestRef,
    pub operation: Operation,
    pub outcomes: Vec<ProjectOutcome>,
    pub duration_ms: u64,
}

impl RunReport {
    /// The execution error that stopped the run, if any.
    pub fn fatal_error(&self) -> Option<&ExecutionError> {
        self.outcomes.iter().find_map(|o| match o {
            ProjectOutcome::Failed { error, .. } => Some(error),
            _ => None,
        })
    }

    /// No project failed. Skipped projects do not count as failures.
    pub fn is_success(&self) -> bool {
        self.fatal_error().is_none()
    }

    pub fn executed(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.outcomes.iter().filter_map(|o| match o {
            ProjectOutcome::Executed { result, .. } => Some(result),
            _ => None,
        })
    }

    pub fn executed_count(&self) -> usize {
        self.executed().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ProjectOutcome::Skipped { .. }))
            .count()
    }

    /// Some executed plan reported pending changes.
    pub fn has_changes(&self) -> bool {
        self.executed().any(|r| r.has_changes)
    }
}

/// Result of handling one event.
#[derive(Debug)]
pub enum RunOutcome {
    /// The comment was not addressed to this tool.
    NoCommand,
    /// Nothing matched; a notice was posted for comment-triggered runs.
    NoProjects,
    Completed(RunReport),
}

/// External services a pipeline talks to.
pub struct Collaborators {
    pub runner: Arc<dyn ToolRunner>,
    pub artifacts: Arc<dyn PlanArtifactStore>,
    pub provider: Arc<dyn PullRequestProvider>,
    pub poster: Arc<dyn CommentPoster>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Comment,
    Autoplan,
}

/// Drives a run from a comment or push event to a posted report.
pub struct CommentPipeline {
    ctx: RunContext,
    grammar: CommentGrammar,
    registry: ProjectRegistry,
    executor: TerraformExecutor,
    artifacts: Arc<dyn PlanArtifactStore>,
    provider: Arc<dyn PullRequestProvider>,
    poster: Arc<dyn CommentPoster>,
    formatter: Arc<dyn ReportFormatter>,
}

impl CommentPipeline {
    pub fn new(ctx: RunContext, registry: ProjectRegistry, collaborators: Collaborators) -> Self {
        Self {
            grammar: CommentGrammar::new(ctx.trigger.clone()),
            executor: TerraformExecutor::new(collaborators.runner, ctx.clone()),
            ctx,
            registry,
            artifacts: collaborators.artifacts,
            provider: collaborators.provider,
            poster: collaborators.poster,
            formatter: Arc::new(MarkdownFormatter::default()),
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ReportFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    /// Handle a pull-request comment. Comments that are not commands are
    /// ignored without contacting the provider.
    pub async fn handle_comment(&self, comment: &str, pr: &PullRequestRef) -> Result<RunOutcome> {
        let Some(command) = self.grammar.parse(comment) else {
            debug!(pr = %pr, "comment is not a command");
            return Ok(RunOutcome::NoCommand);
        };
        self.run(command, pr, Trigger::Comment).await
    }

    /// Plan every autoplan-enabled project touched by the pull request.
    pub async fn handle_autoplan(&self, pr: &PullRequestRef) -> Result<RunOutcome> {
        let command = ParsedCommand {
            operation: Operation::Plan,
            requested_projects: Vec::new(),
            passthrough_args: Vec::new(),
        };
        self.run(command, pr, Trigger::Autoplan).await
    }

    async fn run(
        &self,
        command: ParsedCommand,
        pr: &PullRequestRef,
        trigger: Trigger,
    ) -> Result<RunOutcome> {
        let run_id = obs::new_run_id();
        let span = obs::run_span(&run_id, &pr.to_string());
        async {
            match self.run_inner(&run_id, &command, pr, trigger).await {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    error!(kind = err.kind(), error = %err, "run aborted");
                    let body = self.formatter.render_failure(pr, &err);
                    if let Err(post_err) = self.poster.post(pr, &body).await {
                        warn!(error = %post_err, "failed to post failure report");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_inner(
        &self,
        run_id: &str,
        command: &ParsedCommand,
        pr: &PullRequestRef,
        trigger: Trigger,
    ) -> Result<RunOutcome> {
        let status = self.provider.get_status(pr).await?;
        let changed_files = self.provider.list_changed_files(pr).await?;
        let filter = ChangeFilter::new(&changed_files, &status.head_branch);

        let projects = match trigger {
            Trigger::Comment => self
                .registry
                .resolve_with(&command.requested_projects, Some(&filter))?,
            Trigger::Autoplan => self.registry.resolve_autoplan(&filter),
        };

        if projects.is_empty() {
            info!(operation = %command.operation, "no projects matched");
            if trigger == Trigger::Comment {
                let body = self.formatter.render_no_projects(command.operation);
                self.poster.post(pr, &body).await?;
            }
            return Ok(RunOutcome::NoProjects);
        }

        let report = self.execute(run_id, command, projects, &status, pr).await;
        let body = self.formatter.render(&report);
        self.poster.post(pr, &body).await?;
        Ok(RunOutcome::Completed(report))
    }

    /// Run `command` over already-resolved projects against one status
    /// snapshot. Never posts.
    pub async fn execute(
        &self,
        run_id: &str,
        command: &ParsedCommand,
        projects: Vec<ProjectDefinition>,
        status: &PullRequestStatus,
        pr: &PullRequestRef,
    ) -> RunReport {
        let start = Instant::now();
        let operation = command.operation;
        obs::emit_run_started(run_id, operation, projects.len());

        let mut outcomes = Vec::with_capacity(projects.len());
        let mut remaining = projects.into_iter();

        while let Some(project) = remaining.next() {
            if let Err(reason) = RequirementGate::check(operation, &project, status) {
                obs::emit_project_skipped(&project.name, &reason);
                outcomes.push(ProjectOutcome::Skipped {
                    project: project.name,
                    reason,
                });
                continue;
            }

            let mut notices = Vec::new();
            let prior_plan = match operation {
                Operation::Apply => self.load_prior_plan(&project, &mut notices).await,
                Operation::Plan => None,
            };

            let result = self
                .executor
                .execute(
                operation,
                &project,
                &command.passthrough_args,
                prior_plan.as_deref(),
            )
                .await;

            match result {
                Ok(result) => {
                    obs::emit_project_executed(
                        &project.name,
                        operation,
                        result.exit_code,
                        result.duration_ms,
                    );
                    if let Some(plan_file) = &result.plan_artifact_path {
                        self.keep_plan(&project, plan_file, &mut notices).await;
                    }
                    if result.used_saved_plan {
                        // An applied plan is stale; the next apply needs a new plan.
                        if let Err(e) = self.artifacts.remove(&project.name).await {
                            warn!(
                                project = %project.name,
                                error = %e,
                                "failed to drop applied plan"
                            );
                        }
                    }
                    outcomes.push(ProjectOutcome::Executed { result, notices });
                }
                Err(error) => {
                    obs::emit_project_failed(&project.name, &error);
                    outcomes.push(ProjectOutcome::Failed {
                        project: project.name,
                        error,
                    });
                    outcomes.extend(
                        remaining
                            .by_ref()
                            .map(|p| ProjectOutcome::NotRun { project: p.name }),
                    );
                }
            }
        }

        let report = RunReport {
            run_id: run_id.to_string(),
            pr: pr.clone(),
            operation,
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        obs::emit_run_finished(
            run_id,
            report.duration_ms,
            report.executed_count(),
            report.skipped_count(),
            report.is_success(),
        );
        report
    }

    /// Save a fresh plan for a later apply. Failures only become notices.
    async fn keep_plan(
        &self,
        project: &ProjectDefinition,
        plan_file: &Path,
        notices: &mut Vec<String>,
    ) {
        match self.artifacts.save(&project.name, plan_file).await {
            Ok(id) => obs::emit_artifact_saved(&project.name, &id),
            Err(e) => {
                warn!(project = %project.name, error = %e, "failed to keep plan");
                notices.push(format!("The plan could not be kept for a later apply: {e}"));
            }
        }
    }

    /// Restore the reviewed plan for an apply. Any failure degrades to an
    /// apply without a plan file.
    async fn load_prior_plan(
        &self,
        project: &ProjectDefinition,
        notices: &mut Vec<String>,
    ) -> Option<PathBuf> {
        match self.artifacts.load(&project.name, &self.ctx.plan_dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                if e.is_soft() {
                    obs::emit_artifact_fallback(&project.name, &e);
                } else {
                    error!(
                        project = %project.name,
                        error = %e,
                        "plan store failed; applying without a plan"
                    );
                }
                notices.push(format!("No reviewed plan was available ({e}); applied without one."));
                None
            }
        }
    }
}
