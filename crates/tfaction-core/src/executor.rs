//! Terraform execution.
//!
//! [`ToolRunner`] is the process seam: it runs one command to completion and
//! hands back the exit code with fully buffered output. [`TerraformExecutor`]
//! builds the `init` / `plan` / `apply` invocations for a project on top of
//! it and interprets exit codes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::Operation;
use crate::context::RunContext;
use crate::project::ProjectDefinition;

/// Plan exit code meaning "succeeded, changes present" (`-detailed-exitcode`).
pub const PLAN_CHANGES_EXIT_CODE: i32 = 2;

/// One process to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl ToolInvocation {
    /// First argument, i.e. the terraform subcommand.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Errors that stop a project's execution. Any of these aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("terraform init failed for project `{project}` (exit code {exit_code})")]
    InitFailed {
        project: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("terraform {operation} failed for project `{project}` (exit code {exit_code})")]
    ToolFailed {
        project: String,
        operation: Operation,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {timeout_secs} seconds")]
    TimedOut { program: String, timeout_secs: u64 },

    #[error("failed to prepare plan directory {path}: {source}")]
    PlanDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    /// Error kind shown in reports, shared with [`crate::ActionError::kind`].
    pub fn kind(&self) -> &'static str {
        "ExecutionError"
    }

    /// Captured standard error, when the tool got far enough to produce any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ExecutionError::InitFailed { stderr, .. }
            | ExecutionError::ToolFailed { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}

/// Runs a process to completion.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExecutionError>;
}

/// [`ToolRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExecutionError> {
        let start = Instant::now();
        let program = invocation.program.to_string_lossy().to_string();

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecutionError::TimedOut {
                    program: program.clone(),
                    timeout_secs: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ExecutionError::Spawn {
            program: program.clone(),
            source,
        })?;

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Result of one primary operation on one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub project: String,
    pub operation: Operation,
    pub exit_code: i32,

    /// Plan only: the plan contains changes.
    pub has_changes: bool,
    pub stdout: String,
    pub stderr: String,

    /// Plan only: where the plan file was written.
    pub plan_artifact_path: Option<PathBuf>,

    /// Whether apply consumed a reviewed plan file.
    pub used_saved_plan: bool,
    pub duration_ms: u64,
}

/// Builds and interprets terraform invocations for a project.
pub struct TerraformExecutor {
    runner: Arc<dyn ToolRunner>,
    ctx: RunContext,
}

impl TerraformExecutor {
    pub fn new(runner: Arc<dyn ToolRunner>, ctx: RunContext) -> Self {
        Self { runner, ctx }
    }

    /// Deterministic plan file location for a project.
    pub fn plan_path(&self, project: &ProjectDefinition) -> PathBuf {
        self.ctx
            .plan_dir
            .join(format!("{}.tfplan", project.file_stem()))
    }

    /// Run `init` and then `operation` in the project's directory.
    ///
    /// For apply, `prior_plan` selects the reviewed plan file; without one
    /// the apply is auto-approved.
    pub async fn execute(
        &self,
        operation: Operation,
        project: &ProjectDefinition,
        passthrough: &[String],
        prior_plan: Option<&Path>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let working_dir = self.ctx.project_dir(&project.dir);
        let start = Instant::now();

        debug!(project = %project.name, dir = %working_dir.display(), "running terraform init");
        let init = self.invoke(&working_dir, init_args()).await?;
        if init.exit_code != 0 {
            return Err(ExecutionError::InitFailed {
                project: project.name.clone(),
                exit_code: init.exit_code,
                stdout: init.stdout,
                stderr: init.stderr,
            });
        }

        let (args, plan_path) = match operation {
            Operation::Plan => {
                let path = self.plan_path(project);
                tokio::fs::create_dir_all(&self.ctx.plan_dir)
                    .await
                    .map_err(|source| ExecutionError::PlanDirectory {
                        path: self.ctx.plan_dir.clone(),
                        source,
                    })?;
                (plan_args(&path, passthrough), Some(path))
            }
            Operation::Apply => (apply_args(prior_plan, passthrough), None),
        };

        info!(project = %project.name, operation = %operation, "running terraform");
        let output = self.invoke(&working_dir, args).await?;

        let has_changes = match (operation, output.exit_code) {
            (_, 0) => false,
            (Operation::Plan, PLAN_CHANGES_EXIT_CODE) => true,
            (_, exit_code) => {
                return Err(ExecutionError::ToolFailed {
                    project: project.name.clone(),
                    operation,
                    exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
        };

        Ok(ExecutionResult {
            project: project.name.clone(),
            operation,
            exit_code: output.exit_code,
            has_changes,
            stdout: output.stdout,
            stderr: output.stderr,
            plan_artifact_path: plan_path,
            used_saved_plan: operation == Operation::Apply && prior_plan.is_some(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn invoke(
        &self,
        working_dir: &Path,
        args: Vec<String>,
    ) -> Result<ToolOutput, ExecutionError> {
        let invocation = ToolInvocation {
            program: self.ctx.terraform_bin.clone(),
            args,
            working_dir: working_dir.to_path_buf(),
            timeout: self.ctx.timeout,
        };
        self.runner.run(&invocation).await
    }
}

fn init_args() -> Vec<String> {
    vec!["init".into(), "-input=false".into(), "-no-color".into()]
}

fn plan_args(out: &Path, passthrough: &[String]) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "plan".into(),
        "-input=false".into(),
        "-no-color".into(),
        "-detailed-exitcode".into(),
        format!("-out={}", out.display()),
    ];
    args.extend(passthrough.iter().cloned());
    args
}

/// Terraform stops reading flags at the plan file, so it goes last.
fn apply_args(plan: Option<&Path>, passthrough: &[String]) -> Vec<String> {
    let mut args: Vec<String> = vec!["apply".into(), "-input=false".into(), "-no-color".into()];
    if plan.is_none() {
        args.push("-auto-approve".into());
    }
    args.extend(passthrough.iter().cloned());
    if let Some(plan) = plan {
        args.push(plan.display().to_string());
    }
    args
}
