//! Run context: everything a run needs from its environment, resolved once
//! at process start and passed by reference from there on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::DEFAULT_KEY_PREFIX;
use crate::command::DEFAULT_TRIGGER;

/// Directory under the workspace root that receives plan files.
pub const DEFAULT_PLAN_DIR: &str = ".tfaction/plans";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Checkout root; project directories are relative to it.
    pub workspace_root: PathBuf,

    /// Where plan files are written and restored. Anchored at
    /// `workspace_root`, so it names the same place from every project dir.
    pub plan_dir: PathBuf,

    /// Terraform executable (name on `PATH` or absolute path).
    pub terraform_bin: PathBuf,

    /// Upper bound for a single tool invocation. `None` means unbounded.
    pub timeout: Option<Duration>,

    /// Prefix of plan artifact keys (`<prefix>-<project>`).
    pub artifact_prefix: String,

    /// Marker word that starts a command comment.
    pub trigger: String,
}

impl RunContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        Self {
            plan_dir: workspace_root.join(DEFAULT_PLAN_DIR),
            workspace_root,
            terraform_bin: PathBuf::from("terraform"),
            timeout: None,
            artifact_prefix: DEFAULT_KEY_PREFIX.to_string(),
            trigger: DEFAULT_TRIGGER.to_string(),
        }
    }

    /// Relative directories are taken against the workspace root.
    pub fn with_plan_dir(mut self, plan_dir: impl AsRef<Path>) -> Self {
        self.plan_dir = self.workspace_root.join(plan_dir);
        self
    }

    pub fn with_terraform_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.terraform_bin = bin.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_artifact_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.artifact_prefix = prefix.into();
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = trigger.into();
        self
    }

    /// Absolute-or-workspace-relative directory of a project.
    pub fn project_dir(&self, dir: &str) -> PathBuf {
        self.workspace_root.join(Path::new(dir))
    }
}
