//! tfaction core library
//!
//! Comment-driven Terraform plan/apply for pull requests: command grammar,
//! project registry, requirement gate, execution, plan artifact storage and
//! the pipeline that ties them together. Platform access lives behind the
//! traits in [`provider`].

pub mod artifact;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod gate;
pub mod obs;
pub mod pipeline;
pub mod project;
pub mod provider;
pub mod report;
pub mod telemetry;

pub use artifact::fs::FsPlanArtifactStore;
pub use artifact::{ArtifactError, ArtifactId, ArtifactKey, PlanArtifactStore};
pub use command::{parse_comment, CommentGrammar, Operation, ParsedCommand};
pub use config::{RepoConfig, DEFAULT_CONFIG_FILE};
pub use context::RunContext;
pub use error::{ActionError, ConfigError, ProviderError, Result, UnknownProjectError};
pub use executor::{
    ExecutionError, ExecutionResult, ProcessRunner, TerraformExecutor, ToolInvocation,
    ToolOutput, ToolRunner,
};
pub use gate::{GateError, GateVerdict, PullRequestStatus, RequirementGate, Violation};
pub use pipeline::{Collaborators, CommentPipeline, ProjectOutcome, RunOutcome, RunReport};
pub use project::{ChangeFilter, ProjectDefinition, ProjectRegistry, Requirement};
pub use provider::{CommentPoster, PullRequestProvider, PullRequestRef};
pub use report::{MarkdownFormatter, ReportFormatter};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
