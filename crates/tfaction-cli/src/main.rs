//! tfaction - comment-driven Terraform for pull requests
//!
//! ## Commands
//!
//! - `comment`: handle an `issue_comment` event (`terraform plan|apply ...`)
//! - `autoplan`: plan the projects a pull request touches
//! - `parse`: show how a comment would be interpreted, without side effects

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use tfaction_core::artifact::fs::{DEFAULT_ARTIFACT_DIR, DEFAULT_RETENTION_DAYS};
use tfaction_core::artifact::DEFAULT_KEY_PREFIX;
use tfaction_core::command::DEFAULT_TRIGGER;
use tfaction_core::telemetry::{init_tracing, LogFormat};
use tfaction_core::{
    ActionError, Collaborators, CommentGrammar, CommentPipeline, CommentPoster,
    FsPlanArtifactStore, MarkdownFormatter, ProcessRunner, ProjectRegistry, PullRequestRef,
    RepoConfig, ReportFormatter, RunContext, RunOutcome, DEFAULT_CONFIG_FILE,
};
use tfaction_github::{split_repository, CommentEvent, GithubClient, GithubConfig, DEFAULT_API_URL};

#[derive(Parser)]
#[command(name = "tfaction")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run terraform plan/apply from pull-request comments", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a pull-request comment event
    Comment {
        /// Path to the webhook event payload
        #[arg(long, env = "GITHUB_EVENT_PATH")]
        event_path: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Plan every project touched by a pull request
    Autoplan {
        /// Pull request number
        #[arg(long)]
        pr: u64,

        /// Repository as owner/name
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repo: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the command a comment would trigger, as JSON
    Parse {
        /// Comment body
        comment: String,

        /// Trigger word
        #[arg(long, default_value = DEFAULT_TRIGGER)]
        trigger: String,
    },
}

/// Settings shared by the commands that execute terraform.
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Repository checkout root
    #[arg(long, env = "GITHUB_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Project configuration file (default: <workspace>/terraform-action.yaml)
    #[arg(long, env = "TFACTION_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// GitHub API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Terraform binary
    #[arg(long, env = "TFACTION_TERRAFORM_BIN", default_value = "terraform")]
    terraform_bin: PathBuf,

    /// Per-invocation timeout in seconds (unbounded when omitted)
    #[arg(long, env = "TFACTION_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Where plan files are written, relative to the workspace (default: .tfaction/plans)
    #[arg(long, env = "TFACTION_PLAN_DIR")]
    plan_dir: Option<PathBuf>,

    /// Plan artifact store root (default: <workspace>/.tfaction/artifacts)
    #[arg(long, env = "TFACTION_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Artifact key prefix
    #[arg(long, env = "TFACTION_ARTIFACT_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    artifact_prefix: String,

    /// Days a saved plan stays usable for apply
    #[arg(long, env = "TFACTION_RETENTION_DAYS", default_value_t = DEFAULT_RETENTION_DAYS)]
    retention_days: i64,

    /// Word that starts a command comment
    #[arg(long, env = "TFACTION_TRIGGER", default_value = DEFAULT_TRIGGER)]
    trigger: String,
}

impl RunArgs {
    fn context(&self) -> Result<RunContext> {
        let workspace = self
            .workspace
            .canonicalize()
            .with_context(|| format!("Workspace {} not found", self.workspace.display()))?;

        let mut ctx = RunContext::new(&workspace)
            .with_terraform_bin(&self.terraform_bin)
            .with_timeout(self.timeout_secs.map(Duration::from_secs))
            .with_artifact_prefix(&self.artifact_prefix)
            .with_trigger(&self.trigger);
        if let Some(plan_dir) = &self.plan_dir {
            ctx = ctx.with_plan_dir(plan_dir);
        }
        Ok(ctx)
    }

    fn config_path(&self, ctx: &RunContext) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| ctx.workspace_root.join(DEFAULT_CONFIG_FILE))
    }

    fn artifact_store(&self, ctx: &RunContext) -> Result<FsPlanArtifactStore> {
        let root = self
            .artifact_dir
            .clone()
            .unwrap_or_else(|| ctx.workspace_root.join(DEFAULT_ARTIFACT_DIR));
        let store = FsPlanArtifactStore::new(&root)
            .with_context(|| format!("Failed to open artifact store at {}", root.display()))?
            .with_prefix(ctx.artifact_prefix.clone())
            .with_retention(chrono::Duration::days(self.retention_days));
        Ok(store)
    }

    fn github(&self) -> Result<Arc<GithubClient>> {
        let mut config = GithubConfig::new(&self.api_url);
        if let Some(token) = &self.token {
            config = config.with_token(token);
        }
        let client = GithubClient::new(config).context("Failed to create GitHub client")?;
        Ok(Arc::new(client))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Comment { event_path, run } => cmd_comment(&event_path, &run).await,
        Commands::Autoplan { pr, repo, run } => cmd_autoplan(pr, &repo, &run).await,
        Commands::Parse { comment, trigger } => cmd_parse(&comment, &trigger),
    }
}

async fn cmd_comment(event_path: &Path, run: &RunArgs) -> Result<()> {
    let payload = std::fs::read(event_path)
        .with_context(|| format!("Failed to read event payload {}", event_path.display()))?;
    let event = CommentEvent::from_payload(&payload).context("Failed to parse comment event")?;
    if !event.is_created() {
        info!(action = %event.action, "ignoring comment that was not newly created");
        return Ok(());
    }
    info!(pr = %event.pr, author = %event.author, "handling comment");

    let github = run.github()?;
    let pipeline = build_pipeline(run, github, &event.pr).await?;
    let outcome = pipeline.handle_comment(&event.body, &event.pr).await;
    finish(outcome)
}

async fn cmd_autoplan(number: u64, repo: &str, run: &RunArgs) -> Result<()> {
    let (owner, name) = split_repository(repo)?;
    let pr = PullRequestRef::new(owner, name, number);
    info!(pr = %pr, "autoplan");

    let github = run.github()?;
    let pipeline = build_pipeline(run, github, &pr).await?;
    let outcome = pipeline.handle_autoplan(&pr).await;
    finish(outcome)
}

fn cmd_parse(comment: &str, trigger: &str) -> Result<()> {
    let parsed = CommentGrammar::new(trigger).parse(comment);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

/// Wire the pipeline. A broken configuration is reported on the pull
/// request before failing, like any other fatal run error.
async fn build_pipeline(
    run: &RunArgs,
    github: Arc<GithubClient>,
    pr: &PullRequestRef,
) -> Result<CommentPipeline> {
    let ctx = run.context()?;
    let registry = match load_registry(&run.config_path(&ctx)) {
        Ok(registry) => registry,
        Err(err) => {
            let body = MarkdownFormatter::default().render_failure(pr, &err);
            if let Err(post_err) = github.post(pr, &body).await {
                warn!(error = %post_err, "failed to post failure report");
            }
            return Err(err).context("Invalid project configuration");
        }
    };
    info!(projects = registry.len(), "loaded project configuration");

    let artifacts = Arc::new(run.artifact_store(&ctx)?);
    Ok(CommentPipeline::new(
        ctx,
        registry,
        Collaborators {
            runner: Arc::new(ProcessRunner),
            artifacts,
            provider: github.clone(),
            poster: github,
        },
    ))
}

fn load_registry(path: &Path) -> std::result::Result<ProjectRegistry, ActionError> {
    Ok(RepoConfig::load_or_default(path)?.into_registry()?)
}

/// Map a run outcome to the process result. Only fatal errors fail.
fn finish(outcome: tfaction_core::Result<RunOutcome>) -> Result<()> {
    match outcome? {
        RunOutcome::NoCommand => info!("comment is not a command"),
        RunOutcome::NoProjects => info!("no projects matched"),
        RunOutcome::Completed(report) => {
            info!(
                run_id = %report.run_id,
                executed = report.executed_count(),
                skipped = report.skipped_count(),
                changes = report.has_changes(),
                "run finished"
            );
            if let Some(err) = report.fatal_error() {
                bail!("Run failed: {err}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_autoplan() {
        let cli = Cli::try_parse_from([
            "tfaction",
            "--json",
            "autoplan",
            "--pr",
            "12",
            "--repo",
            "acme/infra",
            "--timeout-secs",
            "600",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Autoplan { pr, repo, run } => {
                assert_eq!(pr, 12);
                assert_eq!(repo, "acme/infra");
                assert_eq!(run.timeout_secs, Some(600));
                assert_eq!(run.retention_days, DEFAULT_RETENTION_DAYS);
            }
            _ => panic!("expected autoplan"),
        }
    }

    #[test]
    fn test_cli_parse_subcommand() {
        let cli = Cli::try_parse_from(["tfaction", "parse", "terraform plan -p net"]).unwrap();
        assert!(matches!(cli.command, Commands::Parse { .. }));
        assert!(cmd_parse("terraform plan -p net", DEFAULT_TRIGGER).is_ok());
    }

    #[test]
    fn test_context_from_args() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "tfaction",
            "autoplan",
            "--pr",
            "1",
            "--repo",
            "acme/infra",
            "--workspace",
            dir.path().to_str().unwrap(),
            "--trigger",
            "tf",
            "--artifact-prefix",
            "pr",
        ])
        .unwrap();
        let Commands::Autoplan { run, .. } = cli.command else {
            panic!("expected autoplan");
        };

        let ctx = run.context().unwrap();
        assert_eq!(ctx.trigger, "tf");
        assert_eq!(ctx.timeout, None);
        assert_eq!(run.config_path(&ctx), ctx.workspace_root.join(DEFAULT_CONFIG_FILE));

        let store = run.artifact_store(&ctx).unwrap();
        assert!(store.root().ends_with(DEFAULT_ARTIFACT_DIR));
    }

    #[test]
    fn test_relative_plan_dir_resolves_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "tfaction",
            "autoplan",
            "--pr",
            "1",
            "--repo",
            "acme/infra",
            "--workspace",
            dir.path().to_str().unwrap(),
            "--plan-dir",
            "pr-plans",
        ])
        .unwrap();
        let Commands::Autoplan { run, .. } = cli.command else {
            panic!("expected autoplan");
        };

        let ctx = run.context().unwrap();
        assert!(ctx.plan_dir.is_absolute());
        assert_eq!(ctx.plan_dir, ctx.workspace_root.join("pr-plans"));
    }

    #[test]
    fn test_missing_config_falls_back_to_default_project() {
        let dir = tempfile::tempdir().unwrap();
        let registry = load_registry(&dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(registry.names(), vec!["default".to_string()]);
    }
}
