//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `ScriptedRunner`, `MemoryPlanArtifactStore`,
//! `StaticPullRequestProvider`, and `RecordingCommentPoster` so the pipeline
//! can be driven without terraform or a hosting platform.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::artifact::{
    digest_hex, file_name_of, ArtifactError, ArtifactId, ArtifactKey, ArtifactResult,
    PlanArtifactStore, DEFAULT_KEY_PREFIX,
};
use crate::error::ProviderError;
use crate::executor::{
    ExecutionError, ToolInvocation, ToolOutput, ToolRunner, PLAN_CHANGES_EXIT_CODE,
};
use crate::gate::PullRequestStatus;
use crate::provider::{CommentPoster, PullRequestProvider, PullRequestRef};

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Tool runner that answers by subcommand and records every invocation.
///
/// Unscripted subcommands succeed with empty output. A successful `plan`
/// writes a small file at its `-out=` path, like the real tool does.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, ToolOutput>,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `subcommand` invocation with the given result.
    pub fn respond(mut self, subcommand: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.responses.insert(
            subcommand.to_string(),
            ToolOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                duration_ms: 0,
            },
        );
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Invocations of one subcommand, in call order.
    pub fn calls_to(&self, subcommand: &str) -> Vec<ToolInvocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.subcommand() == Some(subcommand))
            .collect()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExecutionError> {
        self.invocations.lock().unwrap().push(invocation.clone());

        let subcommand = invocation.subcommand().unwrap_or_default();
        let output = self.responses.get(subcommand).cloned().unwrap_or_default();

        if subcommand == "plan" && matches!(output.exit_code, 0 | PLAN_CHANGES_EXIT_CODE) {
            let out = invocation
                .args
                .iter()
                .find_map(|a| a.strip_prefix("-out="))
                .map(PathBuf::from);
            if let Some(out) = out {
                let body = format!("plan for {}", invocation.working_dir.display());
                fs::write(&out, body).map_err(|source| ExecutionError::Spawn {
                    program: invocation.program.display().to_string(),
                    source,
                })?;
            }
        }

        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// MemoryPlanArtifactStore
// ---------------------------------------------------------------------------

/// In-memory plan store backed by a `HashMap<key, (file name, bytes)>`.
#[derive(Debug)]
pub struct MemoryPlanArtifactStore {
    prefix: String,
    blobs: Mutex<HashMap<String, (String, Vec<u8>)>>,
    fail_saves: bool,
}

impl Default for MemoryPlanArtifactStore {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            blobs: Mutex::new(HashMap::new()),
            fail_saves: false,
        }
    }
}

impl MemoryPlanArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every save fails with an I/O error.
    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    /// Seed an artifact directly.
    pub fn insert(&self, project: &str, file_name: &str, data: &[u8]) {
        let key = self.key_for(project);
        self.blobs
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), (file_name.to_string(), data.to_vec()));
    }

    pub fn contains(&self, project: &str) -> bool {
        let key = self.key_for(project);
        self.blobs.lock().unwrap().contains_key(key.as_str())
    }
}

#[async_trait]
impl PlanArtifactStore for MemoryPlanArtifactStore {
    fn key_for(&self, project: &str) -> ArtifactKey {
        ArtifactKey::for_project(&self.prefix, project)
    }

    async fn save(&self, project: &str, plan_file: &Path) -> ArtifactResult<ArtifactId> {
        if self.fail_saves {
            return Err(ArtifactError::Io(std::io::Error::other("store unavailable")));
        }
        if !plan_file.is_file() {
            return Err(ArtifactError::Write {
                path: plan_file.to_path_buf(),
            });
        }
        let data = fs::read(plan_file)?;
        let file_name = file_name_of(plan_file)?;
        let key = self.key_for(project);
        let digest = digest_hex(&data);
        self.blobs
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), (file_name, data));
        Ok(ArtifactId { key, digest })
    }

    async fn load(&self, project: &str, destination_dir: &Path) -> ArtifactResult<PathBuf> {
        let key = self.key_for(project);
        let (file_name, data) = self
            .blobs
            .lock()
            .unwrap()
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound { key: key.clone() })?;
        fs::create_dir_all(destination_dir)?;
        let target = destination_dir.join(file_name);
        fs::write(&target, data)?;
        Ok(target)
    }

    async fn remove(&self, project: &str) -> ArtifactResult<()> {
        let key = self.key_for(project);
        self.blobs.lock().unwrap().remove(key.as_str());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticPullRequestProvider
// ---------------------------------------------------------------------------

/// Provider returning a fixed snapshot, or failing every call.
#[derive(Debug, Default)]
pub struct StaticPullRequestProvider {
    status: PullRequestStatus,
    changed_files: Vec<String>,
    unavailable: bool,
    status_calls: AtomicUsize,
}

impl StaticPullRequestProvider {
    pub fn new(status: PullRequestStatus, changed_files: &[&str]) -> Self {
        Self {
            status,
            changed_files: changed_files.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PullRequestProvider for StaticPullRequestProvider {
    async fn get_status(&self, _pr: &PullRequestRef) -> Result<PullRequestStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(ProviderError::new("fetching pull request", "service unavailable"));
        }
        Ok(self.status.clone())
    }

    async fn list_changed_files(&self, _pr: &PullRequestRef) -> Result<Vec<String>, ProviderError> {
        if self.unavailable {
            return Err(ProviderError::new("listing changed files", "service unavailable"));
        }
        Ok(self.changed_files.clone())
    }
}

// ---------------------------------------------------------------------------
// RecordingCommentPoster
// ---------------------------------------------------------------------------

/// Comment poster that keeps every posted body.
#[derive(Debug, Default)]
pub struct RecordingCommentPoster {
    posted: Mutex<Vec<(PullRequestRef, String)>>,
}

impl RecordingCommentPoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<PullRequestRef> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|(pr, _)| pr.clone())
            .collect()
    }
}

#[async_trait]
impl CommentPoster for RecordingCommentPoster {
    async fn post(&self, pr: &PullRequestRef, body: &str) -> Result<(), ProviderError> {
        self.posted
            .lock()
            .unwrap()
            .push((pr.clone(), body.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_runner_defaults_to_success() {
        let runner = ScriptedRunner::new();
        let invocation = ToolInvocation {
            program: PathBuf::from("terraform"),
            args: vec!["init".into()],
            working_dir: PathBuf::from("."),
            timeout: None,
        };
        let output = runner.run(&invocation).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(runner.calls_to("init").len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let plan = dir.path().join("net.tfplan");
        fs::write(&plan, b"plan").unwrap();

        let store = MemoryPlanArtifactStore::new();
        store.save("net", &plan).await.unwrap();
        assert!(store.contains("net"));

        let restored = store.load("net", &dir.path().join("out")).await.unwrap();
        assert_eq!(fs::read(restored).unwrap(), b"plan");
        assert!(matches!(
            store.load("other", dir.path()).await,
            Err(ArtifactError::NotFound { .. })
        ));
    }
}
