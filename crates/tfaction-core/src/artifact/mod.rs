//! Plan artifact storage.
//!
//! A plan file produced by `plan` is saved under a key derived only from the
//! project name (`<prefix>-<project>`), so a later `apply` of the same
//! project finds it without any other correlation token. Load failures are
//! soft: the caller falls back to an unreviewed apply.

pub mod fs;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "tfplan";

/// Lookup key of a project's plan artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn for_project(prefix: &str, project: &str) -> Self {
        Self(format!("{prefix}-{project}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a saved artifact: its key plus the SHA-256 of the plan bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactId {
    pub key: ArtifactKey,
    pub digest: String,
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, &self.digest[..12.min(self.digest.len())])
    }
}

/// Errors from artifact operations.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("cannot save plan artifact: {path} does not exist")]
    Write { path: PathBuf },

    #[error("no plan artifact registered under `{key}`")]
    NotFound { key: ArtifactKey },

    #[error("plan artifact `{key}` expired (saved at {saved_at})")]
    Expired {
        key: ArtifactKey,
        saved_at: DateTime<Utc>,
    },

    #[error("plan artifact `{key}` is unusable: {reason}")]
    Read { key: ArtifactKey, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArtifactError {
    /// Whether an apply may proceed without the artifact.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ArtifactError::NotFound { .. }
                | ArtifactError::Expired { .. }
                | ArtifactError::Read { .. }
        )
    }
}

pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

/// Named blob store for plan files.
#[async_trait]
pub trait PlanArtifactStore: Send + Sync {
    /// Key used for `project`.
    fn key_for(&self, project: &str) -> ArtifactKey;

    /// Store the plan file at `plan_file` for `project`, replacing any
    /// previous artifact. Fails with [`ArtifactError::Write`] when the file
    /// does not exist.
    async fn save(&self, project: &str, plan_file: &Path) -> ArtifactResult<ArtifactId>;

    /// Restore the artifact of `project` into `destination_dir` and return
    /// the restored file path.
    async fn load(&self, project: &str, destination_dir: &Path) -> ArtifactResult<PathBuf>;

    /// Forget the artifact of `project`. Removing nothing is not an error.
    async fn remove(&self, project: &str) -> ArtifactResult<()>;
}

/// Metadata stored next to each artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub key: ArtifactKey,
    pub project: String,
    pub file_name: String,
    pub digest: String,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
}

pub(crate) fn digest_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// File name of `path`, or an error naming the path when it has none.
pub(crate) fn file_name_of(path: &Path) -> ArtifactResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ArtifactError::Write {
            path: path.to_path_buf(),
        })
}
