use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::NamedTempFile;

use super::{
    digest_hex, file_name_of, ArtifactError, ArtifactId, ArtifactKey, ArtifactManifest,
    ArtifactResult, PlanArtifactStore, DEFAULT_KEY_PREFIX,
};
use crate::project::safe_file_stem;

/// How long a saved plan stays loadable.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Store root used by the CLI, relative to the workspace.
pub const DEFAULT_ARTIFACT_DIR: &str = ".tfaction/artifacts";

const MANIFEST_FILE: &str = "manifest.json";
const PAYLOAD_DIR: &str = "payload";

/// Filesystem-backed plan artifact store.
///
/// Layout: `<root>/<key>/manifest.json` and `<root>/<key>/payload/<plan file>`.
/// The manifest is written last, so an entry without one is not registered.
#[derive(Debug, Clone)]
pub struct FsPlanArtifactStore {
    root: PathBuf,
    prefix: String,
    retention: Duration,
}

impl FsPlanArtifactStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> ArtifactResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(safe_file_stem(key.as_str()))
    }

    fn save_blocking(&self, project: &str, plan_file: &Path) -> ArtifactResult<ArtifactId> {
        let key = self.key_for(project);
        if !plan_file.is_file() {
            return Err(ArtifactError::Write {
                path: plan_file.to_path_buf(),
            });
        }

        let data = fs::read(plan_file)?;
        let file_name = file_name_of(plan_file)?;
        let digest = digest_hex(&data);

        let entry = self.entry_dir(&key);
        if entry.exists() {
            fs::remove_dir_all(&entry)?;
        }
        let payload_dir = entry.join(PAYLOAD_DIR);
        fs::create_dir_all(&payload_dir)?;
        write_atomic(&payload_dir.join(&file_name), &data)?;

        let manifest = ArtifactManifest {
            key: key.clone(),
            project: project.to_string(),
            file_name,
            digest: digest.clone(),
            size_bytes: data.len() as u64,
            saved_at: Utc::now(),
        };
        write_atomic(&entry.join(MANIFEST_FILE), &serde_json::to_vec_pretty(&manifest)?)?;

        Ok(ArtifactId { key, digest })
    }

    fn load_blocking(&self, project: &str, destination_dir: &Path) -> ArtifactResult<PathBuf> {
        let key = self.key_for(project);
        let entry = self.entry_dir(&key);

        let raw = match fs::read(entry.join(MANIFEST_FILE)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound { key })
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: ArtifactManifest =
            serde_json::from_slice(&raw).map_err(|e| ArtifactError::Read {
                key: key.clone(),
                reason: format!("unreadable manifest: {e}"),
            })?;

        if Utc::now() - manifest.saved_at > self.retention {
            return Err(ArtifactError::Expired {
                key,
                saved_at: manifest.saved_at,
            });
        }

        // The manifest names a single file; anything path-like is corrupt.
        let bare_name = Path::new(&manifest.file_name)
            .file_name()
            .and_then(|n| n.to_str());
        if bare_name != Some(manifest.file_name.as_str()) {
            return Err(ArtifactError::Read {
                key,
                reason: format!("invalid file name `{}`", manifest.file_name),
            });
        }

        let data = match fs::read(entry.join(PAYLOAD_DIR).join(&manifest.file_name)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::Read {
                    key,
                    reason: format!("`{}` missing from payload", manifest.file_name),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if digest_hex(&data) != manifest.digest {
            return Err(ArtifactError::Read {
                key,
                reason: "payload digest does not match manifest".to_string(),
            });
        }

        fs::create_dir_all(destination_dir)?;
        let target = destination_dir.join(&manifest.file_name);
        write_atomic(&target, &data)?;
        Ok(target)
    }

    fn remove_blocking(&self, project: &str) -> ArtifactResult<()> {
        let entry = self.entry_dir(&self.key_for(project));
        match fs::remove_dir_all(&entry) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PlanArtifactStore for FsPlanArtifactStore {
    fn key_for(&self, project: &str) -> ArtifactKey {
        ArtifactKey::for_project(&self.prefix, project)
    }

    async fn save(&self, project: &str, plan_file: &Path) -> ArtifactResult<ArtifactId> {
        let store = self.clone();
        let project = project.to_string();
        let plan_file = plan_file.to_path_buf();
        run_blocking(move || store.save_blocking(&project, &plan_file)).await
    }

    async fn load(&self, project: &str, destination_dir: &Path) -> ArtifactResult<PathBuf> {
        let store = self.clone();
        let project = project.to_string();
        let destination_dir = destination_dir.to_path_buf();
        run_blocking(move || store.load_blocking(&project, &destination_dir)).await
    }

    async fn remove(&self, project: &str) -> ArtifactResult<()> {
        let store = self.clone();
        let project = project.to_string();
        run_blocking(move || store.remove_blocking(&project)).await
    }
}

async fn run_blocking<T, F>(f: F) -> ArtifactResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ArtifactResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArtifactError::Io(std::io::Error::other(e)))?
}

/// Write via a temp file in the target's directory, then rename.
fn write_atomic(target: &Path, data: &[u8]) -> ArtifactResult<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsPlanArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPlanArtifactStore::new(dir.path().join("store")).unwrap();
        (dir, store)
    }

    fn write_plan(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn save_then_load_returns_identical_file() {
        let (dir, store) = make_store();
        let data = vec![0x1Fu8, 0x8B, 0x00, 0xFF, 0x42];
        let plan = write_plan(dir.path(), "production.tfplan", &data);

        let id = store.save("production", &plan).await.unwrap();
        assert_eq!(id.key.as_str(), "tfplan-production");
        assert_eq!(id.digest, digest_hex(&data));

        let restore_dir = dir.path().join("restore");
        let restored = store.load("production", &restore_dir).await.unwrap();
        assert_eq!(restored, restore_dir.join("production.tfplan"));
        assert_eq!(fs::read(restored).unwrap(), data);
    }

    #[tokio::test]
    async fn load_unknown_project_is_not_found() {
        let (dir, store) = make_store();
        match store.load("never-saved", dir.path()).await {
            Err(ArtifactError::NotFound { key }) => assert_eq!(key.as_str(), "tfplan-never-saved"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_missing_file_is_write_error() {
        let (dir, store) = make_store();
        let err = store
            .save("net", &dir.path().join("missing.tfplan"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Write { .. }));
        assert!(!err.is_soft());
    }

    #[tokio::test]
    async fn missing_payload_is_read_error() {
        let (dir, store) = make_store();
        let plan = write_plan(dir.path(), "net.tfplan", b"plan");
        store.save("net", &plan).await.unwrap();

        let entry = store.entry_dir(&store.key_for("net"));
        fs::remove_file(entry.join(PAYLOAD_DIR).join("net.tfplan")).unwrap();

        let err = store.load("net", dir.path()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Read { .. }));
        assert!(err.is_soft());
    }

    #[tokio::test]
    async fn tampered_payload_is_read_error() {
        let (dir, store) = make_store();
        let plan = write_plan(dir.path(), "net.tfplan", b"plan");
        store.save("net", &plan).await.unwrap();

        let entry = store.entry_dir(&store.key_for("net"));
        fs::write(entry.join(PAYLOAD_DIR).join("net.tfplan"), b"other").unwrap();

        let err = store.load("net", dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("digest"));
    }

    #[tokio::test]
    async fn expired_artifact_is_soft_failure() {
        let (dir, store) = make_store();
        let plan = write_plan(dir.path(), "net.tfplan", b"plan");
        store.save("net", &plan).await.unwrap();

        let manifest_path = store.entry_dir(&store.key_for("net")).join(MANIFEST_FILE);
        let mut manifest: ArtifactManifest =
            serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
        manifest.saved_at = Utc::now() - Duration::days(DEFAULT_RETENTION_DAYS + 1);
        fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let err = store.load("net", dir.path()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Expired { .. }));
        assert!(err.is_soft());
    }

    #[tokio::test]
    async fn save_replaces_previous_artifact() {
        let (dir, store) = make_store();
        let first = write_plan(dir.path(), "a.tfplan", b"first");
        store.save("net", &first).await.unwrap();
        let second = write_plan(dir.path(), "b.tfplan", b"second");
        store.save("net", &second).await.unwrap();

        let restored = store.load("net", &dir.path().join("out")).await.unwrap();
        assert_eq!(restored.file_name().unwrap(), "b.tfplan");
        assert_eq!(fs::read(restored).unwrap(), b"second");
    }

    #[tokio::test]
    async fn projects_do_not_share_keys() {
        let (dir, store) = make_store();
        let a = write_plan(dir.path(), "a.tfplan", b"a");
        let b = write_plan(dir.path(), "b.tfplan", b"b");
        store.save("team/a", &a).await.unwrap();
        store.save("team_a", &b).await.unwrap();

        let out = dir.path().join("out");
        assert_eq!(fs::read(store.load("team/a", &out).await.unwrap()).unwrap(), b"a");
        assert_eq!(fs::read(store.load("team_a", &out).await.unwrap()).unwrap(), b"b");
    }

    #[tokio::test]
    async fn removed_artifact_is_not_found() {
        let (dir, store) = make_store();
        let plan = write_plan(dir.path(), "net.tfplan", b"plan");
        store.save("net", &plan).await.unwrap();

        store.remove("net").await.unwrap();
        let err = store.load("net", dir.path()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));

        // Removing again is a no-op.
        store.remove("net").await.unwrap();
    }

    #[tokio::test]
    async fn custom_prefix() {
        let (_dir, store) = make_store();
        let store = store.with_prefix("pr-42");
        assert_eq!(store.key_for("net").as_str(), "pr-42-net");
    }
}
