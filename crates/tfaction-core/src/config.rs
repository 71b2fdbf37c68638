//! Repository configuration file.
//!
//! ```yaml
//! projects:
//!   - name: network
//!     dir: infra/network
//!     branch: ^main$
//!     autoplan:
//!       when_modified: ["*.tf", "modules/**/*.tf"]
//!     apply_requirements: [mergeable, approved, undiverged]
//! ```
//!
//! Keys this tool does not use are ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::project::{ProjectDefinition, ProjectRegistry};

/// Config file looked up in the workspace root.
pub const DEFAULT_CONFIG_FILE: &str = "terraform-action.yaml";

/// Name of the project used when no config file exists.
pub const DEFAULT_PROJECT_NAME: &str = "default";

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default)]
    pub projects: Vec<ProjectDefinition>,
}

impl RepoConfig {
    pub fn from_yaml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&raw, path)?;
        debug!(path = %path.display(), projects = config.projects.len(), "loaded config");
        Ok(config)
    }

    /// Like [`RepoConfig::load`], but a missing file (after also trying the
    /// `.yml` spelling) yields [`RepoConfig::default_project`]. A file that
    /// exists but does not parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match candidates(path).into_iter().find(|p| p.is_file()) {
            Some(found) => Self::load(&found),
            None => {
                warn!(
                    path = %path.display(),
                    "no config file; using a single project at the workspace root"
                );
                Ok(Self::default_project())
            }
        }
    }

    /// One project named `default` rooted at the workspace.
    pub fn default_project() -> Self {
        Self {
            projects: vec![ProjectDefinition::new(DEFAULT_PROJECT_NAME, ".")],
        }
    }

    pub fn into_registry(self) -> Result<ProjectRegistry, ConfigError> {
        ProjectRegistry::new(self.projects)
    }
}

fn candidates(path: &Path) -> Vec<PathBuf> {
    let mut out = vec![path.to_path_buf()];
    if path.extension().is_some_and(|ext| ext == "yaml") {
        out.push(path.with_extension("yml"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Requirement;

    const SAMPLE: &str = r#"
parallel_plan: true
projects:
  - name: network
    dir: infra/network
    branch: ^main$
    workflow: custom
    autoplan:
      when_modified: ["*.tf"]
      enabled: true
    apply_requirements: [mergeable, approved, undiverged]
  - name: dns
    dir: infra/dns
"#;

    #[test]
    fn test_parse_sample_ignores_unknown_keys() {
        let config = RepoConfig::from_yaml_str(SAMPLE, Path::new("t.yaml")).unwrap();
        assert_eq!(config.projects.len(), 2);

        let network = &config.projects[0];
        assert_eq!(network.branch.as_deref(), Some("^main$"));
        assert_eq!(network.change_trigger_patterns(), ["*.tf".to_string()]);
        assert_eq!(
            network.apply_requirements.as_deref(),
            Some(&[Requirement::Mergeable, Requirement::Approved, Requirement::Undiverged][..])
        );
        assert!(config.projects[1].plan_requirements.is_none());
    }

    #[test]
    fn test_unknown_requirement_is_parse_error() {
        let raw = "projects:\n  - name: a\n    dir: a\n    plan_requirements: [reviewed]\n";
        let err = RepoConfig::from_yaml_str(raw, Path::new("t.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_uses_default_project() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::load_or_default(&dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config, RepoConfig::default_project());

        let registry = config.into_registry().unwrap();
        assert_eq!(registry.names(), vec!["default".to_string()]);
    }

    #[test]
    fn test_yml_spelling_is_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("terraform-action.yml"),
            "projects:\n  - name: only\n    dir: x\n",
        )
        .unwrap();

        let config = RepoConfig::load_or_default(&dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config.projects[0].name, "only");
    }

    #[test]
    fn test_broken_file_is_error_not_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "projects: [unclosed").unwrap();
        assert!(RepoConfig::load_or_default(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let err = RepoConfig::load(Path::new("/nonexistent/terraform-action.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected_by_registry() {
        let raw = "projects:\n  - name: a\n    dir: a\n  - name: a\n    dir: b\n";
        let config = RepoConfig::from_yaml_str(raw, Path::new("t.yaml")).unwrap();
        assert!(matches!(config.into_registry(), Err(ConfigError::DuplicateName { .. })));
    }
}
