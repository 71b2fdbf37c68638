//! Error taxonomy for the comment-driven pipeline.

use std::path::PathBuf;

use crate::executor::ExecutionError;

/// Errors raised while loading or validating project configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("project at index {index} has an empty name")]
    EmptyName { index: usize },

    #[error("project `{name}` has an empty dir")]
    EmptyDir { name: String },

    #[error("duplicate project name: {name}")]
    DuplicateName { name: String },

    #[error("project `{name}` has an invalid branch pattern: {source}")]
    InvalidBranchPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("project `{name}` has an invalid when_modified pattern `{pattern}`: {source}")]
    InvalidTriggerPattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A requested project name or directory has no configured definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("project `{requested}` is not configured (available: {})", .available.join(", "))]
pub struct UnknownProjectError {
    pub requested: String,
    pub available: Vec<String>,
}

/// Failure reported by an external collaborator (pull-request API, comment poster).
#[derive(Debug, thiserror::Error)]
#[error("{context}: {source}")]
pub struct ProviderError {
    pub context: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ProviderError {
    pub fn new(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Run-level errors. Everything here ends the run.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    UnknownProject(#[from] UnknownProjectError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ActionError {
    /// Short error kind shown in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Config(_) => "ConfigError",
            ActionError::UnknownProject(_) => "ConfigLookupError",
            ActionError::Execution(e) => e.kind(),
            ActionError::Provider(_) => "ProviderError",
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ActionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_project_lists_available() {
        let err = UnknownProjectError {
            requested: "prod".to_string(),
            available: vec!["staging".to_string(), "dev".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("`prod`"));
        assert!(msg.contains("staging, dev"));
    }

    #[test]
    fn test_action_error_kind() {
        let err: ActionError = UnknownProjectError {
            requested: "x".to_string(),
            available: vec![],
        }
        .into();
        assert_eq!(err.kind(), "ConfigLookupError");

        let err: ActionError = ConfigError::DuplicateName {
            name: "x".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("duplicate project name"));

        let err: ActionError = ExecutionError::TimedOut {
            program: "terraform".to_string(),
            timeout_secs: 30,
        }
        .into();
        assert_eq!(err.kind(), "ExecutionError");
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::new("fetch pull request", "404 Not Found");
        assert_eq!(err.to_string(), "fetch pull request: 404 Not Found");
    }
}
