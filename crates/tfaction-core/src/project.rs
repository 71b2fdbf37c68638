//! Project definitions and scope resolution.
//!
//! A [`ProjectRegistry`] owns the validated project list and answers "which
//! projects does this run touch?" for both explicit comment requests and
//! change-driven (autoplan) runs.
//!
//! Matching rules:
//! - a requested token matches a project by name first, then by directory;
//! - directories are compared after normalisation (`./infra/prod/` and
//!   `infra/prod` are the same) and containment is checked per path
//!   component, so `infra/prod` does not contain `infra/production/main.tf`;
//! - branch patterns are regular expressions searched anywhere in the branch
//!   name. Anchor with `^...$` and escape metacharacters with `\` for an
//!   exact match.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::command::Operation;
use crate::error::{ConfigError, UnknownProjectError};

/// Named pre-condition on the pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Mergeable,
    Approved,
    Undiverged,
}

impl Requirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Requirement::Mergeable => "mergeable",
            Requirement::Approved => "approved",
            Requirement::Undiverged => "undiverged",
        }
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change-driven planning settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoplan {
    /// Globs relative to the project directory. Empty means any file under it.
    #[serde(default)]
    pub when_modified: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// One configured Terraform root module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDefinition {
    pub name: String,

    /// Directory relative to the workspace root.
    pub dir: String,

    /// Regular expression the head branch must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoplan: Option<Autoplan>,

    /// Explicit plan requirements. `None` selects the default set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_requirements: Option<Vec<Requirement>>,

    /// Explicit apply requirements. `None` selects the default set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_requirements: Option<Vec<Requirement>>,
}

impl ProjectDefinition {
    pub fn new(name: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            branch: None,
            autoplan: None,
            plan_requirements: None,
            apply_requirements: None,
        }
    }

    pub fn with_branch(mut self, pattern: impl Into<String>) -> Self {
        self.branch = Some(pattern.into());
        self
    }

    pub fn with_when_modified(mut self, patterns: &[&str]) -> Self {
        self.autoplan = Some(Autoplan {
            when_modified: patterns.iter().map(|p| p.to_string()).collect(),
            enabled: true,
        });
        self
    }

    pub fn with_autoplan_disabled(mut self) -> Self {
        let mut autoplan = self.autoplan.take().unwrap_or(Autoplan {
            when_modified: Vec::new(),
            enabled: true,
        });
        autoplan.enabled = false;
        self.autoplan = Some(autoplan);
        self
    }

    pub fn with_plan_requirements(mut self, requirements: &[Requirement]) -> Self {
        self.plan_requirements = Some(requirements.to_vec());
        self
    }

    pub fn with_apply_requirements(mut self, requirements: &[Requirement]) -> Self {
        self.apply_requirements = Some(requirements.to_vec());
        self
    }

    /// The explicitly configured requirements for `operation`, if any.
    pub fn requirements_for(&self, operation: Operation) -> Option<&[Requirement]> {
        match operation {
            Operation::Plan => self.plan_requirements.as_deref(),
            Operation::Apply => self.apply_requirements.as_deref(),
        }
    }

    pub fn change_trigger_patterns(&self) -> &[String] {
        self.autoplan
            .as_ref()
            .map(|a| a.when_modified.as_slice())
            .unwrap_or(&[])
    }

    pub fn autoplan_enabled(&self) -> bool {
        self.autoplan.as_ref().map_or(true, |a| a.enabled)
    }

    /// File-system safe stem derived from the project name.
    pub fn file_stem(&self) -> String {
        safe_file_stem(&self.name)
    }
}

/// Map an arbitrary name onto `[A-Za-z0-9._-]`. Names that had to be
/// rewritten get a short digest suffix so distinct names stay distinct.
pub fn safe_file_stem(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized == name && !name.is_empty() && name != "." && name != ".." {
        return sanitized;
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{}-{}", sanitized, &digest[..8])
}

/// Inputs for change-driven filtering.
#[derive(Debug, Clone, Copy)]
pub struct ChangeFilter<'a> {
    pub changed_files: &'a [String],
    pub branch: &'a str,
}

impl<'a> ChangeFilter<'a> {
    pub fn new(changed_files: &'a [String], branch: &'a str) -> Self {
        Self {
            changed_files,
            branch,
        }
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    project: ProjectDefinition,
    dir: PathBuf,
    branch: Option<Regex>,
    triggers: Vec<Regex>,
}

impl RegistryEntry {
    fn admits(&self, filter: &ChangeFilter<'_>) -> bool {
        if let Some(pattern) = &self.branch {
            if !pattern.is_match(filter.branch) {
                return false;
            }
        }
        filter.changed_files.is_empty() || filter.changed_files.iter().any(|f| self.touches(f))
    }

    fn touches(&self, file: &str) -> bool {
        let path = normalize_path(file);
        let Ok(relative) = path.strip_prefix(&self.dir) else {
            return false;
        };
        if self.triggers.is_empty() {
            return true;
        }
        let relative = relative.to_string_lossy();
        self.triggers.iter().any(|glob| glob.is_match(&relative))
    }
}

/// Validated, immutable set of configured projects.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    entries: Vec<RegistryEntry>,
}

impl ProjectRegistry {
    /// Validate and index `projects`. Names must be non-empty and unique,
    /// directories non-empty, and every pattern must compile.
    pub fn new(projects: Vec<ProjectDefinition>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(projects.len());

        for (index, project) in projects.into_iter().enumerate() {
            if project.name.trim().is_empty() {
                return Err(ConfigError::EmptyName { index });
            }
            if project.dir.trim().is_empty() {
                return Err(ConfigError::EmptyDir { name: project.name });
            }
            if !seen.insert(project.name.clone()) {
                return Err(ConfigError::DuplicateName { name: project.name });
            }

            let branch = match &project.branch {
                Some(pattern) => Some(Regex::new(pattern).map_err(|source| {
                    ConfigError::InvalidBranchPattern {
                        name: project.name.clone(),
                        source,
                    }
                })?),
                None => None,
            };

            let triggers = project
                .change_trigger_patterns()
                .iter()
                .map(|pattern| {
                    glob_to_regex(pattern).map_err(|source| ConfigError::InvalidTriggerPattern {
                        name: project.name.clone(),
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            entries.push(RegistryEntry {
                dir: normalize_path(&project.dir),
                project,
                branch,
                triggers,
            });
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ProjectDefinition> {
        self.entries
            .iter()
            .map(|e| &e.project)
            .find(|p| p.name == name)
    }

    /// Configured names, in configuration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.project.name.clone()).collect()
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectDefinition> {
        self.entries.iter().map(|e| &e.project)
    }

    /// Resolve an explicit request with no change filtering.
    ///
    /// Empty `requested` yields every project in configuration order;
    /// otherwise the matches come back in requested order.
    pub fn resolve(
        &self,
        requested: &[String],
    ) -> Result<Vec<ProjectDefinition>, UnknownProjectError> {
        self.resolve_with(requested, None)
    }

    /// Resolve a request, applying `filter` only when nothing was requested
    /// by name. Named requests are always honoured exactly.
    pub fn resolve_with(
        &self,
        requested: &[String],
        filter: Option<&ChangeFilter<'_>>,
    ) -> Result<Vec<ProjectDefinition>, UnknownProjectError> {
        if requested.is_empty() {
            return Ok(self
                .entries
                .iter()
                .filter(|e| filter.map_or(true, |f| e.admits(f)))
                .map(|e| e.project.clone())
                .collect());
        }

        let mut resolved: Vec<ProjectDefinition> = Vec::new();
        for token in requested {
            let matches = self.lookup(token);
            if matches.is_empty() {
                return Err(UnknownProjectError {
                    requested: token.clone(),
                    available: self.names(),
                });
            }
            for entry in matches {
                if !resolved.iter().any(|p| p.name == entry.project.name) {
                    resolved.push(entry.project.clone());
                }
            }
        }
        Ok(resolved)
    }

    /// Projects a change set should plan automatically.
    pub fn resolve_autoplan(&self, filter: &ChangeFilter<'_>) -> Vec<ProjectDefinition> {
        self.entries
            .iter()
            .filter(|e| e.project.autoplan_enabled() && e.admits(filter))
            .map(|e| e.project.clone())
            .collect()
    }

    fn lookup(&self, token: &str) -> Vec<&RegistryEntry> {
        if let Some(entry) = self.entries.iter().find(|e| e.project.name == token) {
            return vec![entry];
        }
        let dir = normalize_path(token);
        self.entries.iter().filter(|e| e.dir == dir).collect()
    }
}

/// Drop `.` and root components so equivalent spellings compare equal.
fn normalize_path(raw: &str) -> PathBuf {
    Path::new(raw.trim())
        .components()
        .filter(|c| !matches!(c, Component::CurDir | Component::RootDir))
        .collect()
}

/// Translate a `when_modified` glob into an anchored regex.
/// `**/` spans zero or more directories, `*` and `?` stay inside one component.
fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    let mut chars = glob.trim().trim_start_matches("./").chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    pattern.push_str("(?:.*/)?");
                } else {
                    pattern.push_str(".*");
                }
            }
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }

    pattern.push('$');
    Regex::new(&pattern)
}
