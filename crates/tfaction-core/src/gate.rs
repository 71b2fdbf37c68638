//! Requirement gate: decides whether a project may run an operation against
//! the current pull-request snapshot.
//!
//! All configured requirements are evaluated and every violation is
//! reported, so a reviewer sees the full list of what is missing at once.
//! Applying a pull request that comes from a fork is refused before any
//! requirement is looked at and cannot be relaxed by configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::command::Operation;
use crate::project::{ProjectDefinition, Requirement};

/// Point-in-time view of the pull request, fetched once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub mergeable: bool,
    pub approved: bool,
    pub diverged: bool,
    pub is_fork: bool,
    pub head_sha: String,
    pub head_branch: String,
}

/// A single unmet requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub requirement: Requirement,
    pub reason: String,
}

/// Outcome of evaluating a requirement set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Violations found (empty when passed).
    pub violations: Vec<Violation>,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.reason.clone()).collect()
    }
}

/// Why a project was not allowed to run. Both variants skip the project
/// without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("requirements not met for project `{project}`: {}", .reasons.join("; "))]
    RequirementsNotMet { project: String, reasons: Vec<String> },

    #[error("apply refused for project `{project}`: pull request comes from a fork")]
    ForkBlocked { project: String },
}

impl GateError {
    pub fn project(&self) -> &str {
        match self {
            GateError::RequirementsNotMet { project, .. } | GateError::ForkBlocked { project } => {
                project
            }
        }
    }
}

/// Requirements applied when a project configures none for the operation.
pub fn default_requirements(operation: Operation) -> &'static [Requirement] {
    match operation {
        Operation::Plan => &[Requirement::Mergeable],
        Operation::Apply => &[Requirement::Mergeable, Requirement::Approved],
    }
}

/// Requirement gate rules.
pub struct RequirementGate;

impl RequirementGate {
    /// The requirement set that governs `operation` for `project`.
    pub fn requirements(
        operation: Operation,
        project: &ProjectDefinition,
    ) -> BTreeSet<Requirement> {
        project
            .requirements_for(operation)
            .unwrap_or_else(|| default_requirements(operation))
            .iter()
            .copied()
            .collect()
    }

    /// Evaluate every requirement in `requirements` against `pr`.
    pub fn evaluate(requirements: &BTreeSet<Requirement>, pr: &PullRequestStatus) -> GateVerdict {
        let violations = requirements
            .iter()
            .filter_map(|requirement| {
                let reason = match requirement {
                    Requirement::Mergeable if !pr.mergeable => "pull request is not mergeable",
                    Requirement::Approved if !pr.approved => "pull request is not approved",
                    Requirement::Undiverged if pr.diverged => {
                        "pull request branch has diverged from base"
                    }
                    _ => return None,
                };
                Some(Violation {
                    requirement: *requirement,
                    reason: reason.to_string(),
                })
            })
            .collect();

        GateVerdict { violations }
    }

    /// Check whether `project` may run `operation`.
    pub fn check(
        operation: Operation,
        project: &ProjectDefinition,
        pr: &PullRequestStatus,
    ) -> Result<(), GateError> {
        if operation == Operation::Apply && pr.is_fork {
            return Err(GateError::ForkBlocked {
                project: project.name.clone(),
            });
        }

        let verdict = Self::evaluate(&Self::requirements(operation, project), pr);
        if verdict.passed() {
            Ok(())
        } else {
            Err(GateError::RequirementsNotMet {
                project: project.name.clone(),
                reasons: verdict.reasons(),
            })
        }
    }
}
