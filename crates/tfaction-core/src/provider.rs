//! Collaborator traits for the hosting platform.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::gate::PullRequestStatus;

/// Identifies a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRequestRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Read access to pull-request state. Each call returns a complete snapshot.
#[async_trait]
pub trait PullRequestProvider: Send + Sync {
    async fn get_status(&self, pr: &PullRequestRef) -> Result<PullRequestStatus, ProviderError>;

    /// Paths changed by the pull request, relative to the repository root.
    async fn list_changed_files(&self, pr: &PullRequestRef) -> Result<Vec<String>, ProviderError>;
}

/// Posts a comment body to the pull-request thread.
#[async_trait]
pub trait CommentPoster: Send + Sync {
    async fn post(&self, pr: &PullRequestRef, body: &str) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_ref_display() {
        let pr = PullRequestRef::new("acme", "infra", 42);
        assert_eq!(pr.to_string(), "acme/infra#42");
    }
}
