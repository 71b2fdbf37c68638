//! Webhook payloads delivered to the action.

use serde::Deserialize;
use tfaction_core::PullRequestRef;

use crate::error::{GithubError, Result};

/// A comment posted on a pull request (`issue_comment` event).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEvent {
    pub pr: PullRequestRef,
    pub action: String,
    pub comment_id: u64,
    pub body: String,
    pub author: String,
}

impl CommentEvent {
    /// Parse an `issue_comment` payload. Comments on plain issues are
    /// rejected with [`GithubError::NotPullRequest`].
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let raw: RawIssueCommentEvent = serde_json::from_slice(payload)?;
        if raw.issue.pull_request.is_none() {
            return Err(GithubError::NotPullRequest);
        }

        Ok(Self {
            pr: PullRequestRef::new(
                raw.repository.owner.login,
                raw.repository.name,
                raw.issue.number,
            ),
            action: raw.action,
            comment_id: raw.comment.id,
            body: raw.comment.body.unwrap_or_default(),
            author: raw.comment.user.login,
        })
    }

    /// Edits and deletions re-deliver old bodies and must not re-run commands.
    pub fn is_created(&self) -> bool {
        self.action == "created"
    }
}

/// Parse `owner/name` into its parts.
pub fn split_repository(full_name: &str) -> Result<(String, String)> {
    match full_name.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(GithubError::InvalidRepository(full_name.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct RawIssueCommentEvent {
    #[serde(default)]
    action: String,
    issue: RawIssue,
    comment: RawComment,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    body: Option<String>,
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
    owner: RawUser,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pull_request: bool) -> Vec<u8> {
        let mut issue = json!({ "number": 42, "title": "Add VPC" });
        if pull_request {
            issue["pull_request"] =
                json!({ "url": "https://api.github.com/repos/acme/infra/pulls/42" });
        }
        serde_json::to_vec(&json!({
            "action": "created",
            "issue": issue,
            "comment": {
                "id": 9001,
                "body": "terraform plan -p network",
                "user": { "login": "octocat" }
            },
            "repository": {
                "name": "infra",
                "full_name": "acme/infra",
                "owner": { "login": "acme" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_pull_request_comment() {
        let event = CommentEvent::from_payload(&payload(true)).unwrap();
        assert_eq!(event.pr, PullRequestRef::new("acme", "infra", 42));
        assert_eq!(event.body, "terraform plan -p network");
        assert_eq!(event.author, "octocat");
        assert_eq!(event.comment_id, 9001);
        assert!(event.is_created());
    }

    #[test]
    fn test_issue_comment_is_rejected() {
        let err = CommentEvent::from_payload(&payload(false)).unwrap_err();
        assert!(matches!(err, GithubError::NotPullRequest));
    }

    #[test]
    fn test_garbage_payload_is_json_error() {
        let err = CommentEvent::from_payload(b"{not json").unwrap_err();
        assert!(matches!(err, GithubError::Json(_)));
    }

    #[test]
    fn test_split_repository() {
        assert_eq!(
            split_repository("acme/infra").unwrap(),
            ("acme".to_string(), "infra".to_string())
        );
        assert!(split_repository("acme").is_err());
        assert!(split_repository("acme/infra/extra").is_err());
        assert!(split_repository("/infra").is_err());
    }
}
