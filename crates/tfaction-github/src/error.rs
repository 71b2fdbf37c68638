//! Error types for the GitHub collaborator

use thiserror::Error;

/// Errors talking to the GitHub API or reading its payloads
#[derive(Error, Debug)]
pub enum GithubError {
    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("GitHub API returned {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// The webhook payload is not a comment on a pull request
    #[error("comment is not on a pull request")]
    NotPullRequest,

    /// Malformed `owner/name` repository reference
    #[error("invalid repository `{0}`, expected owner/name")]
    InvalidRepository(String),
}

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, GithubError>;
