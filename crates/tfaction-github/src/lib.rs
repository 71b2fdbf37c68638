//! GitHub collaborator for tfaction
//!
//! Parses comment webhook payloads and implements the core
//! `PullRequestProvider` and `CommentPoster` traits over the REST API.

pub mod client;
pub mod error;
pub mod event;

pub use client::{GithubClient, GithubConfig, DEFAULT_API_URL};
pub use error::{GithubError, Result};
pub use event::{split_repository, CommentEvent};
