//! GitHub REST client
//!
//! Reads pull-request state for the requirement gate and posts run reports
//! back as issue comments.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tfaction_core::{
    CommentPoster, ProviderError, PullRequestProvider, PullRequestRef, PullRequestStatus,
};
use tracing::debug;

use crate::error::{GithubError, Result};

/// Public GitHub API endpoint
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Page size used for every list endpoint (the API maximum)
pub const PER_PAGE: usize = 100;

const API_VERSION: &str = "2022-11-28";

/// GitHub client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// API base URL; override for GitHub Enterprise
    pub api_url: String,
    /// Token sent as a bearer credential (optional for public repositories)
    pub token: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
        }
    }
}

impl GithubConfig {
    pub fn new(api_url: &str) -> Self {
        GithubConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// GitHub API client
pub struct GithubClient {
    config: GithubConfig,
    http_client: reqwest::Client,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tfaction/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(GithubClient {
            config,
            http_client,
        })
    }

    fn repo_url(&self, pr: &PullRequestRef, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_url, pr.owner, pr.repo, tail
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http_client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&body)
            .map(|m| m.message)
            .unwrap_or(body);
        Err(GithubError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!(url = %url, "GET");
        let builder = self.request(reqwest::Method::GET, url).query(query);
        let response = self.send(builder, url).await?;
        Ok(response.json().await?)
    }

    /// Fetch every page of a list endpoint. Stops at the first short page.
    async fn get_all<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let batch: Vec<T> = self
                .get_json(url, &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())])
                .await?;
            let len = batch.len();
            items.extend(batch);
            if len < PER_PAGE {
                return Ok(items);
            }
            page += 1;
        }
    }

    pub async fn pull_request(&self, pr: &PullRequestRef) -> Result<PullRequestDetails> {
        self.get_json(&self.repo_url(pr, &format!("pulls/{}", pr.number)), &[])
            .await
    }

    pub async fn reviews(&self, pr: &PullRequestRef) -> Result<Vec<Review>> {
        self.get_all(&self.repo_url(pr, &format!("pulls/{}/reviews", pr.number)))
            .await
    }

    /// Compare `base...head`.
    pub async fn compare(&self, pr: &PullRequestRef, base: &str, head: &str) -> Result<Comparison> {
        self.get_json(&self.repo_url(pr, &format!("compare/{base}...{head}")), &[])
            .await
    }

    /// Snapshot of everything the requirement gate evaluates.
    pub async fn fetch_status(&self, pr: &PullRequestRef) -> Result<PullRequestStatus> {
        let details = self.pull_request(pr).await?;
        let reviews = self.reviews(pr).await?;
        let comparison = self.compare(pr, &details.base.sha, &details.head.sha).await?;

        let status = PullRequestStatus {
            // GitHub reports null while mergeability is still being computed.
            mergeable: details.mergeable.unwrap_or(false),
            approved: is_approved(&reviews),
            diverged: comparison.behind_by > 0,
            is_fork: details.is_fork(),
            head_sha: details.head.sha,
            head_branch: details.head.ref_name,
        };
        debug!(pr = %pr, ?status, "fetched pull request status");
        Ok(status)
    }

    /// Paths changed by the pull request.
    pub async fn changed_files(&self, pr: &PullRequestRef) -> Result<Vec<String>> {
        let files: Vec<ChangedFile> = self
            .get_all(&self.repo_url(pr, &format!("pulls/{}/files", pr.number)))
            .await?;
        Ok(files.into_iter().map(|f| f.filename).collect())
    }

    /// Post `body` as a new comment on the pull request.
    pub async fn create_comment(&self, pr: &PullRequestRef, body: &str) -> Result<()> {
        let url = self.repo_url(pr, &format!("issues/{}/comments", pr.number));
        let builder = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({ "body": body }));
        self.send(builder, &url).await?;
        debug!(pr = %pr, bytes = body.len(), "posted comment");
        Ok(())
    }
}

#[async_trait]
impl PullRequestProvider for GithubClient {
    async fn get_status(
        &self,
        pr: &PullRequestRef,
    ) -> std::result::Result<PullRequestStatus, ProviderError> {
        self.fetch_status(pr)
            .await
            .map_err(|e| ProviderError::new(format!("fetching status of {pr}"), e))
    }

    async fn list_changed_files(
        &self,
        pr: &PullRequestRef,
    ) -> std::result::Result<Vec<String>, ProviderError> {
        self.changed_files(pr)
            .await
            .map_err(|e| ProviderError::new(format!("listing files of {pr}"), e))
    }
}

#[async_trait]
impl CommentPoster for GithubClient {
    async fn post(
        &self,
        pr: &PullRequestRef,
        body: &str,
    ) -> std::result::Result<(), ProviderError> {
        self.create_comment(pr, body)
            .await
            .map_err(|e| ProviderError::new(format!("commenting on {pr}"), e))
    }
}

/// Approved when some reviewer's latest decisive review approves and no
/// reviewer's latest decisive review requests changes. Comments do not
/// override an earlier decision; a dismissal does.
pub fn is_approved(reviews: &[Review]) -> bool {
    let mut latest: HashMap<&str, ReviewState> = HashMap::new();
    for review in reviews {
        let Some(user) = &review.user else { continue };
        match review.state {
            ReviewState::Approved | ReviewState::ChangesRequested | ReviewState::Dismissed => {
                latest.insert(user.login.as_str(), review.state);
            }
            ReviewState::Commented | ReviewState::Pending | ReviewState::Other => {}
        }
    }

    latest.values().any(|s| *s == ReviewState::Approved)
        && !latest.values().any(|s| *s == ReviewState::ChangesRequested)
}

/// The fields of `GET /pulls/{n}` this tool reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestDetails {
    pub number: u64,
    pub mergeable: Option<bool>,
    pub head: GitRef,
    pub base: GitRef,
}

impl PullRequestDetails {
    /// A head repository that differs from the base, or was deleted, is a fork.
    pub fn is_fork(&self) -> bool {
        match (&self.head.repo, &self.base.repo) {
            (Some(head), Some(base)) => head.full_name != base.full_name,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
    pub repo: Option<RepoSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoSummary {
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    pub user: Option<User>,
    pub state: ReviewState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comparison {
    #[serde(default)]
    pub ahead_by: u64,
    #[serde(default)]
    pub behind_by: u64,
}

#[derive(Debug, Deserialize)]
struct ChangedFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}
