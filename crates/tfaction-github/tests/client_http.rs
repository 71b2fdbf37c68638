//! GitHub client against a mock API server.

use httpmock::prelude::*;
use serde_json::json;
use tfaction_core::{CommentPoster, PullRequestProvider, PullRequestRef};
use tfaction_github::{GithubClient, GithubConfig, GithubError};

fn client(server: &MockServer) -> GithubClient {
    GithubClient::new(GithubConfig::new(&server.base_url()).with_token("test-token")).unwrap()
}

fn pr() -> PullRequestRef {
    PullRequestRef::new("acme", "infra", 7)
}

fn pull_request_body(head_repo: &str) -> serde_json::Value {
    json!({
        "number": 7,
        "mergeable": true,
        "head": { "ref": "feature/vpc", "sha": "headsha", "repo": { "full_name": head_repo } },
        "base": { "ref": "main", "sha": "basesha", "repo": { "full_name": "acme/infra" } }
    })
}

#[tokio::test]
async fn test_status_combines_pr_reviews_and_comparison() {
    let server = MockServer::start_async().await;
    let pr_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/acme/infra/pulls/7")
                .header("authorization", "Bearer test-token");
            then.status(200).json_body(pull_request_body("acme/infra"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/infra/pulls/7/reviews");
            then.status(200).json_body(json!([
                { "user": { "login": "alice" }, "state": "APPROVED" },
                { "user": { "login": "bob" }, "state": "COMMENTED" }
            ]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/infra/compare/basesha...headsha");
            then.status(200).json_body(json!({ "ahead_by": 3, "behind_by": 2 }));
        })
        .await;

    let status = client(&server).get_status(&pr()).await.unwrap();

    pr_mock.assert_async().await;
    assert!(status.mergeable);
    assert!(status.approved);
    assert!(status.diverged);
    assert!(!status.is_fork);
    assert_eq!(status.head_sha, "headsha");
    assert_eq!(status.head_branch, "feature/vpc");
}

#[tokio::test]
async fn test_fork_and_unknown_mergeability() {
    let server = MockServer::start_async().await;
    let mut body = pull_request_body("someone/infra");
    body["mergeable"] = serde_json::Value::Null;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/infra/pulls/7");
            then.status(200).json_body(body);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/infra/pulls/7/reviews");
            then.status(200).json_body(json!([]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/infra/compare/basesha...headsha");
            then.status(200).json_body(json!({ "ahead_by": 1, "behind_by": 0 }));
        })
        .await;

    let status = client(&server).fetch_status(&pr()).await.unwrap();
    assert!(status.is_fork);
    assert!(!status.mergeable);
    assert!(!status.approved);
    assert!(!status.diverged);
}

#[tokio::test]
async fn test_changed_files_are_paginated() {
    let server = MockServer::start_async().await;
    let first_page: Vec<_> = (0..100)
        .map(|i| json!({ "filename": format!("infra/net/file{i}.tf") }))
        .collect();
    let page_one = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/acme/infra/pulls/7/files")
                .query_param("per_page", "100")
                .query_param("page", "1");
            then.status(200).json_body(json!(first_page));
        })
        .await;
    let page_two = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/acme/infra/pulls/7/files")
                .query_param("page", "2");
            then.status(200)
                .json_body(json!([{ "filename": "infra/dns/main.tf" }]));
        })
        .await;

    let files = client(&server).list_changed_files(&pr()).await.unwrap();

    page_one.assert_async().await;
    page_two.assert_async().await;
    assert_eq!(files.len(), 101);
    assert_eq!(files.last().map(String::as_str), Some("infra/dns/main.tf"));
}

#[tokio::test]
async fn test_post_creates_issue_comment() {
    let server = MockServer::start_async().await;
    let comment = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/repos/acme/infra/issues/7/comments")
                .json_body(json!({ "body": "No projects matched the criteria" }));
            then.status(201).json_body(json!({ "id": 1 }));
        })
        .await;

    client(&server)
        .post(&pr(), "No projects matched the criteria")
        .await
        .unwrap();

    comment.assert_async().await;
}

#[tokio::test]
async fn test_api_error_carries_status_and_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/infra/pulls/7");
            then.status(404).json_body(json!({ "message": "Not Found" }));
        })
        .await;

    let err = client(&server).pull_request(&pr()).await.unwrap_err();
    match err {
        GithubError::Status { status, message, .. } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Not Found");
        }
        other => panic!("expected status error, got {other:?}"),
    }

    let provider_err = client(&server).get_status(&pr()).await.unwrap_err();
    assert!(provider_err.to_string().contains("acme/infra#7"));
}
