//! Source-control host client.
//!
//! The core needs five capabilities: authenticated identity, branch
//! creation from a base SHA, pull-request creation with labels, comment
//! posting, and rate-limit inspection. `GitHubClient` implements them
//! against the REST API; everything upstream depends only on the trait.

use async_trait::async_trait;
use baton_core::ExternalError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM: &str = "source-control";
const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity and location of a created external resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRef {
    pub external_id: String,
    pub url: String,
}

/// The narrow contract the core needs from a source-control host.
#[async_trait]
pub trait SourceControlHost: Send + Sync {
    /// Login of the authenticated user.
    async fn authenticated_user(&self) -> Result<String, ExternalError>;

    /// Create `branch` from the head SHA of `base`.
    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        base: &str,
    ) -> Result<ExternalRef, ExternalError>;

    /// Open a pull request from `head` into `base`.
    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<ExternalRef, ExternalError>;

    /// Comment on an issue or pull request.
    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<ExternalRef, ExternalError>;

    /// Set a commit status check.
    async fn status_check(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: &str,
        description: &str,
    ) -> Result<(), ExternalError>;
}

// ============================================================================
// GITHUB CLIENT
// ============================================================================

/// GitHub REST implementation of `SourceControlHost`.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRef {
    #[serde(rename = "ref")]
    git_ref: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: i64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: i64,
    html_url: String,
}

impl GitHubClient {
    /// Build a client against the public API.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_url(token, DEFAULT_API_URL)
    }

    /// Build a client against an enterprise endpoint.
    pub fn with_api_url(token: impl Into<String>, api_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent("baton-orchestrator")
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ExternalError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExternalError::Timeout {
                        system: SYSTEM.to_string(),
                        seconds: DEFAULT_TIMEOUT.as_secs(),
                    }
                } else {
                    ExternalError::Rejected {
                        system: SYSTEM.to_string(),
                        status: 0,
                        message: e.to_string(),
                    }
                }
            })?;

        inspect_rate_limit(&response)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            warn!(status, "source-control request rejected");
            return Err(ExternalError::Rejected {
                system: SYSTEM.to_string(),
                status,
                message,
            });
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ExternalError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ExternalError::Rejected {
                system: SYSTEM.to_string(),
                status: 0,
                message: format!("response decode: {e}"),
            })
    }
}

/// Surface rate-limit exhaustion as a rejection with the reset time.
fn inspect_rate_limit(response: &reqwest::Response) -> Result<(), ExternalError> {
    let remaining = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());
    if remaining == Some(0) {
        let resets_at = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        return Err(ExternalError::RateLimited {
            system: SYSTEM.to_string(),
            resets_at,
        });
    }
    Ok(())
}

#[async_trait]
impl SourceControlHost for GitHubClient {
    async fn authenticated_user(&self) -> Result<String, ExternalError> {
        let user: UserResponse = self.json(self.client.get(self.url("/user"))).await?;
        Ok(user.login)
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        base: &str,
    ) -> Result<ExternalRef, ExternalError> {
        let base_ref: RefResponse = self
            .json(
                self.client
                    .get(self.url(&format!("/repos/{owner}/{repo}/git/ref/heads/{base}"))),
            )
            .await?;

        let created: CreatedRef = self
            .json(
                self.client
                    .post(self.url(&format!("/repos/{owner}/{repo}/git/refs")))
                    .json(&json!({
                        "ref": format!("refs/heads/{branch}"),
                        "sha": base_ref.object.sha,
                    })),
            )
            .await?;

        debug!(branch, base, "branch created");
        Ok(ExternalRef {
            external_id: created.git_ref,
            url: created.url,
        })
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<ExternalRef, ExternalError> {
        let pull: PullResponse = self
            .json(
                self.client
                    .post(self.url(&format!("/repos/{owner}/{repo}/pulls")))
                    .json(&json!({
                        "title": title,
                        "head": head,
                        "base": base,
                        "body": body,
                    })),
            )
            .await?;

        if !labels.is_empty() {
            self.send(
                self.client
                    .post(self.url(&format!(
                        "/repos/{owner}/{repo}/issues/{}/labels",
                        pull.number
                    )))
                    .json(&json!({ "labels": labels })),
            )
            .await?;
        }

        Ok(ExternalRef {
            external_id: pull.number.to_string(),
            url: pull.html_url,
        })
    }

    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<ExternalRef, ExternalError> {
        let comment: CommentResponse = self
            .json(
                self.client
                    .post(self.url(&format!(
                        "/repos/{owner}/{repo}/issues/{number}/comments"
                    )))
                    .json(&json!({ "body": body })),
            )
            .await?;
        Ok(ExternalRef {
            external_id: comment.id.to_string(),
            url: comment.html_url,
        })
    }

    async fn status_check(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: &str,
        description: &str,
    ) -> Result<(), ExternalError> {
        self.send(
            self.client
                .post(self.url(&format!("/repos/{owner}/{repo}/statuses/{sha}")))
                .json(&json!({
                    "state": state,
                    "description": description,
                    "context": "baton/orchestrator",
                })),
        )
        .await?;
        Ok(())
    }
}
