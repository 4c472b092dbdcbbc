//! Provider Client (C2): capability-typed wrapper over the code host's HTTP API.
//!
//! Grounded on the reference workspace's GitHub client
//! (`examples/5dlabs-cto/crates/integrations/src/github_client.rs`): a `reqwest::Client`
//! carrying GitHub-specific default headers, with the OAuth token passed explicitly on
//! every call rather than read from storage.

mod retry;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use retry::with_retry;

const GITHUB_API_URL: &str = "https://api.github.com";

/// Typed outcomes for every provider call (§4.2 Contracts). `RateLimited` and
/// `TransientNetwork` are retried internally with bounded exponential backoff before
/// ever reaching a caller; every other variant surfaces as-is.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: missing scope")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),
    #[error("conflict")]
    Conflict,
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("provider error {status}: {body}")]
    ProviderHttp { status: u16, body: String },
}

impl ProviderError {
    fn from_status(status: reqwest::StatusCode, body: String, retry_after: Option<u64>) -> Self {
        match status.as_u16() {
            401 => ProviderError::Unauthorized,
            403 => ProviderError::Forbidden,
            404 => ProviderError::NotFound,
            409 => ProviderError::Conflict,
            429 => ProviderError::RateLimited(retry_after.unwrap_or(60)),
            500..=599 => ProviderError::ProviderHttp {
                status: status.as_u16(),
                body,
            },
            _ => ProviderError::ProviderHttp {
                status: status.as_u16(),
                body,
            },
        }
    }

    /// Whether C2's bounded-retry loop should retry this error internally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::TransientNetwork(_)
                | ProviderError::ProviderHttp { status: 500..=599, .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub full_name: String,
    pub default_branch: String,
    pub private: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileContent {
    pub content: String,
    pub sha: String,
    pub encoding: String,
}

#[derive(Debug, Clone)]
pub struct CreateOrUpdateFile<'a> {
    pub content_base64: &'a str,
    pub sha: Option<&'a str>,
    pub branch: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Clone)]
pub struct CreatePullRequest<'a> {
    pub head: &'a str,
    pub base: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub draft: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedWebhook {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunInfo {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
    pub head_branch: String,
    pub head_sha: String,
}

/// Constructor-passed capability interface (§9 Design Notes). The orchestrator,
/// tracker, and webhook manager depend only on this trait, never on a concrete
/// `reqwest` client, so tests substitute a mock implementation.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn list_repositories(
        &self,
        token: &str,
        page: u32,
    ) -> Result<Vec<RepositorySummary>, ProviderError>;

    async fn get_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<FileContent, ProviderError>;

    async fn create_or_update_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        req: CreateOrUpdateFile<'_>,
    ) -> Result<(), ProviderError>;

    async fn create_branch(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        from_sha: &str,
        name: &str,
    ) -> Result<(), ProviderError>;

    async fn create_pull_request(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        req: CreatePullRequest<'_>,
    ) -> Result<CreatedPullRequest, ProviderError>;

    async fn create_webhook(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        url: &str,
        secret: &str,
        events: &[String],
    ) -> Result<CreatedWebhook, ProviderError>;

    async fn delete_webhook(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        hook_id: u64,
    ) -> Result<(), ProviderError>;

    async fn get_workflow_run(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        run_id: u64,
    ) -> Result<WorkflowRunInfo, ProviderError>;

    async fn download_run_logs(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        run_id: u64,
    ) -> Result<Vec<u8>, ProviderError>;

    async fn rerun_workflow(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        run_id: u64,
        failed_only: bool,
    ) -> Result<(), ProviderError>;

    async fn revoke_token(&self, token: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Serialize)]
struct WebhookConfig<'a> {
    url: &'a str,
    content_type: &'static str,
    secret: &'a str,
    insecure_ssl: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateWebhookRequest<'a> {
    name: &'static str,
    active: bool,
    events: &'a [String],
    config: WebhookConfig<'a>,
}

/// GitHub-backed `ProviderClient` implementation.
#[derive(Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
}

impl GithubClient {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(GITHUB_API_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        headers.insert(USER_AGENT, HeaderValue::from_static("remediation-service/1.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::TransientNetwork(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        req.header(AUTHORIZATION, format!("Bearer {token}"))
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::TransientNetwork(e.to_string()))?;
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body, retry_after));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::TransientNetwork(e.to_string()))
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> Result<(), ProviderError> {
        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::TransientNetwork(e.to_string()))?;
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body, retry_after));
        }
        Ok(())
    }
}

impl Default for GithubClient {
    fn default() -> Self {
        Self::new().expect("default GitHub client headers are static and always valid")
    }
}

#[async_trait]
impl ProviderClient for GithubClient {
    async fn list_repositories(
        &self,
        token: &str,
        page: u32,
    ) -> Result<Vec<RepositorySummary>, ProviderError> {
        with_retry(|| async {
            let url = format!("{}/user/repos?per_page=100&page={}", self.base_url, page);
            self.send_json(self.auth(self.client.get(&url), token)).await
        })
        .await
    }

    async fn get_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<FileContent, ProviderError> {
        with_retry(|| async {
            let mut url = format!("{}/repos/{owner}/{repo}/contents/{path}", self.base_url);
            if let Some(r) = git_ref {
                url.push_str(&format!("?ref={r}"));
            }
            self.send_json(self.auth(self.client.get(&url), token)).await
        })
        .await
    }

    async fn create_or_update_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        req: CreateOrUpdateFile<'_>,
    ) -> Result<(), ProviderError> {
        with_retry(|| async {
            #[derive(Serialize)]
            struct Body<'a> {
                message: &'a str,
                content: &'a str,
                sha: Option<&'a str>,
                branch: &'a str,
            }
            let url = format!("{}/repos/{owner}/{repo}/contents/{path}", self.base_url);
            let body = Body {
                message: req.message,
                content: req.content_base64,
                sha: req.sha,
                branch: req.branch,
            };
            debug!(owner, repo, path, "writing file via provider client");
            self.send_empty(self.auth(self.client.put(&url).json(&body), token))
                .await
        })
        .await
    }

    async fn create_branch(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        from_sha: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        with_retry(|| async {
            #[derive(Serialize)]
            struct Body<'a> {
                #[serde(rename = "ref")]
                git_ref: String,
                sha: &'a str,
            }
            let url = format!("{}/repos/{owner}/{repo}/git/refs", self.base_url);
            let body = Body {
                git_ref: format!("refs/heads/{name}"),
                sha: from_sha,
            };
            self.send_empty(self.auth(self.client.post(&url).json(&body), token))
                .await
        })
        .await
    }

    async fn create_pull_request(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        req: CreatePullRequest<'_>,
    ) -> Result<CreatedPullRequest, ProviderError> {
        with_retry(|| async {
            let url = format!("{}/repos/{owner}/{repo}/pulls", self.base_url);
            self.send_json(self.auth(self.client.post(&url).json(&req_body(&req)), token))
                .await
        })
        .await
    }

    async fn create_webhook(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        url: &str,
        secret: &str,
        events: &[String],
    ) -> Result<CreatedWebhook, ProviderError> {
        with_retry(|| async {
            let endpoint = format!("{}/repos/{owner}/{repo}/hooks", self.base_url);
            let request = CreateWebhookRequest {
                name: "web",
                active: true,
                events,
                config: WebhookConfig {
                    url,
                    content_type: "json",
                    secret,
                    insecure_ssl: "0",
                },
            };
            self.send_json(self.auth(self.client.post(&endpoint).json(&request), token))
                .await
        })
        .await
    }

    async fn delete_webhook(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        hook_id: u64,
    ) -> Result<(), ProviderError> {
        with_retry(|| async {
            let url = format!("{}/repos/{owner}/{repo}/hooks/{hook_id}", self.base_url);
            self.send_empty(self.auth(self.client.delete(&url), token)).await
        })
        .await
    }

    async fn get_workflow_run(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        run_id: u64,
    ) -> Result<WorkflowRunInfo, ProviderError> {
        with_retry(|| async {
            let url = format!("{}/repos/{owner}/{repo}/actions/runs/{run_id}", self.base_url);
            self.send_json(self.auth(self.client.get(&url), token)).await
        })
        .await
    }

    async fn download_run_logs(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        run_id: u64,
    ) -> Result<Vec<u8>, ProviderError> {
        with_retry(|| async {
            let url = format!(
                "{}/repos/{owner}/{repo}/actions/runs/{run_id}/logs",
                self.base_url
            );
            let response = self
                .auth(self.client.get(&url), token)
                .send()
                .await
                .map_err(|e| ProviderError::TransientNetwork(e.to_string()))?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(status, body, None));
            }
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| ProviderError::TransientNetwork(e.to_string()))
        })
        .await
    }

    async fn rerun_workflow(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        run_id: u64,
        failed_only: bool,
    ) -> Result<(), ProviderError> {
        with_retry(|| async {
            let suffix = if failed_only { "rerun-failed-jobs" } else { "rerun" };
            let url = format!(
                "{}/repos/{owner}/{repo}/actions/runs/{run_id}/{suffix}",
                self.base_url
            );
            self.send_empty(self.auth(self.client.post(&url), token)).await
        })
        .await
    }

    async fn revoke_token(&self, token: &str) -> Result<(), ProviderError> {
        with_retry(|| async {
            let url = format!("{}/applications/revoke", self.base_url);
            #[derive(Serialize)]
            struct Body<'a> {
                access_token: &'a str,
            }
            let result = self
                .client
                .delete(&url)
                .json(&Body { access_token: token })
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    Err(ProviderError::from_status(status, body, None))
                }
                Err(e) => Err(ProviderError::TransientNetwork(e.to_string())),
            }
        })
        .await
    }
}

fn req_body(req: &CreatePullRequest<'_>) -> serde_json::Value {
    serde_json::json!({
        "head": req.head,
        "base": req.base,
        "title": req.title,
        "body": req.body,
        "draft": req.draft,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_create_webhook_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/web/hooks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 99})))
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(server.uri()).unwrap();
        let hook = client
            .create_webhook(
                "token",
                "acme",
                "web",
                "https://ingest.example/webhooks/github",
                "s3cr3t",
                &["workflow_run".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(hook.id, 99);
    }

    #[tokio::test]
    async fn test_not_found_maps_to_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/contents/missing.rs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(server.uri()).unwrap();
        let err = client
            .get_file("token", "acme", "web", "missing.rs", None)
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::NotFound);
    }

    #[tokio::test]
    async fn test_rate_limited_is_retried_then_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/actions/runs/1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(server.uri()).unwrap();
        let err = client
            .get_workflow_run("token", "acme", "web", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }
}
