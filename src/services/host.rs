//! GitHub pull-request creation
//!
//! Production [`CodeHost`]. Token comes from the environment; the owner and
//! repo are read from the origin remote when not configured explicitly.

use super::{CodeHost, CreatedPullRequest, NewPullRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::Repository;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const API_TIMEOUT_SECS: u64 = 60;
const MAX_ERROR_BODY_LEN: usize = 200;

/// Sanitize an API error body to prevent credential leakage.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",
        "gho_",
        "github_pat_",
    ];

    let truncated = if body.len() > MAX_ERROR_BODY_LEN {
        format!("{}... (truncated)", &body[..MAX_ERROR_BODY_LEN])
    } else {
        body.to_string()
    };

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(error details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated
}

/// Extract owner and repo from a git remote URL.
///
/// Supports:
/// - git@github.com:owner/repo.git
/// - https://github.com/owner/repo.git
/// - https://github.com/owner/repo
pub fn parse_remote_url(remote: &str) -> Option<(String, String)> {
    if let Some(rest) = remote.strip_prefix("git@github.com:") {
        let path = rest.trim_end_matches(".git");
        let parts: Vec<&str> = path.splitn(2, '/').collect();
        if parts.len() == 2 {
            return Some((parts[0].to_string(), parts[1].to_string()));
        }
    }

    if remote.contains("github.com") {
        if let Ok(parsed) = url::Url::parse(remote) {
            if parsed.host_str() != Some("github.com") {
                return None;
            }
            let path = parsed
                .path()
                .trim_start_matches('/')
                .trim_end_matches(".git");
            let parts: Vec<&str> = path.splitn(2, '/').collect();
            if parts.len() == 2 && !parts[1].is_empty() {
                return Some((parts[0].to_string(), parts[1].to_string()));
            }
        }
    }

    None
}

/// Read owner/repo from the repository's github remote.
pub fn remote_info(repo_path: &Path) -> Result<(String, String)> {
    let repo = Repository::open(repo_path).context("failed to open repository")?;

    for remote_name in ["origin", "upstream", "github"] {
        if let Ok(remote) = repo.find_remote(remote_name) {
            if let Some(remote_url) = remote.url() {
                if let Some(parsed) = parse_remote_url(remote_url) {
                    return Ok(parsed);
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "no GitHub remote found; add a remote pointing to github.com"
    ))
}

#[derive(Serialize)]
struct CreatePrRequest {
    title: String,
    body: String,
    head: String,
    base: String,
}

#[derive(Deserialize)]
struct CreatePrResponse {
    number: u64,
    html_url: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

pub struct GithubHost {
    client: reqwest::Client,
    token: String,
    owner: String,
    repo: String,
}

impl GithubHost {
    pub fn new(token: String, owner: String, repo: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            token,
            owner,
            repo,
        })
    }

    /// Construct from the repository's origin remote and `GITHUB_TOKEN`.
    pub fn from_repo(repo_path: &Path) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("GITHUB_TOKEN is not set"))?;
        let (owner, repo) = remote_info(repo_path)?;
        Self::new(token, owner, repo)
    }

    fn api_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "autonomic")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn apply_labels(&self, number: u64, labels: &[String]) {
        let url = format!(
            "https://api.github.com/repos/{}/{}/issues/{}/labels",
            self.owner, self.repo, number
        );
        let result = self
            .api_request(&url)
            .json(&serde_json::json!({ "labels": labels }))
            .send()
            .await;
        // Labels are decoration; failure never fails the submission.
        if let Err(e) = result {
            warn!(number, error = %e, "failed to apply PR labels");
        }
    }
}

#[async_trait]
impl CodeHost for GithubHost {
    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<CreatedPullRequest> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/pulls",
            self.owner, self.repo
        );

        let payload = CreatePrRequest {
            title: request.title.clone(),
            body: request.body.clone(),
            head: request.head.clone(),
            base: request.base.clone(),
        };

        let resp = self
            .api_request(&url)
            .json(&payload)
            .send()
            .await
            .context("failed to send PR creation request")?;

        let status = resp.status();
        if status.is_success() {
            let pr: CreatePrResponse = resp.json().await.context("failed to parse PR response")?;
            if !request.labels.is_empty() {
                self.apply_labels(pr.number, &request.labels).await;
            }
            return Ok(CreatedPullRequest {
                number: pr.number,
                url: pr.html_url,
            });
        }

        let error_body = resp.text().await.unwrap_or_default();
        if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
            let detail = api_error
                .errors
                .first()
                .and_then(|e| e.message.clone())
                .unwrap_or_default();
            let msg = if detail.is_empty() {
                api_error.message
            } else {
                format!("{}: {}", api_error.message, detail)
            };
            return Err(anyhow::anyhow!("GitHub API error: {}", msg));
        }

        Err(anyhow::anyhow!(
            "GitHub API error ({}): {}",
            status,
            sanitize_error_body(&error_body)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ssh_remote() {
        let (owner, repo) = parse_remote_url("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
    }

    #[test]
    fn test_parse_https_remote() {
        let (owner, repo) = parse_remote_url("https://github.com/acme/widgets").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
    }

    #[test]
    fn test_parse_rejects_other_hosts() {
        assert!(parse_remote_url("https://gitlab.com/acme/widgets").is_none());
        assert!(parse_remote_url("git@bitbucket.org:acme/widgets.git").is_none());
        assert!(parse_remote_url("https://github.mycompany.com/acme/widgets").is_none());
        assert!(parse_remote_url("not-a-url").is_none());
    }

    #[test]
    fn test_parse_requires_owner_and_repo() {
        assert!(parse_remote_url("https://github.com/acme").is_none());
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        let body = r#"{"message": "bad ghp_abc123"}"#;
        assert!(sanitize_error_body(body).contains("redacted"));
    }

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_error_body(&body);
        assert!(sanitized.len() < 300);
        assert!(sanitized.ends_with("(truncated)"));
    }

    #[test]
    fn test_parse_api_error_response() {
        let json = r#"{"message": "Validation Failed", "errors": [{"message": "A pull request already exists"}]}"#;
        let parsed: ApiErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.message, "Validation Failed");
        assert_eq!(
            parsed.errors[0].message.as_deref(),
            Some("A pull request already exists")
        );
    }
}
