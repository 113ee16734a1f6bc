//! GitHub REST API client for the Git database endpoints.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use gitvault_common::{Error, RepoPath, Result};

use crate::remote::{encode_base64, Blob, GitRemote, RemoteTree, TreeEntry, TreeItem};

/// Default GitHub API base URL.
pub const GITHUB_API_BASE: &str = "https://api.github.com";
/// API version pinned in every request.
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Characters escaped inside a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn default_branch() -> String {
    "main".to_string()
}

fn default_api_base() -> String {
    GITHUB_API_BASE.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// GitHub repository configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Branch to sync.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Bearer token; usually supplied at runtime rather than stored.
    #[serde(default)]
    pub token: String,
    /// API base URL (GitHub Enterprise installs differ).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GitHubConfig {
    /// Create a configuration with default branch and API base.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: default_branch(),
            token: token.into(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    sha: String,
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    sha: String,
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// GitHub API client implementing [`GitRemote`].
pub struct GitHubClient {
    http: Client,
    config: GitHubConfig,
    repo_base: String,
}

impl GitHubClient {
    /// Create a new GitHub client.
    ///
    /// # Errors
    /// - Empty owner, repository or token
    /// - Unparseable API base URL
    pub fn new(config: GitHubConfig) -> Result<Self> {
        if config.owner.is_empty() || config.repo.is_empty() {
            return Err(Error::InvalidInput(
                "GitHub owner and repository are required".to_string(),
            ));
        }
        if config.token.is_empty() {
            return Err(Error::Authentication("No GitHub token configured".to_string()));
        }

        let base = Url::parse(&config.api_base)
            .map_err(|e| Error::InvalidInput(format!("Invalid API base URL: {}", e)))?;

        let http = Client::builder()
            .user_agent(concat!("gitvault/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        let repo_base = format!(
            "{}/repos/{}/{}",
            base.as_str().trim_end_matches('/'),
            utf8_percent_encode(&config.owner, PATH_SEGMENT),
            utf8_percent_encode(&config.repo, PATH_SEGMENT)
        );

        Ok(Self {
            http,
            config,
            repo_base,
        })
    }

    /// Build a request against a repository-scoped endpoint.
    fn request(&self, method: Method, tail: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.repo_base, tail))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.token))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    /// Branch name escaped for use in a URL path.
    fn encoded_branch(&self) -> String {
        encode_path(&self.config.branch)
    }

    /// Send a request and decode the JSON body.
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to {}: {}", what, e)))?;
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse {} response: {}", what, e)))
    }

    /// Send a request whose response body is irrelevant.
    async fn send_empty(&self, request: RequestBuilder, what: &str) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to {}: {}", what, e)))?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Map non-success responses to typed errors.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limit_exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false);
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);

        Err(status_error(status, rate_limit_exhausted, &message))
    }
}

/// Escape each `/`-separated segment of `path`.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Classify a failed API response.
fn status_error(status: StatusCode, rate_limit_exhausted: bool, message: &str) -> Error {
    match status {
        StatusCode::CONFLICT if message.to_ascii_lowercase().contains("empty") => {
            Error::EmptyRepository
        }
        StatusCode::UNAUTHORIZED => Error::Authentication(format!("{} - {}", status, message)),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(message.to_string()),
        StatusCode::FORBIDDEN
            if rate_limit_exhausted || message.to_ascii_lowercase().contains("rate limit") =>
        {
            Error::RateLimited(message.to_string())
        }
        StatusCode::FORBIDDEN => Error::PermissionDenied(message.to_string()),
        StatusCode::NOT_FOUND => Error::NotFound(message.to_string()),
        StatusCode::REQUEST_TIMEOUT => Error::Network(format!("{} - {}", status, message)),
        s if s.is_server_error() => Error::Network(format!("{} - {}", status, message)),
        _ => Error::Storage(format!("API error: {} - {}", status, message)),
    }
}

#[async_trait]
impl GitRemote for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    fn branch(&self) -> &str {
        &self.config.branch
    }

    async fn get_tree(&self, branch: &str) -> Result<RemoteTree> {
        let request = self
            .request(Method::GET, &format!("git/trees/{}", encode_path(branch)))
            .query(&[("recursive", "1")]);
        let response: TreeResponse = self.send_json(request, "get tree").await?;

        if response.truncated {
            warn!(
                "Tree listing for {} was truncated by the remote ({} items)",
                branch,
                response.tree.len()
            );
        }
        debug!("Fetched tree {} with {} items", response.sha, response.tree.len());

        Ok(RemoteTree {
            sha: response.sha,
            items: response.tree,
        })
    }

    async fn get_blob(&self, sha: &str) -> Result<Blob> {
        let request = self.request(Method::GET, &format!("git/blobs/{}", sha));
        let response: BlobResponse = self.send_json(request, "get blob").await?;

        match response.encoding.as_deref() {
            Some("base64") | None => Ok(Blob {
                sha: response.sha,
                content: response.content,
            }),
            Some("utf-8") => Ok(Blob::from_bytes(response.sha, response.content.as_bytes())),
            Some(other) => Err(Error::Serialization(format!(
                "Unsupported blob encoding: {}",
                other
            ))),
        }
    }

    async fn create_blob(&self, content_base64: &str) -> Result<String> {
        let body = serde_json::json!({
            "content": content_base64,
            "encoding": "base64",
        });
        let request = self.request(Method::POST, "git/blobs").json(&body);
        let response: ShaResponse = self.send_json(request, "create blob").await?;
        Ok(response.sha)
    }

    async fn create_file(&self, path: &RepoPath, content: &[u8], message: &str) -> Result<()> {
        let body = serde_json::json!({
            "message": message,
            "content": encode_base64(content),
            "branch": self.config.branch,
        });
        let request = self
            .request(Method::PUT, &format!("contents/{}", encode_path(&path.to_string_path())))
            .json(&body);
        self.send_empty(request, "create file").await
    }

    async fn create_tree(&self, entries: &[TreeEntry], base_tree: &str) -> Result<String> {
        let body = serde_json::json!({
            "base_tree": base_tree,
            "tree": entries,
        });
        let request = self.request(Method::POST, "git/trees").json(&body);
        let response: ShaResponse = self.send_json(request, "create tree").await?;
        Ok(response.sha)
    }

    async fn get_branch_head_sha(&self) -> Result<String> {
        let request = self.request(Method::GET, &format!("git/ref/heads/{}", self.encoded_branch()));
        let response: RefResponse = self.send_json(request, "get branch head").await?;
        Ok(response.object.sha)
    }

    async fn create_commit(&self, message: &str, tree_sha: &str, parent_sha: &str) -> Result<String> {
        let body = serde_json::json!({
            "message": message,
            "tree": tree_sha,
            "parents": [parent_sha],
        });
        let request = self.request(Method::POST, "git/commits").json(&body);
        let response: ShaResponse = self.send_json(request, "create commit").await?;
        Ok(response.sha)
    }

    async fn update_branch_head(&self, sha: &str) -> Result<()> {
        let body = serde_json::json!({ "sha": sha, "force": false });
        let request = self
            .request(Method::PATCH, &format!("git/refs/heads/{}", self.encoded_branch()))
            .json(&body);
        self.send_empty(request, "update branch head").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_repository_signal() {
        let err = status_error(StatusCode::CONFLICT, false, "Git Repository is empty.");
        assert!(matches!(err, Error::EmptyRepository));

        let other = status_error(StatusCode::CONFLICT, false, "Reference update failed");
        assert!(matches!(other, Error::Storage(_)));
    }

    #[test]
    fn test_rate_limit_classification() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, false, "slow down"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, true, "forbidden"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, false, "API rate limit exceeded for user"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, false, "Resource not accessible"),
            Error::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(status_error(StatusCode::BAD_GATEWAY, false, "").is_transient());
        assert!(!status_error(StatusCode::UNAUTHORIZED, false, "Bad credentials").is_transient());
        assert!(!status_error(StatusCode::NOT_FOUND, false, "Not Found").is_transient());
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("notes/my note#1.md"), "notes/my%20note%231.md");
        assert_eq!(encode_path("feature/x"), "feature/x");
    }

    #[test]
    fn test_client_requires_token() {
        let config = GitHubConfig::new("octo", "vault", "");
        assert!(matches!(GitHubClient::new(config), Err(Error::Authentication(_))));
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = GitHubConfig::new("octo", "vault", "ghp_secret");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("ghp_secret"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: GitHubConfig =
            serde_json::from_str(r#"{"owner":"octo","repo":"vault"}"#).unwrap();
        assert_eq!(config.branch, "main");
        assert_eq!(config.api_base, GITHUB_API_BASE);
        assert!(config.token.is_empty());
    }

    #[test]
    fn test_tree_response_parsing() {
        let json = r#"{
            "sha": "root",
            "url": "https://api.github.com/repos/o/r/git/trees/root",
            "tree": [
                {"path": "notes", "mode": "040000", "type": "tree", "sha": "t1", "url": "u1"},
                {"path": "notes/a.md", "mode": "100644", "type": "blob", "sha": "b1", "size": 3, "url": "u2"}
            ],
            "truncated": false
        }"#;
        let response: TreeResponse = serde_json::from_str(json).unwrap();
        let tree = RemoteTree {
            sha: response.sha,
            items: response.tree,
        };
        assert_eq!(tree.blobs().count(), 1);
        assert_eq!(tree.get("notes/a.md").unwrap().sha, "b1");
    }
}
