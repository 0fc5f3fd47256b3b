//! Source-control provider client.
//!
//! Defines the [`RepoProvider`] trait consumed by the loader and the commit
//! sync engine, and [`GitHubClient`], its implementation over the GitHub
//! REST API.
//!
//! # Authentication
//!
//! Tokens are never read from the environment here. A client is built from
//! [`GithubConfig`] and re-targeted to a specific token through
//! [`ProviderFactory::for_token`]; choosing *which* token to use is the job
//! of [`crate::credentials`].
//!
//! # Error mapping
//!
//! | HTTP status | Error |
//! |-------------|-------|
//! | 404 | [`IngestError::NotFound`] |
//! | 429, or 403 with `x-ratelimit-remaining: 0` | [`IngestError::RateLimited`] |
//! | other non-2xx | [`IngestError::Provider`] |
//!
//! No call is retried. A 404 on the root listing of a repository that
//! otherwise exists means the repository has no commits and is reported as
//! an empty directory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;

use repo_harness_core::models::ProviderCommit;

use crate::config::GithubConfig;
use crate::error::IngestError;

const USER_AGENT: &str = concat!("repo-harness/", env!("CARGO_PKG_VERSION"));
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const DIFF_MEDIA_TYPE: &str = "application/vnd.github.diff";

/// Owner/repository pair extracted from a repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    /// Parse `https://github.com/o/r(.git)`, `git@github.com:o/r.git` or a
    /// bare `o/r`.
    pub fn parse(url: &str) -> Result<Self, IngestError> {
        let trimmed = url.trim().trim_end_matches('/');

        let path = if let Some(rest) = trimmed.strip_prefix("git@") {
            rest.split_once(':').map(|(_, p)| p)
        } else if let Some(idx) = trimmed.find("://") {
            let after_scheme = &trimmed[idx + 3..];
            after_scheme.split_once('/').map(|(_, p)| p)
        } else {
            Some(trimmed)
        };

        let mut segments = path
            .unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty());

        match (segments.next(), segments.next()) {
            (Some(owner), Some(repo)) => {
                let repo = repo.strip_suffix(".git").unwrap_or(repo);
                if repo.is_empty() {
                    return Err(IngestError::InvalidRepoUrl(url.to_string()));
                }
                Ok(Self {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(IngestError::InvalidRepoUrl(url.to_string())),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks, submodules and anything else the loader does not follow.
    Other,
}

/// One item in a contents listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub kind: EntryKind,
    /// Raw provider type string, kept for diagnostics on [`EntryKind::Other`].
    pub type_name: String,
}

/// A contents listing is either a single file or a directory's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    File(Entry),
    Dir(Vec<Entry>),
}

/// Read access to a hosted repository.
#[async_trait]
pub trait RepoProvider: Send + Sync {
    /// List the entries at `path` (empty for the root) on `git_ref`, or the
    /// default branch when `None`.
    async fn list_contents(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Listing>;

    /// Decoded text content of a single file.
    async fn file_content(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<String>;

    async fn list_branches(&self, repo: &RepoRef) -> Result<Vec<String>>;

    /// Newest-first commits on `branch`, at most `limit`.
    async fn list_commits(
        &self,
        repo: &RepoRef,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<ProviderCommit>>;

    /// A single commit rendered as a text patch.
    async fn commit_diff(&self, repo: &RepoRef, sha: &str) -> Result<String>;

    async fn default_branch(&self, repo: &RepoRef) -> Result<String>;
}

/// Builds a [`RepoProvider`] bound to a specific access token.
pub trait ProviderFactory: Send + Sync {
    /// `None` means unauthenticated access.
    fn for_token(&self, token: Option<&str>) -> Arc<dyn RepoProvider>;
}

/// [`RepoProvider`] over the GitHub REST API.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: Url,
    token: Option<String>,
}

impl GitHubClient {
    /// Build an unauthenticated client; bind a token with
    /// [`ProviderFactory::for_token`].
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build GitHub HTTP client")?;

        let api_url = Url::parse(&config.api_url)
            .with_context(|| format!("Invalid GitHub API url: {}", config.api_url))?;
        if api_url.cannot_be_a_base() {
            anyhow::bail!("Invalid GitHub API url: {}", config.api_url);
        }

        Ok(Self {
            http,
            api_url,
            token: None,
        })
    }

    /// `{api_url}/repos/{owner}/{repo}/{segments..}` with every segment
    /// percent-encoded.
    fn repo_url(&self, repo: &RepoRef, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["repos", repo.owner.as_str(), repo.repo.as_str()])
                .extend(segments);
        }
        url
    }

    /// Contents URL for `path`, split on `/` so each component is encoded on
    /// its own. The root keeps its trailing slash.
    fn contents_url(&self, repo: &RepoRef, path: &str, git_ref: Option<&str>) -> Url {
        let mut segments = vec!["contents"];
        segments.extend(path.trim_matches('/').split('/'));
        let mut url = self.repo_url(repo, &segments);
        if let Some(r) = git_ref {
            url.query_pairs_mut().append_pair("ref", r);
        }
        url
    }

    fn get(&self, url: Url, accept: &str) -> reqwest::RequestBuilder {
        let req = self
            .http
            .get(url)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = req
            .send()
            .await
            .with_context(|| format!("GitHub request failed: {}", what))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limited = status.as_u16() == 429
            || (status.as_u16() == 403
                && response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok())
                    == Some("0"));
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);

        let err = if status.as_u16() == 404 {
            IngestError::NotFound(what.to_string())
        } else if rate_limited {
            IngestError::RateLimited { message }
        } else {
            IngestError::Provider {
                status: status.as_u16(),
                message,
            }
        };
        Err(err.into())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        let response = self.send(self.get(url, JSON_MEDIA_TYPE), what).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid GitHub response for {}", what))
    }
}

impl ProviderFactory for GitHubClient {
    fn for_token(&self, token: Option<&str>) -> Arc<dyn RepoProvider> {
        let mut client = self.clone();
        client.token = token.map(str::to_string);
        Arc::new(client)
    }
}

#[derive(Deserialize)]
struct ContentItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl ContentItem {
    fn to_entry(&self) -> Entry {
        let kind = match self.kind.as_str() {
            "file" => EntryKind::File,
            "dir" => EntryKind::Dir,
            _ => EntryKind::Other,
        };
        Entry {
            path: self.path.clone(),
            kind,
            type_name: self.kind.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Dir(Vec<ContentItem>),
    Single(ContentItem),
}

#[derive(Deserialize)]
struct BranchItem {
    name: String,
}

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct CommitItem {
    sha: String,
    commit: CommitDetail,
    #[serde(default)]
    author: Option<AccountInfo>,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: String,
    #[serde(default)]
    author: Option<GitSignature>,
}

#[derive(Deserialize)]
struct GitSignature {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct AccountInfo {
    #[serde(default)]
    avatar_url: Option<String>,
}

impl From<CommitItem> for ProviderCommit {
    fn from(item: CommitItem) -> Self {
        let signature = item.commit.author;
        ProviderCommit {
            hash: item.sha,
            message: item.commit.message,
            author_name: signature
                .as_ref()
                .and_then(|s| s.name.clone())
                .unwrap_or_default(),
            author_avatar: item
                .author
                .and_then(|a| a.avatar_url)
                .unwrap_or_default(),
            date: signature.and_then(|s| s.date).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl RepoProvider for GitHubClient {
    async fn list_contents(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Listing> {
        let url = self.contents_url(repo, path, git_ref);
        let what = format!("contents of {}:{}", repo, path);
        let response = match self.get_json::<ContentsResponse>(url, &what).await {
            Ok(response) => response,
            Err(e) if path.trim_matches('/').is_empty() && is_not_found(&e) => {
                // Empty repositories 404 on the root listing; a missing
                // repository also 404s on its metadata.
                self.default_branch(repo).await?;
                tracing::debug!(repo = %repo, "root listing not found, treating repository as empty");
                return Ok(Listing::Dir(Vec::new()));
            }
            Err(e) => return Err(e),
        };
        let listing = match response {
            ContentsResponse::Dir(items) => {
                Listing::Dir(items.iter().map(ContentItem::to_entry).collect())
            }
            ContentsResponse::Single(item) => Listing::File(item.to_entry()),
        };
        Ok(listing)
    }

    async fn file_content(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<String> {
        let url = self.contents_url(repo, path, Some(git_ref));
        let what = format!("file {}:{}", repo, path);
        match self.get_json::<ContentsResponse>(url, &what).await? {
            ContentsResponse::Single(item) => decode_content(&item)
                .with_context(|| format!("Failed to decode {}", path)),
            ContentsResponse::Dir(_) => anyhow::bail!("{} is a directory", path),
        }
    }

    async fn list_branches(&self, repo: &RepoRef) -> Result<Vec<String>> {
        let mut url = self.repo_url(repo, &["branches"]);
        url.query_pairs_mut().append_pair("per_page", "100");
        let branches: Vec<BranchItem> = self
            .get_json(url, &format!("branches of {}", repo))
            .await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn list_commits(
        &self,
        repo: &RepoRef,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<ProviderCommit>> {
        let mut url = self.repo_url(repo, &["commits"]);
        url.query_pairs_mut()
            .append_pair("sha", branch)
            .append_pair("per_page", &limit.clamp(1, 100).to_string());
        let items: Vec<CommitItem> = self
            .get_json(url, &format!("commits of {}@{}", repo, branch))
            .await?;
        Ok(items.into_iter().take(limit).map(ProviderCommit::from).collect())
    }

    async fn commit_diff(&self, repo: &RepoRef, sha: &str) -> Result<String> {
        let url = self.repo_url(repo, &["commits", sha]);
        let what = format!("diff of {}@{}", repo, sha);
        let response = self.send(self.get(url, DIFF_MEDIA_TYPE), &what).await?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read {}", what))
    }

    async fn default_branch(&self, repo: &RepoRef) -> Result<String> {
        let info: RepoInfo = self
            .get_json(self.repo_url(repo, &[]), &format!("repository {}", repo))
            .await?;
        Ok(info.default_branch)
    }
}

/// Decode a file's `content` field. Only base64-encoded UTF-8 text is
/// accepted: files over the API's inline size limit arrive with encoding
/// `none` and no content, and binary files are not valid UTF-8.
fn decode_content(item: &ContentItem) -> Result<String> {
    let raw = item.content.as_deref().unwrap_or_default();
    match item.encoding.as_deref() {
        Some("base64") => {
            let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
            String::from_utf8(bytes).context("content is not UTF-8 text")
        }
        Some(other) => anyhow::bail!("unsupported content encoding '{}'", other),
        None => anyhow::bail!("no inline content"),
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<IngestError>(), Some(IngestError::NotFound(_)))
}

/// Pull `message` out of a GitHub error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_url() {
        let r = RepoRef::parse("https://github.com/acme/widgets").unwrap();
        assert_eq!(r.owner, "acme");
        assert_eq!(r.repo, "widgets");

        let r = RepoRef::parse("https://github.com/acme/widgets.git/").unwrap();
        assert_eq!(r.repo, "widgets");
    }

    #[test]
    fn test_parse_ssh_and_short_forms() {
        let r = RepoRef::parse("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(r.to_string(), "acme/widgets");

        let r = RepoRef::parse("acme/widgets").unwrap();
        assert_eq!(r.to_string(), "acme/widgets");
    }

    #[test]
    fn test_parse_rejects_missing_repo() {
        assert!(RepoRef::parse("https://github.com/acme").is_err());
        assert!(RepoRef::parse("").is_err());
        assert!(RepoRef::parse("not a url").is_err());
    }

    #[test]
    fn test_contents_response_shapes() {
        let dir: ContentsResponse = serde_json::from_str(
            r#"[{"path":"src","type":"dir"},{"path":"README.md","type":"file"},{"path":"vendor/lib","type":"submodule"}]"#,
        )
        .unwrap();
        match dir {
            ContentsResponse::Dir(items) => {
                let kinds: Vec<EntryKind> = items.iter().map(|i| i.to_entry().kind).collect();
                assert_eq!(kinds, vec![EntryKind::Dir, EntryKind::File, EntryKind::Other]);
            }
            ContentsResponse::Single(_) => panic!("expected a directory listing"),
        }

        let file: ContentsResponse = serde_json::from_str(
            r#"{"path":"README.md","type":"file","content":"aGVs\nbG8=\n","encoding":"base64"}"#,
        )
        .unwrap();
        match file {
            ContentsResponse::Single(item) => {
                assert_eq!(decode_content(&item).unwrap(), "hello");
            }
            ContentsResponse::Dir(_) => panic!("expected a single file"),
        }
    }

    #[test]
    fn test_commit_item_conversion() {
        let item: CommitItem = serde_json::from_str(
            r#"{
                "sha": "abc123",
                "commit": {"message": "fix bug", "author": {"name": "Ada", "date": "2024-03-01T12:00:00Z"}},
                "author": {"avatar_url": "https://avatars.example/ada"}
            }"#,
        )
        .unwrap();
        let commit = ProviderCommit::from(item);
        assert_eq!(commit.hash, "abc123");
        assert_eq!(commit.author_name, "Ada");
        assert_eq!(commit.author_avatar, "https://avatars.example/ada");
        assert_eq!(commit.date.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_commit_without_linked_account() {
        let item: CommitItem = serde_json::from_str(
            r#"{"sha": "def", "commit": {"message": "m", "author": null}, "author": null}"#,
        )
        .unwrap();
        let commit = ProviderCommit::from(item);
        assert!(commit.author_name.is_empty());
        assert!(commit.author_avatar.is_empty());
    }

    #[test]
    fn test_decode_rejects_binary_and_uninlined_content() {
        let png: ContentsResponse = serde_json::from_str(
            r#"{"path":"logo.png","type":"file","content":"iVBORw0KGgoAAAAA/w==","encoding":"base64"}"#,
        )
        .unwrap();
        let ContentsResponse::Single(item) = png else {
            panic!("expected a single file");
        };
        assert!(decode_content(&item).is_err());

        let large: ContentsResponse = serde_json::from_str(
            r#"{"path":"dump.sql","type":"file","content":"","encoding":"none"}"#,
        )
        .unwrap();
        let ContentsResponse::Single(item) = large else {
            panic!("expected a single file");
        };
        let err = decode_content(&item).unwrap_err();
        assert!(err.to_string().contains("none"));
    }

    #[test]
    fn test_urls_are_percent_encoded() {
        let client = GitHubClient::new(&GithubConfig::default()).unwrap();
        let repo = RepoRef::parse("acme/widgets").unwrap();

        let root = client.contents_url(&repo, "", Some("main"));
        assert_eq!(
            root.as_str(),
            "https://api.github.com/repos/acme/widgets/contents/?ref=main"
        );

        let odd = client.contents_url(&repo, "docs/what?#.md", Some("fix/a#b&c+d"));
        assert_eq!(
            odd.as_str(),
            "https://api.github.com/repos/acme/widgets/contents/docs/what%3F%23.md?ref=fix%2Fa%23b%26c%2Bd"
        );
        assert_eq!(odd.path_segments().unwrap().count(), 6);
    }

    #[test]
    fn test_api_url_path_prefix_is_kept() {
        let config = GithubConfig {
            api_url: "https://ghe.example.com/api/v3/".to_string(),
            ..Default::default()
        };
        let client = GitHubClient::new(&config).unwrap();
        let repo = RepoRef::parse("acme/widgets").unwrap();
        assert_eq!(
            client.repo_url(&repo, &["commits", "abc"]).as_str(),
            "https://ghe.example.com/api/v3/repos/acme/widgets/commits/abc"
        );
        assert!(GitHubClient::new(&GithubConfig {
            api_url: "not a url".to_string(),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"message":"Bad credentials"}"#), "Bad credentials");
        assert_eq!(error_message("plain"), "plain");
    }
}
