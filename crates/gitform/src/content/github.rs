//! GitHub REST contents API backend.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{normalize_path, split_parent, ContentApi, DirEntry, EntryKind, RemoteFile, WriteReceipt};
use crate::config::Config;
use crate::error::{Error, Result};

/// Media type requested from the API.
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// Pinned REST API version.
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Maximum number of entries the contents endpoint returns for a directory.
const LISTING_LIMIT: usize = 1000;

/// Connection settings for [`GitHubContents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubConfig {
    /// Base URL of the REST API.
    pub api_url: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Branch to read from and commit to.
    pub branch: String,
    /// Optional access token.
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl GitHubConfig {
    /// Build connection settings from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_url: config.repository.api_url.clone(),
            owner: config.repository.owner.clone(),
            repo: config.repository.name.clone(),
            branch: config.repository.branch.clone(),
            token: config
                .repository
                .token
                .clone()
                .filter(|t| !t.trim().is_empty()),
            timeout: config.http_timeout(),
            user_agent: config.http.user_agent.clone(),
        }
    }
}

/// [`ContentApi`] backed by `GET/PUT/DELETE /repos/{owner}/{repo}/contents/{path}`.
#[derive(Debug, Clone)]
pub struct GitHubContents {
    config: GitHubConfig,
    base: Url,
    client: Client,
}

impl GitHubContents {
    /// Create a client for the configured repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL or token is malformed, or the HTTP
    /// client cannot be built.
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| Error::config(format!("invalid API URL {}: {e}", config.api_url)))?;
        if base.cannot_be_a_base() {
            return Err(Error::config(format!(
                "API URL cannot be used as a base: {}",
                config.api_url
            )));
        }

        let client = Client::builder()
            .default_headers(default_headers(&config)?)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// Connection settings in use.
    #[must_use]
    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn repo_url(&self, tail: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("repos")
                .push(&self.config.owner)
                .push(&self.config.repo)
                .extend(tail);
        }
        url
    }

    /// URL of the contents endpoint for a path.
    fn contents_url(&self, path: &str) -> Url {
        let path = normalize_path(path);
        let mut tail = vec!["contents"];
        tail.extend(path.split('/').filter(|s| !s.is_empty()));
        self.repo_url(&tail)
    }

    /// URL for reading a path at the configured branch.
    fn read_url(&self, path: &str) -> Url {
        let mut url = self.contents_url(path);
        url.query_pairs_mut().append_pair("ref", &self.config.branch);
        url
    }

    fn blob_url(&self, sha: &str) -> Url {
        self.repo_url(&["git", "blobs", sha])
    }

    /// Fetch and decode the contents endpoint. `None` on 404.
    async fn fetch_contents(&self, path: &str) -> Result<Option<ContentsResponse>> {
        let url = self.read_url(path);
        debug!(%url, "GET contents");
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            trace!(path, "contents not found");
            return Ok(None);
        }
        let response = check_status(response, path, false).await?;
        Ok(Some(response.json().await?))
    }

    async fn fetch_blob(&self, path: &str, sha: &str) -> Result<Vec<u8>> {
        let url = self.blob_url(sha);
        debug!(%url, path, "GET blob");
        let response = self.client.get(url).send().await?;
        let response = check_status(response, path, false).await?;
        let blob: BlobResponse = response.json().await?;
        blob.decode()
    }
}

#[async_trait::async_trait]
impl ContentApi for GitHubContents {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>> {
        let Some(contents) = self.fetch_contents(path).await? else {
            return Ok(None);
        };

        let item = match contents {
            ContentsResponse::Item(item) if item.kind == EntryKind::File => item,
            ContentsResponse::Item(item) => {
                return Err(Error::unexpected(
                    path,
                    format!("expected a file, found a {}", item.kind),
                ))
            }
            ContentsResponse::Listing(_) => {
                return Err(Error::unexpected(path, "expected a file, found a directory"))
            }
        };

        let content = match item.encoding.as_deref() {
            Some("base64") => decode_content(item.content.as_deref().unwrap_or_default())?,
            // Files over 1 MB come back without content
            Some("none") | None => self.fetch_blob(path, &item.sha).await?,
            Some(other) => {
                return Err(Error::unexpected(
                    path,
                    format!("unsupported content encoding: {other}"),
                ))
            }
        };

        Ok(Some(RemoteFile {
            path: item.path,
            sha: item.sha,
            content,
        }))
    }

    async fn version(&self, path: &str) -> Result<Option<String>> {
        let normalized = normalize_path(path);
        let (parent, name) = split_parent(&normalized);
        let listing = self.list_dir(parent).await?;
        let truncated = listing.len() >= LISTING_LIMIT;

        match listing.into_iter().find(|entry| entry.name == name) {
            Some(entry) if entry.kind == EntryKind::File => Ok(Some(entry.sha)),
            Some(entry) => Err(Error::unexpected(
                path,
                format!("expected a file, found a {}", entry.kind),
            )),
            // Large directories are cut off; ask for the file itself
            None if truncated => Ok(self.get_file(path).await?.map(|file| file.sha)),
            None => Ok(None),
        }
    }

    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<WriteReceipt> {
        let body = PutBody {
            message,
            content: STANDARD.encode(content),
            branch: &self.config.branch,
            sha,
        };
        let url = self.contents_url(path);
        debug!(%url, bytes = content.len(), replacing = ?sha, "PUT contents");

        let response = self.client.put(url).json(&body).send().await?;
        let response = check_status(response, path, true).await?;
        let put: PutResponse = response.json().await?;

        Ok(WriteReceipt {
            path: put.content.path,
            sha: put.content.sha,
            commit_sha: put.commit.sha,
        })
    }

    async fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<()> {
        let body = DeleteBody {
            message,
            sha,
            branch: &self.config.branch,
        };
        let url = self.contents_url(path);
        debug!(%url, sha, "DELETE contents");

        let response = self.client.delete(url).json(&body).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::not_found(path));
        }
        check_status(response, path, true).await?;
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        match self.fetch_contents(path).await? {
            None => Ok(Vec::new()),
            Some(ContentsResponse::Listing(entries)) => Ok(entries),
            Some(ContentsResponse::Item(item)) => Err(Error::unexpected(
                path,
                format!("expected a directory, found a {}", item.kind),
            )),
        }
    }
}

fn default_headers(config: &GitHubConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
    headers.insert(
        "X-GitHub-Api-Version",
        HeaderValue::from_static(GITHUB_API_VERSION),
    );
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent)
            .map_err(|e| Error::config(format!("invalid user agent: {e}")))?,
    );
    if let Some(token) = &config.token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| Error::config(format!("invalid access token: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

/// Pass successful responses through, turn the rest into errors.
async fn check_status(response: Response, path: &str, write: bool) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body, path, write))
}

fn status_error(status: StatusCode, body: &str, path: &str, write: bool) -> Error {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized { message },
        StatusCode::NOT_FOUND => Error::not_found(path),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY if write => Error::conflict(path),
        _ => Error::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Decode the base64 `content` field, which GitHub wraps at 60 columns.
fn decode_content(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<DirEntry>),
    Item(ContentItem),
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: EntryKind,
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

impl BlobResponse {
    fn decode(self) -> Result<Vec<u8>> {
        match self.encoding.as_str() {
            "base64" => decode_content(&self.content),
            _ => Ok(self.content.into_bytes()),
        }
    }
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    path: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}
