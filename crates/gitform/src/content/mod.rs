//! Repository contents API abstraction.
//!
//! A repository's contents endpoint is the only storage gitform has. Every
//! file carries a version token (the blob SHA) that changes on each write;
//! writes that replace a file must present the token they are replacing.
//!
//! Two backends implement [`ContentApi`]:
//!
//! - [`GitHubContents`] talks to the GitHub REST API over HTTPS.
//! - [`MemoryContents`] keeps everything in process, for tests and dry runs.

mod github;
mod memory;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use github::{GitHubConfig, GitHubContents};
pub use memory::{MemoryContents, RequestCounts};

/// A file read from the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the repository root.
    pub path: String,
    /// Version token of this content.
    pub sha: String,
    /// Decoded file content.
    pub content: Vec<u8>,
}

impl RemoteFile {
    /// Interpret the content as UTF-8 text, if it is.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// The kind of an entry in a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link.
    Symlink,
    /// A git submodule.
    Submodule,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
            Self::Symlink => write!(f, "symlink"),
            Self::Submodule => write!(f, "submodule"),
        }
    }
}

/// An entry in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// File name.
    pub name: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Version token.
    pub sha: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// The outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    /// Path relative to the repository root.
    pub path: String,
    /// Version token of the new content.
    pub sha: String,
    /// Commit created by the write.
    pub commit_sha: String,
}

/// Access to a repository's files through a contents API.
///
/// Writes are optimistic: a replacement must name the version token it
/// replaces, and a stale token is reported as [`crate::Error::Conflict`].
#[async_trait::async_trait]
pub trait ContentApi: Send + Sync {
    /// The name of this backend (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Read a file. Returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the path is not a file.
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>>;

    /// Get the current version token of a file without its body, if the
    /// backend can. Returns `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn version(&self, path: &str) -> Result<Option<String>> {
        Ok(self.get_file(path).await?.map(|file| file.sha))
    }

    /// Create or replace a file.
    ///
    /// `sha` must be `None` to create a new file and the current version
    /// token to replace an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Conflict`] if `sha` does not match the current
    /// version, or another error if the request fails.
    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<WriteReceipt>;

    /// Delete a file at the given version.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if the file does not exist,
    /// [`crate::Error::Conflict`] if `sha` is stale, or another error if the
    /// request fails.
    async fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<()>;

    /// List a directory. A missing directory lists as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>>;
}

/// Normalize a repository path: trim surrounding slashes and collapse
/// empty segments.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a normalized path into its parent directory and file name.
#[must_use]
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}
