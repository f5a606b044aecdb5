//! In-memory contents backend.
//!
//! Behaves like the remote API as far as gitform can tell: every write
//! produces a fresh version token, replacements must present the current
//! token, and directories exist only as path prefixes.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{normalize_path, ContentApi, DirEntry, EntryKind, RemoteFile, WriteReceipt};
use crate::error::{Error, Result};

/// Length of generated version tokens, matching git's hex SHA-1.
const TOKEN_LEN: usize = 40;

/// Number of calls made to each [`ContentApi`] operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    /// Calls to `get_file`.
    pub get_file: u64,
    /// Calls to `version`.
    pub version: u64,
    /// Calls to `put_file`.
    pub put_file: u64,
    /// Calls to `delete_file`.
    pub delete_file: u64,
    /// Calls to `list_dir`.
    pub list_dir: u64,
}

#[derive(Debug)]
struct StoredFile {
    sha: String,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, StoredFile>,
    revision: u64,
    commits: u64,
    counts: RequestCounts,
}

impl MemoryState {
    fn next_token(&mut self, content: &[u8]) -> String {
        self.revision += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.revision.to_le_bytes());
        hasher.update(content);
        truncate_token(hasher.finalize().to_hex().as_str())
    }

    fn next_commit(&mut self, path: &str, message: &str) -> String {
        self.commits += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.commits.to_le_bytes());
        hasher.update(path.as_bytes());
        hasher.update(message.as_bytes());
        truncate_token(hasher.finalize().to_hex().as_str())
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.files.keys().any(|p| p.starts_with(&prefix))
    }

    fn store(&mut self, path: String, content: Vec<u8>) -> String {
        let sha = self.next_token(&content);
        self.files.insert(
            path,
            StoredFile {
                sha: sha.clone(),
                content,
            },
        );
        sha
    }
}

fn truncate_token(hex: &str) -> String {
    hex[..TOKEN_LEN].to_string()
}

/// A [`ContentApi`] kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryContents {
    state: Mutex<MemoryState>,
}

impl MemoryContents {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository seeded with the given files.
    #[must_use]
    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<str>,
        C: Into<Vec<u8>>,
    {
        let mut state = MemoryState::default();
        for (path, content) in files {
            state.store(normalize_path(path.as_ref()), content.into());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("memory contents lock poisoned"))
    }

    /// Write a file directly, bypassing version checks, as another client
    /// committing to the repository would. Returns the new version token.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn insert(&self, path: &str, content: impl Into<Vec<u8>>) -> Result<String> {
        let mut state = self.state()?;
        Ok(state.store(normalize_path(path), content.into()))
    }

    /// Remove a file directly, bypassing version checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn remove(&self, path: &str) -> Result<bool> {
        let mut state = self.state()?;
        Ok(state.files.remove(&normalize_path(path)).is_some())
    }

    /// Current content of a file, without counting a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn peek(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state()?;
        Ok(state
            .files
            .get(&normalize_path(path))
            .map(|f| f.content.clone()))
    }

    /// Paths of all stored files, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn paths(&self) -> Result<Vec<String>> {
        Ok(self.state()?.files.keys().cloned().collect())
    }

    /// Number of requests served so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn request_counts(&self) -> Result<RequestCounts> {
        Ok(self.state()?.counts)
    }

    /// Reset the request counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn reset_counts(&self) -> Result<()> {
        self.state()?.counts = RequestCounts::default();
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContentApi for MemoryContents {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>> {
        let path = normalize_path(path);
        let mut state = self.state()?;
        state.counts.get_file += 1;

        if let Some(file) = state.files.get(&path) {
            return Ok(Some(RemoteFile {
                path: path.clone(),
                sha: file.sha.clone(),
                content: file.content.clone(),
            }));
        }
        if path.is_empty() || state.is_dir(&path) {
            return Err(Error::unexpected(path, "expected a file, found a directory"));
        }
        Ok(None)
    }

    async fn version(&self, path: &str) -> Result<Option<String>> {
        let path = normalize_path(path);
        let mut state = self.state()?;
        state.counts.version += 1;

        if let Some(file) = state.files.get(&path) {
            return Ok(Some(file.sha.clone()));
        }
        if path.is_empty() || state.is_dir(&path) {
            return Err(Error::unexpected(path, "expected a file, found a directory"));
        }
        Ok(None)
    }

    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<WriteReceipt> {
        let path = normalize_path(path);
        let mut state = self.state()?;
        state.counts.put_file += 1;

        if path.is_empty() || state.is_dir(&path) {
            return Err(Error::unexpected(path, "cannot write over a directory"));
        }

        let current = state.files.get(&path).map(|f| f.sha.as_str());
        match (current, sha) {
            (None, None) => {}
            (Some(current), Some(expected)) if current == expected => {}
            _ => return Err(Error::conflict(path)),
        }

        let new_sha = state.store(path.clone(), content.to_vec());
        let commit_sha = state.next_commit(&path, message);
        debug!(path = %path, sha = %new_sha, message, "memory write");

        Ok(WriteReceipt {
            path,
            sha: new_sha,
            commit_sha,
        })
    }

    async fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<()> {
        let path = normalize_path(path);
        let mut state = self.state()?;
        state.counts.delete_file += 1;

        let current = state.files.get(&path).map(|f| f.sha.clone());
        match current {
            None => Err(Error::not_found(path)),
            Some(current) if current != sha => Err(Error::conflict(path)),
            Some(_) => {
                state.files.remove(&path);
                state.next_commit(&path, message);
                debug!(path = %path, message, "memory delete");
                Ok(())
            }
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dir = normalize_path(path);
        let mut state = self.state()?;
        state.counts.list_dir += 1;

        if state.files.contains_key(&dir) {
            return Err(Error::unexpected(dir, "expected a directory, found a file"));
        }

        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut entries: BTreeMap<String, DirEntry> = BTreeMap::new();
        let mut subdirs: BTreeMap<String, blake3::Hasher> = BTreeMap::new();
        for (file_path, file) in &state.files {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                None => {
                    entries.insert(
                        rest.to_string(),
                        DirEntry {
                            name: rest.to_string(),
                            path: file_path.clone(),
                            sha: file.sha.clone(),
                            size: file.content.len() as u64,
                            kind: EntryKind::File,
                        },
                    );
                }
                Some((child, _)) => {
                    // Directory tokens change whenever anything beneath them does
                    subdirs
                        .entry(child.to_string())
                        .or_default()
                        .update(file.sha.as_bytes());
                }
            }
        }

        for (name, hasher) in subdirs {
            entries.insert(
                name.clone(),
                DirEntry {
                    path: format!("{prefix}{name}"),
                    name,
                    sha: truncate_token(hasher.finalize().to_hex().as_str()),
                    size: 0,
                    kind: EntryKind::Dir,
                },
            );
        }

        Ok(entries.into_values().collect())
    }
}
