//! Document store on top of a [`ContentApi`].
//!
//! Every write is an optimistic overwrite: the file's version token is
//! fetched immediately before the write and handed straight back, so the
//! last writer wins. Nothing guards the gap between the token fetch and the
//! write; a concurrent commit landing in that gap makes the write fail with
//! [`Error::Conflict`] and is surfaced to the caller as-is.

use std::fmt;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::content::{ContentApi, DirEntry, WriteReceipt};
use crate::error::{Error, Result};

/// JSON and binary document access for one repository.
#[derive(Clone)]
pub struct DocumentStore {
    api: Arc<dyn ContentApi>,
    committer: String,
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("api", &self.api.name())
            .field("committer", &self.committer)
            .finish()
    }
}

impl DocumentStore {
    /// Create a store that signs commit messages with `committer`.
    #[must_use]
    pub fn new(api: Arc<dyn ContentApi>, committer: impl Into<String>) -> Self {
        Self {
            api,
            committer: committer.into(),
        }
    }

    /// The underlying contents backend.
    #[must_use]
    pub fn api(&self) -> &Arc<dyn ContentApi> {
        &self.api
    }

    fn commit_message(&self, message: &str) -> String {
        if self.committer.is_empty() {
            message.to_string()
        } else {
            format!("{message} [{}]", self.committer)
        }
    }

    /// Read a file's raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn read_bytes(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.api.get_file(path).await?.map(|file| file.content))
    }

    /// Read and deserialize a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the content is not valid
    /// JSON for `T`.
    pub async fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        Ok(self
            .read_json_versioned(path)
            .await?
            .map(|(value, _)| value))
    }

    /// Read a JSON document together with the version token it was read at.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the content is not valid
    /// JSON for `T`.
    pub async fn read_json_versioned<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<(T, String)>> {
        let Some(file) = self.api.get_file(path).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&file.content)?;
        Ok(Some((value, file.sha)))
    }

    /// Overwrite (or create) a file with raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if either request fails.
    pub async fn write_bytes(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<WriteReceipt> {
        let current = self.api.version(path).await?;
        debug!(path, current = ?current, bytes = content.len(), "writing");

        let receipt = self
            .api
            .put_file(path, content, current.as_deref(), &self.commit_message(message))
            .await?;

        info!(path = %receipt.path, sha = %receipt.sha, "committed");
        Ok(receipt)
    }

    /// Overwrite (or create) a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or either request fails.
    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        message: &str,
    ) -> Result<WriteReceipt> {
        let content = to_json_bytes(value)?;
        self.write_bytes(path, &content, message).await
    }

    /// Read a JSON document, transform it, and write the result back.
    ///
    /// The write uses a version token fetched after `update` runs, not the
    /// one the document was read at. Commits landing between the read and
    /// the write are silently overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails or the stored content is not
    /// valid JSON for `T`.
    pub async fn update_json<T, F>(
        &self,
        path: &str,
        message: &str,
        update: F,
    ) -> Result<(T, WriteReceipt)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let current = self.read_json(path).await?;
        let next = update(current);
        let receipt = self.write_json(path, &next, message).await?;
        Ok((next, receipt))
    }

    /// Delete a file. Returns `false` if it was already absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails.
    pub async fn delete(&self, path: &str, message: &str) -> Result<bool> {
        let Some(sha) = self.api.version(path).await? else {
            debug!(path, "delete skipped, file absent");
            return Ok(false);
        };

        match self
            .api
            .delete_file(path, &sha, &self.commit_message(message))
            .await
        {
            Ok(()) => {
                info!(path, "deleted");
                Ok(true)
            }
            // Someone else removed it between the token fetch and the delete
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        self.api.list_dir(dir).await
    }
}

/// Serialize a value as pretty-printed JSON with a trailing newline.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized.
pub fn to_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContents;
    use serde_json::{json, Value};

    fn store_with(repo: &Arc<MemoryContents>) -> DocumentStore {
        DocumentStore::new(Arc::clone(repo) as Arc<dyn ContentApi>, "tester")
    }

    #[tokio::test]
    async fn test_write_then_read_json() {
        let repo = Arc::new(MemoryContents::new());
        let store = store_with(&repo);

        store
            .write_json("config.json", &json!({"title": "Site survey"}), "Save settings")
            .await
            .unwrap();

        let value: Value = store.read_json("config.json").await.unwrap().unwrap();
        assert_eq!(value["title"], "Site survey");

        let raw = repo.peek("config.json").unwrap().unwrap();
        assert!(raw.ends_with(b"}\n"));
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let repo = Arc::new(MemoryContents::new());
        let store = store_with(&repo);
        let value: Option<Value> = store.read_json("config.json").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_read_invalid_json_errors() {
        let repo = Arc::new(MemoryContents::with_files([("config.json", "not json")]));
        let store = store_with(&repo);
        let result: Result<Option<Value>> = store.read_json("config.json").await;
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_read_json_versioned_returns_token() {
        let repo = Arc::new(MemoryContents::with_files([("config.json", "{}")]));
        let store = store_with(&repo);
        let (_, sha): (Value, String) = store
            .read_json_versioned("config.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(sha), repo.version("config.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let repo = Arc::new(MemoryContents::with_files([("config.json", "{}")]));
        let alice = store_with(&repo);
        let bob = store_with(&repo);

        alice
            .write_json("config.json", &json!({"by": "alice"}), "Save")
            .await
            .unwrap();
        bob.write_json("config.json", &json!({"by": "bob"}), "Save")
            .await
            .unwrap();

        let value: Value = alice.read_json("config.json").await.unwrap().unwrap();
        assert_eq!(value["by"], "bob");
    }

    #[tokio::test]
    async fn test_write_fetches_token_immediately_before_put() {
        let repo = Arc::new(MemoryContents::with_files([("config.json", "{}")]));
        let store = store_with(&repo);
        repo.reset_counts().unwrap();

        store.write_bytes("config.json", b"{}", "Save").await.unwrap();

        let counts = repo.request_counts().unwrap();
        assert_eq!(counts.version, 1);
        assert_eq!(counts.put_file, 1);
        assert_eq!(counts.get_file, 0);
    }

    #[tokio::test]
    async fn test_update_json_overwrites_concurrent_commit() {
        let repo = Arc::new(MemoryContents::with_files([("data/log.json", "[1]")]));
        let store = store_with(&repo);

        let (next, _) = store
            .update_json("data/log.json", "Append", |current: Option<Vec<u32>>| {
                // Another client commits while this one holds the old copy
                repo.insert("data/log.json", "[1, 99]").unwrap();
                let mut items = current.unwrap_or_default();
                items.push(2);
                items
            })
            .await
            .unwrap();

        assert_eq!(next, vec![1, 2]);
        let stored: Vec<u32> = store.read_json("data/log.json").await.unwrap().unwrap();
        assert_eq!(stored, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_json_creates_missing() {
        let repo = Arc::new(MemoryContents::new());
        let store = store_with(&repo);

        let (next, receipt) = store
            .update_json("data/log.json", "Append", |current: Option<Vec<u32>>| {
                assert!(current.is_none());
                vec![7]
            })
            .await
            .unwrap();

        assert_eq!(next, vec![7]);
        assert_eq!(receipt.path, "data/log.json");
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = Arc::new(MemoryContents::with_files([("images/a.png", "a")]));
        let store = store_with(&repo);

        assert!(store.delete("images/a.png", "Remove").await.unwrap());
        assert!(!store.delete("images/a.png", "Remove").await.unwrap());
        assert!(repo.paths().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list() {
        let repo = Arc::new(MemoryContents::with_files([
            ("images/a.png", "a"),
            ("images/b.png", "b"),
        ]));
        let store = store_with(&repo);
        let entries = store.list("images").await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_commit_message() {
        let repo = Arc::new(MemoryContents::new());
        let store = store_with(&repo);
        assert_eq!(store.commit_message("Save settings"), "Save settings [tester]");

        let anonymous = DocumentStore::new(repo, "");
        assert_eq!(anonymous.commit_message("Save"), "Save");
    }

    #[test]
    fn test_debug_shows_backend_name() {
        let store = DocumentStore::new(Arc::new(MemoryContents::new()), "tester");
        let debug = format!("{store:?}");
        assert!(debug.contains("memory"));
        assert!(debug.contains("tester"));
    }

    #[test]
    fn test_to_json_bytes() {
        let bytes = to_json_bytes(&json!({"a": 1})).unwrap();
        assert_eq!(bytes, b"{\n  \"a\": 1\n}\n");
    }
}
