//! Data collection service.
//!
//! Ties the document store to the repository layout: where the settings
//! document lives, where submissions are appended, and where images go.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, LayoutConfig};
use crate::content::{normalize_path, ContentApi, DirEntry, WriteReceipt};
use crate::error::Result;
use crate::records::{FormSettings, ImageUpload, Submission, SubmissionLog};
use crate::store::DocumentStore;

/// Reads and writes collected data in a repository.
#[derive(Debug, Clone)]
pub struct Collector {
    store: DocumentStore,
    layout: LayoutConfig,
}

impl Collector {
    /// Create a collector over a store with the given layout.
    #[must_use]
    pub fn new(store: DocumentStore, layout: LayoutConfig) -> Self {
        Self { store, layout }
    }

    /// Create a collector from application configuration.
    #[must_use]
    pub fn from_config(api: Arc<dyn ContentApi>, config: &Config) -> Self {
        let store = DocumentStore::new(api, config.layout.committer.clone());
        Self::new(store, config.layout.clone())
    }

    /// The underlying document store.
    #[must_use]
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// The repository layout in use.
    #[must_use]
    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Load the form settings. Missing settings load as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the document is not a JSON
    /// object.
    pub async fn load_settings(&self) -> Result<FormSettings> {
        Ok(self
            .store
            .read_json(&self.layout.settings_path)
            .await?
            .unwrap_or_default())
    }

    /// Overwrite the form settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn save_settings(&self, settings: &FormSettings) -> Result<WriteReceipt> {
        self.store
            .write_json(&self.layout.settings_path, settings, "Update settings")
            .await
    }

    /// Load the submission log. A missing log loads as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the log is malformed.
    pub async fn submissions(&self) -> Result<SubmissionLog> {
        Ok(self
            .store
            .read_json(&self.layout.submissions_path)
            .await?
            .unwrap_or_default())
    }

    /// Repository path for the `n`th image (1-based) of a submission.
    #[must_use]
    pub fn image_path(&self, submission: Uuid, n: usize, image: &ImageUpload) -> String {
        normalize_path(&format!(
            "{}/{submission}-{n}.{}",
            self.layout.images_dir,
            image.extension()
        ))
    }

    /// Record a submission.
    ///
    /// Images are committed first, one write each, then the submission is
    /// appended to the log. If an image fails, nothing is appended; images
    /// already committed stay where they are.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails.
    pub async fn submit(
        &self,
        fields: Map<String, Value>,
        images: Vec<ImageUpload>,
    ) -> Result<Submission> {
        let mut submission = Submission::new(fields);

        for (idx, image) in images.iter().enumerate() {
            let path = self.image_path(submission.id, idx + 1, image);
            debug!(path = %path, bytes = image.len(), media_type = image.media_type(), "uploading image");
            self.store
                .write_bytes(&path, &image.bytes, &format!("Add image {path}"))
                .await?;
            submission.images.push(path);
        }

        let record = submission.clone();
        self.store
            .update_json(
                &self.layout.submissions_path,
                &format!("Add submission {}", submission.id),
                move |log: Option<SubmissionLog>| {
                    let mut log = log.unwrap_or_default();
                    log.push(record);
                    log
                },
            )
            .await?;

        info!(
            id = %submission.id,
            fields = submission.fields.len(),
            images = submission.images.len(),
            "submission recorded"
        );
        Ok(submission)
    }

    /// Fetch an image's bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn fetch_image(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.store.read_bytes(path).await
    }

    /// List the images directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_images(&self) -> Result<Vec<DirEntry>> {
        self.store.list(&self.layout.images_dir).await
    }

    /// Remove a submission from the log and delete its images.
    ///
    /// Returns `false` if no submission has that id.
    ///
    /// # Errors
    ///
    /// Returns an error if any request fails.
    pub async fn delete_submission(&self, id: Uuid) -> Result<bool> {
        let Some(existing) = self.submissions().await?.find(id).cloned() else {
            return Ok(false);
        };

        self.store
            .update_json(
                &self.layout.submissions_path,
                &format!("Remove submission {id}"),
                move |log: Option<SubmissionLog>| {
                    let mut log = log.unwrap_or_default();
                    log.remove(id);
                    log
                },
            )
            .await?;

        for path in &existing.images {
            self.store
                .delete(path, &format!("Remove image {path}"))
                .await?;
        }

        info!(id = %id, images = existing.images.len(), "submission removed");
        Ok(true)
    }
}
