//! Core record types for gitform.
//!
//! This module defines the documents gitform keeps in the repository: the
//! form settings object, the submission log, and uploaded images.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A single form submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Unique identifier.
    pub id: Uuid,

    /// When the submission was made.
    pub submitted_at: DateTime<Utc>,

    /// Submitted field values, keyed by field name.
    pub fields: Map<String, Value>,

    /// Repository paths of images attached to this submission.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Submission {
    /// Create a new submission with a fresh id, timestamped now.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            fields,
            images: Vec::new(),
        }
    }

    /// Get a field value by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// The append-only list of submissions stored in one JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionLog(Vec<Submission>);

impl SubmissionLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a submission.
    pub fn push(&mut self, submission: Submission) {
        self.0.push(submission);
    }

    /// Number of submissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in append order.
    pub fn iter(&self) -> std::slice::Iter<'_, Submission> {
        self.0.iter()
    }

    /// Find a submission by id.
    #[must_use]
    pub fn find(&self, id: Uuid) -> Option<&Submission> {
        self.0.iter().find(|s| s.id == id)
    }

    /// Remove a submission by id, returning it.
    pub fn remove(&mut self, id: Uuid) -> Option<Submission> {
        let idx = self.0.iter().position(|s| s.id == id)?;
        Some(self.0.remove(idx))
    }

    /// The most recent `limit` submissions, newest first.
    #[must_use]
    pub fn latest(&self, limit: usize) -> Vec<&Submission> {
        self.0.iter().rev().take(limit).collect()
    }

    /// Consume the log into its submissions.
    #[must_use]
    pub fn into_inner(self) -> Vec<Submission> {
        self.0
    }
}

impl<'a> IntoIterator for &'a SubmissionLog {
    type Item = &'a Submission;
    type IntoIter = std::slice::Iter<'a, Submission>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The form settings document.
///
/// Kept as an opaque JSON object: gitform stores and syncs it but does not
/// interpret its fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormSettings(Map<String, Value>);

impl FormSettings {
    /// Create empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a setting.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a setting, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Remove a setting, returning it.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Number of top-level settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for FormSettings {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Portable Network Graphics.
    Png,
    /// JPEG.
    Jpeg,
    /// GIF.
    Gif,
    /// WebP.
    Webp,
}

impl ImageFormat {
    /// The MIME type of this format.
    #[must_use]
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    /// File extension used when committing.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    /// Look up a format by MIME type.
    #[must_use]
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Detect the format from the leading magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.media_type())
    }
}

/// An image waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    /// Detected format.
    pub format: ImageFormat,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Accept raw image bytes, detecting the format from their content.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a supported image format.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let format = ImageFormat::sniff(&bytes)
            .ok_or_else(|| Error::invalid_image("unrecognized image format"))?;
        Ok(Self { format, bytes })
    }

    /// Parse a `data:image/...;base64,...` URL as produced by a browser
    /// canvas or file reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed, not base64, not an image,
    /// or its content does not match the declared type.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| Error::invalid_image("not a data URL"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::invalid_image("data URL has no payload"))?;

        let mut params = header.split(';');
        let media_type = params.next().unwrap_or_default();
        if !params.any(|p| p.eq_ignore_ascii_case("base64")) {
            return Err(Error::invalid_image("data URL is not base64 encoded"));
        }
        let declared = ImageFormat::from_media_type(media_type).ok_or_else(|| {
            Error::invalid_image(format!("unsupported media type {media_type}"))
        })?;

        let compact: String = payload
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| Error::invalid_image(format!("payload is not valid base64: {e}")))?;

        match ImageFormat::sniff(&bytes) {
            Some(actual) if actual == declared => Ok(Self {
                format: declared,
                bytes,
            }),
            _ => Err(Error::invalid_image(format!(
                "content does not look like {declared}"
            ))),
        }
    }

    /// The MIME type of this image.
    #[must_use]
    pub fn media_type(&self) -> &'static str {
        self.format.media_type()
    }

    /// File extension used when committing.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
