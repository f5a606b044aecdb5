//! Error types for gitform.
//!
//! This module defines all error types used throughout the gitform crate,
//! providing detailed context for debugging and user-friendly error messages.

use thiserror::Error;

/// The main error type for gitform operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Remote Errors ===
    /// The HTTP request could not be completed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The contents API answered with an unexpected status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message reported by the API, or the raw body.
        message: String,
    },

    /// The credentials were missing, invalid, or lacked access.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Message reported by the API.
        message: String,
    },

    /// A write was rejected because the version token was stale.
    #[error("write conflict on {path}: the file changed since its version was read")]
    Conflict {
        /// Repository path of the file.
        path: String,
    },

    /// The file does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// Repository path of the file.
        path: String,
    },

    /// The API returned something other than what was asked for.
    #[error("unexpected content at {path}: {message}")]
    UnexpectedContent {
        /// Repository path that was requested.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    // === Encoding Errors ===
    /// Base64 decoding failed.
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An image could not be accepted for upload.
    #[error("invalid image: {reason}")]
    InvalidImage {
        /// Why the image was rejected.
        reason: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Sync Errors ===
    /// The sync loop was started twice.
    #[error("sync service already running")]
    SyncAlreadyRunning,

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for gitform operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a write conflict error.
    #[must_use]
    pub fn conflict(path: impl Into<String>) -> Self {
        Self::Conflict { path: path.into() }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an invalid image error.
    #[must_use]
    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }

    /// Create an unexpected content error.
    #[must_use]
    pub fn unexpected(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedContent {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a stale-version write conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this error means the file does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is an authentication or permission issue.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SyncAlreadyRunning;
        assert_eq!(err.to_string(), "sync service already running");

        let err = Error::internal("test error");
        assert_eq!(err.to_string(), "internal error: test error");
    }

    #[test]
    fn test_conflict_predicate() {
        assert!(Error::conflict("data/submissions.json").is_conflict());
        assert!(!Error::not_found("x").is_conflict());
    }

    #[test]
    fn test_not_found_predicate() {
        assert!(Error::not_found("config.json").is_not_found());
        assert!(!Error::SyncAlreadyRunning.is_not_found());
    }

    #[test]
    fn test_unauthorized_predicate() {
        let err = Error::Unauthorized {
            message: "Bad credentials".to_string(),
        };
        assert!(err.is_unauthorized());
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[test]
    fn test_conflict_display() {
        let err = Error::conflict("data/submissions.json");
        let msg = err.to_string();
        assert!(msg.contains("data/submissions.json"));
        assert!(msg.contains("conflict"));
    }

    #[test]
    fn test_api_error_display() {
        let err = Error::Api {
            status: 502,
            message: "Bad Gateway".to_string(),
        };
        assert_eq!(err.to_string(), "API error (502): Bad Gateway");
    }

    #[test]
    fn test_unexpected_content_display() {
        let err = Error::unexpected("images", "expected a file, found a directory");
        let msg = err.to_string();
        assert!(msg.contains("images"));
        assert!(msg.contains("directory"));
    }

    #[test]
    fn test_invalid_image_display() {
        let err = Error::invalid_image("unsupported media type text/plain");
        assert!(err.to_string().contains("text/plain"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::config("poll_interval_ms must be greater than 0");
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_from_base64_error() {
        use base64::Engine as _;
        let decoded = base64::engine::general_purpose::STANDARD.decode("!!not base64!!");
        if let Err(b64_err) = decoded {
            let err: Error = b64_err.into();
            assert!(matches!(err, Error::Base64(_)));
        }
    }
}
