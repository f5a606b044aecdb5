//! Configuration management for gitform.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "gitform";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "GITFORM_";

/// Keys whose environment overrides are taken verbatim. The `Env` provider
/// parses values, which turns a repository named `2024` into an integer and
/// drops the leading zeros of a branch named `007`.
const VERBATIM_ENV_KEYS: [&str; 4] = [
    "repository.owner",
    "repository.name",
    "repository.branch",
    "repository.token",
];

/// Allowed characters in repository owner and name segments.
const SLUG_PATTERN: &str = r"^[A-Za-z0-9_.-]+$";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `GITFORM_`, `__` between sections)
/// 2. TOML config file at `~/.config/gitform/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote repository configuration.
    pub repository: RepositoryConfig,
    /// Where documents live inside the repository.
    pub layout: LayoutConfig,
    /// Change detection configuration.
    pub sync: SyncSettings,
    /// HTTP client configuration.
    pub http: HttpConfig,
}

/// Remote repository configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Account or organization owning the repository.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Branch that reads and commits target.
    pub branch: String,
    /// Base URL of the REST API.
    pub api_url: String,
    /// Access token. Never written back out.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

/// Repository layout configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// JSON file holding the form settings document.
    pub settings_path: String,
    /// JSON file holding the submission log.
    pub submissions_path: String,
    /// Directory that uploaded images are committed under.
    pub images_dir: String,
    /// Name appended to every commit message.
    pub committer: String,
}

/// Change detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Delay between polls in milliseconds.
    pub poll_interval_ms: u64,
}

/// HTTP client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            name: String::new(),
            branch: "main".to_string(),
            api_url: "https://api.github.com".to_string(),
            token: None,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            settings_path: "config.json".to_string(),
            submissions_path: "data/submissions.json".to_string(),
            images_dir: "images".to_string(),
            committer: "gitform".to_string(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: concat!("gitform/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Environment variable that overrides a dotted config key.
fn env_var_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.replace('.', "__").to_uppercase())
}

fn slug_regex() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(SLUG_PATTERN).expect("slug pattern is valid"))
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Self::from_figment(Self::figment(&config_file))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_file: &Path) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        for key in VERBATIM_ENV_KEYS {
            if let Ok(value) = std::env::var(env_var_name(key)) {
                figment = figment.merge(Serialized::default(key, value));
            }
        }
        figment
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// An unset owner or repository name is accepted here so that commands
    /// which never touch the repository still work; see
    /// [`Config::require_repository`].
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let repo = &self.repository;
        for (field, value) in [("owner", &repo.owner), ("name", &repo.name)] {
            if !value.is_empty() && !slug_regex().is_match(value) {
                return Err(Error::config(format!(
                    "repository.{field} contains invalid characters: {value}"
                )));
            }
        }

        if repo.branch.trim().is_empty() {
            return Err(Error::config("repository.branch must not be empty"));
        }

        if let Err(e) = reqwest::Url::parse(&repo.api_url) {
            return Err(Error::config(format!(
                "repository.api_url is not a valid URL ({}): {e}",
                repo.api_url
            )));
        }

        if self.sync.poll_interval_ms == 0 {
            return Err(Error::config("poll_interval_ms must be greater than 0"));
        }

        if self.http.timeout_secs == 0 {
            return Err(Error::config("timeout_secs must be greater than 0"));
        }

        let layout = &self.layout;
        for (field, value) in [
            ("settings_path", &layout.settings_path),
            ("submissions_path", &layout.submissions_path),
            ("images_dir", &layout.images_dir),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("layout.{field} must not be empty")));
            }
            if value.starts_with('/') {
                return Err(Error::config(format!(
                    "layout.{field} must be relative to the repository root: {value}"
                )));
            }
        }

        Ok(())
    }

    /// Ensure a repository has been configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner or repository name is unset.
    pub fn require_repository(&self) -> Result<()> {
        if self.repository.owner.is_empty() || self.repository.name.is_empty() {
            return Err(Error::config(
                "repository.owner and repository.name must be set \
                 (config file or GITFORM_REPOSITORY__OWNER / GITFORM_REPOSITORY__NAME)",
            ));
        }
        Ok(())
    }

    /// The `owner/name` slug of the configured repository.
    #[must_use]
    pub fn repository_slug(&self) -> String {
        format!("{}/{}", self.repository.owner, self.repository.name)
    }

    /// The `owner/name` slug, or `None` while either half is unset.
    #[must_use]
    pub fn configured_repository(&self) -> Option<String> {
        if self.repository.owner.is_empty() || self.repository.name.is_empty() {
            None
        } else {
            Some(self.repository_slug())
        }
    }

    /// What a command is talking to: the repository slug, or the backend
    /// name when no repository is configured (`--offline`).
    #[must_use]
    pub fn target_label(&self, backend: &str) -> String {
        self.configured_repository()
            .unwrap_or_else(|| format!("the {backend} backend"))
    }

    /// Whether an access token is configured.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.repository
            .token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }

    /// Get the HTTP timeout as a Duration.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.repository.owner.is_empty());
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.repository.api_url, "https://api.github.com");
        assert!(config.repository.token.is_none());
        assert_eq!(config.layout.settings_path, "config.json");
        assert_eq!(config.layout.submissions_path, "data/submissions.json");
        assert_eq!(config.layout.images_dir, "images");
        assert_eq!(config.sync.poll_interval_ms, 10_000);
        assert_eq!(config.http.timeout_secs, 15);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_owner() {
        let mut config = Config::default();
        config.repository.owner = "bad owner!".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("repository.owner"));
    }

    #[test]
    fn test_validate_empty_branch() {
        let mut config = Config::default();
        config.repository.branch = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("branch"));
    }

    #[test]
    fn test_validate_bad_api_url() {
        let mut config = Config::default();
        config.repository.api_url = "not a url".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("api_url"));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.sync.poll_interval_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_interval_ms"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.http.timeout_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("timeout_secs"));
    }

    #[test]
    fn test_validate_absolute_layout_path() {
        let mut config = Config::default();
        config.layout.images_dir = "/images".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("images_dir"));
    }

    #[test]
    fn test_validate_empty_layout_path() {
        let mut config = Config::default();
        config.layout.submissions_path = String::new();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("submissions_path"));
    }

    #[test]
    fn test_require_repository() {
        let mut config = Config::default();
        assert!(config.require_repository().is_err());

        config.repository.owner = "acme".to_string();
        config.repository.name = "survey-data".to_string();
        assert!(config.require_repository().is_ok());
        assert_eq!(config.repository_slug(), "acme/survey-data");
    }

    #[test]
    fn test_target_label() {
        let mut config = Config::default();
        assert_eq!(config.configured_repository(), None);
        assert_eq!(config.target_label("memory"), "the memory backend");

        config.repository.owner = "acme".to_string();
        assert_eq!(config.target_label("memory"), "the memory backend");

        config.repository.name = "survey-data".to_string();
        assert_eq!(config.configured_repository().as_deref(), Some("acme/survey-data"));
        assert_eq!(config.target_label("github"), "acme/survey-data");
    }

    #[test]
    fn test_has_token() {
        let mut config = Config::default();
        assert!(!config.has_token());

        config.repository.token = Some("  ".to_string());
        assert!(!config.has_token());

        config.repository.token = Some("ghp_example".to_string());
        assert!(config.has_token());
    }

    #[test]
    fn test_token_is_not_serialized() {
        let mut config = Config::default();
        config.repository.token = Some("ghp_secret".to_string());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("ghp_secret"));
        assert!(!json.contains("token"));
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.http_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("gitform"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::from_figment(Config::figment(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.layout, LayoutConfig::default());
        assert_eq!(config.sync, SyncSettings::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
[repository]
owner = "acme"
name = "field-survey"
branch = "collect"
token = "ghp_from_file"

[sync]
poll_interval_ms = 2500
"#,
            )?;

            let config = Config::from_figment(Config::figment(Path::new("config.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.repository.owner, "acme");
            assert_eq!(config.repository.name, "field-survey");
            assert_eq!(config.repository.branch, "collect");
            assert_eq!(config.repository.token.as_deref(), Some("ghp_from_file"));
            assert_eq!(config.poll_interval(), Duration::from_millis(2500));
            // Untouched sections keep their defaults
            assert_eq!(config.layout.images_dir, "images");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                "[repository]\nowner = \"acme\"\nname = \"from-file\"\n",
            )?;
            jail.set_env("GITFORM_REPOSITORY__NAME", "from-env");
            jail.set_env("GITFORM_HTTP__TIMEOUT_SECS", "30");

            let config = Config::from_figment(Config::figment(Path::new("config.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.repository.owner, "acme");
            assert_eq!(config.repository.name, "from-env");
            assert_eq!(config.http.timeout_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn test_env_numeric_repository_values_stay_strings() {
        Jail::expect_with(|jail| {
            jail.set_env("GITFORM_REPOSITORY__OWNER", "1999");
            jail.set_env("GITFORM_REPOSITORY__NAME", "2024");
            jail.set_env("GITFORM_REPOSITORY__BRANCH", "007");
            jail.set_env("GITFORM_REPOSITORY__TOKEN", "123456");

            let config = Config::from_figment(Config::figment(Path::new("missing.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.repository_slug(), "1999/2024");
            assert_eq!(config.repository.branch, "007");
            assert_eq!(config.repository.token.as_deref(), Some("123456"));
            assert!(config.require_repository().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("repository.name"), "GITFORM_REPOSITORY__NAME");
        assert_eq!(env_var_name("repository.token"), "GITFORM_REPOSITORY__TOKEN");
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\npoll_interval_ms = 0").unwrap();

        let result = Config::from_figment(Config::figment(file.path()));
        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync\npoll_interval_ms = ").unwrap();

        let result = Config::from_figment(Config::figment(file.path()));
        assert!(matches!(result, Err(Error::ConfigLoad(_))));
    }

    #[test]
    fn test_layout_config_deserialize_partial() {
        let json = r#"{"images_dir": "uploads"}"#;
        let layout: LayoutConfig = serde_json::from_str(json).unwrap();
        assert_eq!(layout.images_dir, "uploads");
        assert_eq!(layout.settings_path, "config.json");
    }
}
