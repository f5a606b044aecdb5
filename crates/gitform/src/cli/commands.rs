//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde_json::Value;

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Get command arguments.
#[derive(Debug, Args)]
pub struct GetCommand {
    /// Repository path of the file
    pub path: String,

    /// Print the content as stored, without pretty-printing JSON
    #[arg(short, long)]
    pub raw: bool,
}

/// Put command arguments.
#[derive(Debug, Args)]
pub struct PutCommand {
    /// Repository path to write
    pub path: String,

    /// Local file whose content is committed
    #[arg(value_name = "LOCAL_FILE")]
    pub file: PathBuf,

    /// Commit message
    #[arg(short, long)]
    pub message: Option<String>,
}

/// Remove command arguments.
#[derive(Debug, Args)]
pub struct RmCommand {
    /// Repository path to delete
    pub path: String,

    /// Commit message
    #[arg(short, long)]
    pub message: Option<String>,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct LsCommand {
    /// Directory to list (defaults to the repository root)
    #[arg(default_value = "")]
    pub dir: String,
}

/// Submit command arguments.
#[derive(Debug, Args)]
pub struct SubmitCommand {
    /// Form field as NAME=VALUE; VALUE is parsed as JSON when it can be
    #[arg(short, long = "field", value_name = "NAME=VALUE", value_parser = parse_field)]
    pub fields: Vec<(String, Value)>,

    /// Image file to attach (PNG, JPEG, GIF, or WebP)
    #[arg(short, long = "image", value_name = "FILE")]
    pub images: Vec<PathBuf>,
}

/// Submissions command arguments.
#[derive(Debug, Args)]
pub struct SubmissionsCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Show at most this many, newest first
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Poll once and exit
    #[arg(long)]
    pub once: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        file: Option<PathBuf>,
    },
}

/// Parse a `NAME=VALUE` form field.
///
/// The value is read as JSON when it parses (`3`, `true`, `[1,2]`) and kept
/// as a string otherwise.
///
/// # Errors
///
/// Returns an error if there is no `=` or the name is empty.
pub fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("field name is empty in `{raw}`"));
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
