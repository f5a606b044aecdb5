//! Command-line interface for gitform.
//!
//! This module provides the CLI structure for the `gitform` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    parse_field, ConfigCommand, GetCommand, LsCommand, PutCommand, RmCommand, StatusCommand,
    SubmissionsCommand, SubmitCommand, WatchCommand,
};

use crate::logging::Verbosity;

/// gitform - Use a GitHub repository as a form backend
///
/// Reads and writes JSON documents and images through the repository
/// contents API, and watches them for changes by polling.
#[derive(Debug, Parser)]
#[command(name = "gitform")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use an empty in-memory repository instead of the network
    #[arg(long, global = true)]
    pub offline: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show repository and layout status
    Status(StatusCommand),

    /// Print a file
    Get(GetCommand),

    /// Commit a local file, overwriting whatever is there
    Put(PutCommand),

    /// Delete a file
    Rm(RmCommand),

    /// List a directory
    Ls(LsCommand),

    /// Record a form submission
    Submit(SubmitCommand),

    /// List recorded submissions
    Submissions(SubmissionsCommand),

    /// Print changes to the settings and submissions files as they happen
    Watch(WatchCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}
