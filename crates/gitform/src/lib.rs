//! `gitform` - A GitHub repository as the backend for a data collection form
//!
//! This library reads and writes JSON documents and images through a
//! repository's contents API, treating each file's blob SHA as its version
//! token. Writes are optimistic overwrites and the last writer wins. Remote
//! changes are found by polling version tokens on a fixed delay.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod collector;
pub mod config;
pub mod content;
pub mod error;
pub mod logging;
pub mod records;
pub mod store;
pub mod sync;

pub use collector::Collector;
pub use config::Config;
pub use content::{ContentApi, GitHubContents, MemoryContents};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use records::{FormSettings, ImageUpload, Submission, SubmissionLog};
pub use store::DocumentStore;
pub use sync::{ChangeEvent, ResourceKind, SyncHandle, SyncService};
