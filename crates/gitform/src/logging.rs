//! Diagnostic output for the `gitform` binary.
//!
//! The library only emits `tracing` events. The binary installs a subscriber
//! that writes them to stderr, leaving stdout to command output such as
//! `gitform get` or `submissions --json`.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events are capped below gitform's own level. reqwest and
/// hyper log every connection and header at debug.
const HTTP_TARGETS: [&str; 3] = ["reqwest", "hyper", "hyper_util"];

/// How much gitform reports about requests, commits, and polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only (`-q`).
    Quiet,
    /// Commits, detected changes, and warnings.
    #[default]
    Normal,
    /// Every request and write (`-v`).
    Verbose,
    /// Unchanged polls too, plus HTTP client internals (`-vv`).
    Trace,
}

impl Verbosity {
    /// Map the CLI's `-v` count and `-q` flag. `-q` wins.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Level applied to gitform's own events.
    #[must_use]
    pub fn level(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Level applied to the HTTP client stack.
    fn http_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal | Self::Verbose => Level::WARN,
            Self::Trace => Level::DEBUG,
        }
    }

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[must_use]
    pub fn directive(&self) -> String {
        let http = self.http_level();
        let mut directive = format!("gitform={}", self.level());
        for target in HTTP_TARGETS {
            directive.push_str(&format!(",{target}={http}"));
        }
        directive
    }
}

/// Install the stderr subscriber. `RUST_LOG`, when set, replaces the
/// directive derived from `verbosity`. Calling this again is a no-op.
///
/// ```no_run
/// use gitform::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(1, false));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity == Verbosity::Trace)
                .without_time(),
        )
        .try_init();
}

/// Warnings and errors only, captured per test.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("gitform=warn")
        .with_test_writer()
        .try_init();
}
