//! Polling change detection.
//!
//! The repository has no push channel, so changes are found by asking for
//! each watched file's version token on a fixed delay and comparing it with
//! the last token seen. When they differ the body is fetched and handed to
//! every subscriber, in the order they subscribed, together with the
//! resource's type tag.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::content::{normalize_path, ContentApi};
use crate::error::{Error, Result};

/// Type tag delivered with every change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// The form settings document.
    Settings,
    /// The submission log.
    Submissions,
    /// Any other watched file.
    Custom(String),
}

impl ResourceKind {
    /// Create a custom tag.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settings => write!(f, "settings"),
            Self::Submissions => write!(f, "submissions"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// A detected change to a watched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Repository path of the resource.
    pub path: String,
    /// Type tag the resource was watched with.
    pub kind: ResourceKind,
    /// New version token, `None` if the resource was removed.
    pub version: Option<String>,
    /// New content, `None` if the resource was removed.
    pub body: Option<Vec<u8>>,
}

impl ChangeEvent {
    /// Whether this event reports the resource disappearing.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.body.is_none()
    }

    /// Deserialize the body as JSON. `None` for removals.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.body
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
            .map_err(Error::from)
    }

    /// The body as UTF-8 text, if it is.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|body| std::str::from_utf8(body).ok())
    }
}

/// Identifies a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Configuration for the sync service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Delay between the end of one poll and the start of the next.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Build sync configuration from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
        }
    }
}

/// Snapshot of the sync service's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Whether the polling loop is running.
    pub is_running: bool,
    /// Number of watched resources.
    pub watches: usize,
    /// Number of subscribers.
    pub subscribers: usize,
    /// Completed polls since startup.
    pub polls: u64,
    /// Changes delivered since startup.
    pub changes: u64,
    /// Per-resource failures since startup.
    pub errors: u64,
    /// When the last poll finished.
    pub last_poll: Option<DateTime<Utc>>,
}

/// A resource that failed to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollFailure {
    /// Repository path of the resource.
    pub path: String,
    /// Rendered error.
    pub error: String,
}

/// Outcome of one pass over the watched resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Resources checked.
    pub checked: usize,
    /// Resources whose change was delivered.
    pub changed: usize,
    /// Resources that failed; they are retried on the next poll.
    pub failed: Vec<PollFailure>,
}

/// A cloneable handle to stop a running sync loop.
#[derive(Debug, Clone, Default)]
pub struct SyncHandle {
    stop_signal: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SyncHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the loop to stop, waking it if it is waiting.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        // Wakes only loops already waiting; a stored permit would cut the
        // next run's first delay short
        self.wake.notify_waiters();
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Reset the stop signal.
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Watch {
    path: String,
    kind: ResourceKind,
    last_seen: Option<String>,
}

#[derive(Default)]
struct SyncState {
    watches: Vec<Watch>,
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_subscription: u64,
    last_poll: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SyncCounters {
    polls: AtomicU64,
    changes: AtomicU64,
    errors: AtomicU64,
}

/// Watches repository files and notifies subscribers when they change.
pub struct SyncService {
    api: Arc<dyn ContentApi>,
    config: SyncConfig,
    state: Mutex<SyncState>,
    counters: SyncCounters,
    running: AtomicBool,
    handle: SyncHandle,
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("api", &self.api.name())
            .field("config", &self.config)
            .field("counters", &self.counters)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Create a sync service with nothing watched.
    #[must_use]
    pub fn new(api: Arc<dyn ContentApi>, config: SyncConfig) -> Self {
        Self {
            api,
            config,
            state: Mutex::new(SyncState::default()),
            counters: SyncCounters::default(),
            running: AtomicBool::new(false),
            handle: SyncHandle::new(),
        }
    }

    /// Create a sync service watching the configured settings and
    /// submission files.
    #[must_use]
    pub fn from_config(api: Arc<dyn ContentApi>, config: &Config) -> Self {
        let service = Self::new(api, SyncConfig::from_config(config));
        {
            let mut state = service.state.lock().unwrap_or_else(|e| e.into_inner());
            for (path, kind) in [
                (&config.layout.settings_path, ResourceKind::Settings),
                (&config.layout.submissions_path, ResourceKind::Submissions),
            ] {
                Self::upsert_watch(&mut state, normalize_path(path), kind);
            }
        }
        service
    }

    fn state(&self) -> Result<MutexGuard<'_, SyncState>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("sync state lock poisoned"))
    }

    fn upsert_watch(state: &mut SyncState, path: String, kind: ResourceKind) {
        if let Some(existing) = state.watches.iter_mut().find(|w| w.path == path) {
            existing.kind = kind;
        } else {
            state.watches.push(Watch {
                path,
                kind,
                last_seen: None,
            });
        }
    }

    /// Watch a file. Re-watching a path replaces its tag and keeps its
    /// last-seen version.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn watch(&self, path: &str, kind: ResourceKind) -> Result<()> {
        let path = normalize_path(path);
        debug!(path = %path, kind = %kind, "watching");
        Self::upsert_watch(&mut *self.state()?, path, kind);
        Ok(())
    }

    /// Stop watching a file. Returns `false` if it was not watched.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn unwatch(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        let mut state = self.state()?;
        let before = state.watches.len();
        state.watches.retain(|w| w.path != path);
        Ok(state.watches.len() != before)
    }

    /// Register a callback. Callbacks run synchronously, in registration
    /// order, on the task that polls.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let mut state = self.state()?;
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.subscribers.push((id, Arc::new(callback)));
        Ok(id)
    }

    /// Remove a callback. Returns `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let mut state = self.state()?;
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub, _)| *sub != id);
        Ok(state.subscribers.len() != before)
    }

    /// The last version token seen for a watched file.
    #[must_use]
    pub fn last_seen(&self, path: &str) -> Option<String> {
        let path = normalize_path(path);
        self.state().ok().and_then(|state| {
            state
                .watches
                .iter()
                .find(|w| w.path == path)
                .and_then(|w| w.last_seen.clone())
        })
    }

    /// A handle that stops [`SyncService::run`] from another task.
    #[must_use]
    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Whether the polling loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let (watches, subscribers, last_poll) = self
            .state()
            .map(|s| (s.watches.len(), s.subscribers.len(), s.last_poll))
            .unwrap_or_default();
        SyncStatus {
            is_running: self.is_running(),
            watches,
            subscribers,
            polls: self.counters.polls.load(Ordering::Relaxed),
            changes: self.counters.changes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            last_poll,
        }
    }

    /// Check every watched file once, delivering any changes.
    ///
    /// A file that fails is logged, reported, and left at its previous
    /// version so the next poll retries it; the others still run.
    ///
    /// # Errors
    ///
    /// Returns an error only if the internal lock is poisoned.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let targets: Vec<(String, ResourceKind, Option<String>)> = self
            .state()?
            .watches
            .iter()
            .map(|w| (w.path.clone(), w.kind.clone(), w.last_seen.clone()))
            .collect();

        let mut report = PollReport::default();
        for (path, kind, last_seen) in targets {
            report.checked += 1;
            match self.detect(&path, kind, last_seen.as_deref()).await {
                Ok(Some(event)) => {
                    self.record_seen(&event)?;
                    self.dispatch(&event)?;
                    report.changed += 1;
                }
                Ok(None) => trace!(path = %path, "unchanged"),
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to poll resource");
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    report.failed.push(PollFailure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.counters.polls.fetch_add(1, Ordering::Relaxed);
        self.state()?.last_poll = Some(Utc::now());
        Ok(report)
    }

    /// Compare the current version with the last one seen; fetch the body
    /// only if it moved.
    async fn detect(
        &self,
        path: &str,
        kind: ResourceKind,
        last_seen: Option<&str>,
    ) -> Result<Option<ChangeEvent>> {
        let current = self.api.version(path).await?;
        if current.as_deref() == last_seen {
            return Ok(None);
        }

        let event = match current {
            None => ChangeEvent {
                path: path.to_string(),
                kind,
                version: None,
                body: None,
            },
            Some(_) => match self.api.get_file(path).await? {
                Some(file) => ChangeEvent {
                    path: path.to_string(),
                    kind,
                    version: Some(file.sha),
                    body: Some(file.content),
                },
                // Removed between the version check and the fetch
                None if last_seen.is_none() => return Ok(None),
                None => ChangeEvent {
                    path: path.to_string(),
                    kind,
                    version: None,
                    body: None,
                },
            },
        };

        info!(
            path = %event.path,
            kind = %event.kind,
            version = ?event.version,
            "change detected"
        );
        Ok(Some(event))
    }

    fn record_seen(&self, event: &ChangeEvent) -> Result<()> {
        let mut state = self.state()?;
        if let Some(watch) = state.watches.iter_mut().find(|w| w.path == event.path) {
            watch.last_seen.clone_from(&event.version);
        }
        Ok(())
    }

    /// Run every callback on `event`, outside the state lock.
    fn dispatch(&self, event: &ChangeEvent) -> Result<()> {
        let callbacks: Vec<Callback> = self
            .state()?
            .subscribers
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in &callbacks {
            callback(event);
        }
        self.counters.changes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Poll repeatedly until stopped, waiting `poll_interval` after each
    /// poll completes. The first poll happens immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncAlreadyRunning`] if the loop is already running.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("sync service already running");
            return Err(Error::SyncAlreadyRunning);
        }
        self.handle.reset();

        info!(
            interval_ms = self.config.poll_interval.as_millis(),
            backend = self.api.name(),
            "starting sync loop"
        );

        while !self.handle.should_stop() {
            match self.poll_once().await {
                Ok(report) if !report.failed.is_empty() => {
                    debug!(failed = report.failed.len(), "poll finished with failures");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "poll aborted");
                }
            }

            // Created before the check so a stop landing in between still
            // wakes it
            let woken = self.handle.wake.notified();
            if self.handle.should_stop() {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                () = woken => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("sync loop stopped");
        Ok(())
    }

    /// Signal the loop to stop.
    pub fn stop(&self) {
        debug!("stopping sync loop");
        self.handle.stop();
    }
}
