//! Polling watcher for externally written credential files.
//!
//! Each cycle costs one `stat` per watched path. A file counts as changed
//! when its modification time or length differs from the last cycle.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::staleness::{check_staleness, log_credential_staleness};

/// A detected creation or modification of a watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub name: String,
    pub path: PathBuf,
    pub modified: Option<DateTime<Utc>>,
}

/// What the watcher remembers about a file between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug)]
struct WatchedFile {
    name: String,
    path: PathBuf,
    max_age: Option<Duration>,
    last_seen: Option<FileStamp>,
    stale_reported: bool,
}

impl WatchedFile {
    fn forget(&mut self) {
        self.last_seen = None;
        self.stale_reported = false;
    }
}

/// Watches a fixed set of (logical name, path) pairs.
pub struct CredentialWatcher {
    files: Vec<WatchedFile>,
    poll_interval: Duration,
    pending: VecDeque<ChangeEvent>,
    reported_stale: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CredentialWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialWatcher")
            .field("files", &self.files)
            .field("poll_interval", &self.poll_interval)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl CredentialWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            files: Vec::new(),
            poll_interval,
            pending: VecDeque::new(),
            reported_stale: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Watch `path` under the logical name `name`.
    pub fn watch(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.add(name.into(), path.into(), None);
        self
    }

    /// Watch `path` and warn when it has not been rewritten within `max_age`.
    pub fn watch_with_max_age(
        mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        max_age: Duration,
    ) -> Self {
        self.add(name.into(), path.into(), Some(max_age));
        self
    }

    fn add(&mut self, name: String, path: PathBuf, max_age: Option<Duration>) {
        self.files.push(WatchedFile {
            name,
            path,
            max_age,
            last_seen: None,
            stale_reported: false,
        });
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Forget every observed stamp; the next cycle reports all existing files.
    pub fn reset(&mut self) {
        self.pending.clear();
        for file in &mut self.files {
            file.forget();
        }
    }

    /// Forget the stamp observed for `name`, so the next cycle reports the
    /// file again if it still exists.
    ///
    /// Used when a change was detected but the file could not be read.
    pub fn forget(&mut self, name: &str) {
        for file in self.files.iter_mut().filter(|f| f.name == name) {
            file.forget();
        }
    }

    /// Names whose staleness warning was logged during the last cycle.
    ///
    /// A warning is logged once per observed stamp; a rewrite arms it again.
    pub fn reported_stale(&self) -> &[String] {
        &self.reported_stale
    }

    /// Run one poll cycle and return the files that appeared or changed.
    pub async fn poll(&mut self) -> Vec<ChangeEvent> {
        let now = self.clock.now();
        let mut events = Vec::new();
        self.reported_stale.clear();

        for file in &mut self.files {
            let Some(stamp) = stat(&file.path).await else {
                if file.last_seen.take().is_some() {
                    info!(
                        credential = %file.name,
                        path = %file.path.display(),
                        "credential file disappeared; keeping last known value"
                    );
                } else {
                    debug!(
                        credential = %file.name,
                        path = %file.path.display(),
                        "credential file not present yet"
                    );
                }
                continue;
            };

            let modified = stamp.modified.map(DateTime::<Utc>::from);

            if file.last_seen != Some(stamp) {
                file.last_seen = Some(stamp);
                file.stale_reported = false;
                debug!(credential = %file.name, path = %file.path.display(), "credential file changed");
                events.push(ChangeEvent {
                    name: file.name.clone(),
                    path: file.path.clone(),
                    modified,
                });
            }

            if let Some(max_age) = file.max_age {
                let check = check_staleness(modified, max_age, now);
                if check.is_stale && !file.stale_reported {
                    log_credential_staleness(&file.name, &check);
                    file.stale_reported = true;
                    self.reported_stale.push(file.name.clone());
                }
            }
        }

        events
    }

    /// Next change event, polling every interval until one shows up.
    ///
    /// Returns `None` once `cancel` fires; at most one interval passes
    /// between cancellation and return. The watcher keeps its state, so it
    /// can be driven again later with a fresh token.
    pub async fn next_event(&mut self, cancel: &CancellationToken) -> Option<ChangeEvent> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let events = self.poll().await;
            if !events.is_empty() {
                self.pending.extend(events);
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

async fn stat(path: &Path) -> Option<FileStamp> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    Some(FileStamp {
        modified: metadata.modified().ok(),
        len: metadata.len(),
    })
}
