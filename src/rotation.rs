//! Turns change events into accepted credentials.
//!
//! For every event the coordinator reads the file (with bounded retries),
//! parses and validates it, and only then swaps it into the store and
//! notifies subscribers. Anything that fails along the way is logged and
//! the previous credential stays in place.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{CredentialSpec, RetryConfig};
use crate::credentials::{Credential, CredentialSource, CredentialStore, FsSource};
use crate::error::{Error, Result};
use crate::subscription::{RotationEvent, SubscriberRegistry};
use crate::watcher::{ChangeEvent, CredentialWatcher};

/// What happened to one change event.
#[derive(Debug)]
pub enum RotationOutcome {
    /// A new credential version was stored and subscribers were notified.
    Rotated { version: u64 },
    /// The file was rewritten with the content already held.
    Unchanged { version: u64 },
    /// The update was refused; the previous credential (if any) is kept.
    Rejected(Error),
}

impl RotationOutcome {
    pub fn is_rotated(&self) -> bool {
        matches!(self, RotationOutcome::Rotated { .. })
    }
}

pub struct RotationCoordinator {
    store: Arc<CredentialStore>,
    subscribers: SubscriberRegistry,
    specs: HashMap<String, CredentialSpec>,
    retry: RetryConfig,
    source: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RotationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationCoordinator")
            .field("credentials", &self.specs.keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RotationCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        subscribers: SubscriberRegistry,
        specs: impl IntoIterator<Item = CredentialSpec>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            subscribers,
            specs: specs
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
            retry,
            source: Arc::new(FsSource),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Process one change event.
    pub async fn handle(&self, event: &ChangeEvent) -> RotationOutcome {
        let Some(spec) = self.specs.get(&event.name) else {
            warn!(credential = %event.name, "change event for unregistered credential");
            return RotationOutcome::Rejected(Error::unknown(&event.name));
        };

        let content = match self.read_with_retry(&event.path).await {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    credential = %spec.name,
                    error = %err,
                    "credential read failed; keeping last known value"
                );
                return RotationOutcome::Rejected(err);
            }
        };

        let fields = match spec.format.parse(&content, &spec.fields) {
            Ok(fields) => fields,
            Err(source) => {
                warn!(
                    credential = %spec.name,
                    path = %event.path.display(),
                    format = %spec.format,
                    error = %source,
                    "credential rejected; keeping last known value"
                );
                return RotationOutcome::Rejected(Error::Validation {
                    name: spec.name.clone(),
                    source,
                });
            }
        };

        let current = match self.store.current(&spec.name) {
            Ok(current) => current,
            Err(err) => return RotationOutcome::Rejected(err),
        };

        if let Some(existing) = &current {
            if existing.same_fields(&fields) {
                debug!(
                    credential = %spec.name,
                    version = existing.version(),
                    "credential file rewritten with identical content"
                );
                return RotationOutcome::Unchanged {
                    version: existing.version(),
                };
            }
        }

        let previous_version = current.as_ref().map(|c| c.version());
        let version = previous_version.map_or(1, |v| v + 1);
        let credential = Arc::new(Credential::new(
            spec.name.clone(),
            fields,
            version,
            self.clock.now(),
            event.modified,
        ));

        match self.store.set(Arc::clone(&credential)) {
            Ok(true) => {}
            Ok(false) => {
                // Another pass stored this version first.
                let version = self
                    .store
                    .current(&spec.name)
                    .ok()
                    .flatten()
                    .map_or(version, |c| c.version());
                return RotationOutcome::Unchanged { version };
            }
            Err(err) => return RotationOutcome::Rejected(err),
        }

        if previous_version.is_none() {
            info!(credential = %spec.name, version, "credential available");
        } else {
            info!(credential = %spec.name, version, "credential rotated");
        }

        let notified = self.subscribers.notify(&RotationEvent {
            name: spec.name.clone(),
            version,
            previous_version,
            credential,
        });
        debug!(credential = %spec.name, version, notified, "rotation subscribers notified");

        RotationOutcome::Rotated { version }
    }

    async fn read_with_retry(&self, path: &Path) -> Result<String> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.source.read(path).await {
                Ok(content) => return Ok(content),
                Err(source) if attempt >= attempts => {
                    return Err(Error::Read {
                        path: path.to_path_buf(),
                        attempts,
                        source,
                    });
                }
                Err(err) => {
                    debug!(
                        path = %path.display(),
                        attempt,
                        error = %err,
                        "credential read failed; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
            }
        }
    }

    /// Drive `watcher` until `cancel` fires, handling events in detection order.
    pub async fn run(&self, mut watcher: CredentialWatcher, cancel: CancellationToken) {
        while let Some(event) = watcher.next_event(&cancel).await {
            // Outcomes are logged inside `handle`.
            if let RotationOutcome::Rejected(Error::Read { .. }) = self.handle(&event).await {
                // The file changed but was never read; look at it again next cycle.
                watcher.forget(&event.name);
            }
        }
        debug!("credential watcher stopped");
    }
}
