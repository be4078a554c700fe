//! The consumer-facing entry point.
//!
//! [`CredentialService`] owns the store, the readiness gate and the
//! subscriber registry built from a [`ResolvedConfig`], and runs one
//! watcher task per logical name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{CredentialSpec, ResolvedConfig, RetryConfig};
use crate::credentials::{
    Credential, CredentialFormat, CredentialSource, CredentialStore, FsSource,
};
use crate::error::{Error, Result};
use crate::readiness::{ReadinessGate, ReadinessState};
use crate::rotation::{RotationCoordinator, RotationOutcome};
use crate::staleness::{check_staleness, StalenessCheck};
use crate::subscription::{RotationEvent, SubscriberRegistry, Subscription};
use crate::watcher::CredentialWatcher;

pub struct CredentialService {
    specs: Vec<CredentialSpec>,
    retry: RetryConfig,
    store: Arc<CredentialStore>,
    gate: ReadinessGate,
    subscribers: SubscriberRegistry,
    source: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialService")
            .field("specs", &self.specs)
            .field("retry", &self.retry)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl CredentialService {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let specs: Vec<CredentialSpec> = config.credentials.values().cloned().collect();
        let store = Arc::new(CredentialStore::new(specs.iter().map(|s| s.name.clone())));
        let gate = ReadinessGate::new(Arc::clone(&store), config.required_names())?;

        Ok(Self {
            specs,
            retry: config.retry.clone(),
            store,
            gate,
            subscribers: SubscriberRegistry::new(),
            source: Arc::new(FsSource),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.source = source;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// The current credential for `name`.
    ///
    /// Errors with [`Error::NotYetAvailable`] until the first valid file has
    /// been accepted, and with [`Error::UnknownCredential`] for names not in
    /// the configuration.
    pub fn get_credential(&self, name: &str) -> Result<Arc<Credential>> {
        self.store.get(name)
    }

    /// Call `handler` after every accepted rotation of `name`.
    pub fn subscribe<F>(&self, name: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(&RotationEvent) + Send + Sync + 'static,
    {
        if !self.store.contains(name) {
            return Err(Error::unknown(name));
        }
        Ok(self.subscribers.subscribe(name, handler))
    }

    pub fn watch(&self, name: &str) -> Result<watch::Receiver<Option<Arc<Credential>>>> {
        self.store.watch(name)
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub async fn wait_ready(&self, cancel: &CancellationToken) -> bool {
        self.gate.wait_ready(cancel).await
    }

    fn coordinator(&self) -> RotationCoordinator {
        RotationCoordinator::new(
            Arc::clone(&self.store),
            self.subscribers.clone(),
            self.specs.iter().cloned(),
            self.retry.clone(),
        )
        .with_source(Arc::clone(&self.source))
        .with_clock(Arc::clone(&self.clock))
    }

    fn watcher_for(&self, spec: &CredentialSpec) -> CredentialWatcher {
        let watcher =
            CredentialWatcher::new(spec.poll_interval).with_clock(Arc::clone(&self.clock));
        match spec.max_age {
            Some(max_age) => watcher.watch_with_max_age(&spec.name, &spec.path, max_age),
            None => watcher.watch(&spec.name, &spec.path),
        }
    }

    /// Scan every configured file once and handle whatever is there.
    ///
    /// Files that are missing are skipped. Content identical to what is
    /// already held comes back as [`RotationOutcome::Unchanged`].
    pub async fn refresh_once(&self) -> Vec<(String, RotationOutcome)> {
        let coordinator = self.coordinator();
        let mut outcomes = Vec::new();
        for spec in &self.specs {
            let mut watcher = self.watcher_for(spec);
            for event in watcher.poll().await {
                let outcome = coordinator.handle(&event).await;
                outcomes.push((event.name, outcome));
            }
        }
        outcomes
    }

    /// Start one background watcher task per configured credential.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, cancel: CancellationToken) -> WatchHandle {
        let coordinator = Arc::new(self.coordinator());
        let tracker = TaskTracker::new();

        for spec in &self.specs {
            let watcher = self.watcher_for(spec);
            let coordinator = Arc::clone(&coordinator);
            let cancel = cancel.clone();
            debug!(
                credential = %spec.name,
                path = %spec.path.display(),
                interval = %crate::duration::format_duration(spec.poll_interval),
                "starting credential watcher"
            );
            tracker.spawn(async move { coordinator.run(watcher, cancel).await });
        }
        tracker.close();

        info!(credentials = self.specs.len(), "credential watchers started");
        WatchHandle { cancel, tracker }
    }

    /// Snapshot of every configured credential, without secret values.
    ///
    /// Staleness is measured from the file's current modification time, so a
    /// rewrite with identical content counts as fresh. A deleted file falls
    /// back to the time of the file that produced the held version.
    pub fn report(&self) -> StatusReport {
        let now = self.clock.now();
        let credentials = self
            .specs
            .iter()
            .map(|spec| {
                let current = self.store.current(&spec.name).ok().flatten();
                let state = match &current {
                    Some(credential) => ReadinessState::Valid {
                        version: credential.version(),
                    },
                    None => ReadinessState::Missing,
                };
                let (version, status) = match state {
                    ReadinessState::Valid { version } => (Some(version), "valid"),
                    ReadinessState::Missing => (None, "missing"),
                };
                CredentialStatus {
                    name: spec.name.clone(),
                    path: spec.path.clone(),
                    format: spec.format,
                    required: spec.required,
                    state: status,
                    version,
                    fields: current
                        .as_ref()
                        .map(|c| c.field_names().map(str::to_string).collect())
                        .unwrap_or_default(),
                    observed_at: current.as_ref().map(|c| c.observed_at()),
                    modified_at: current.as_ref().and_then(|c| c.modified_at()),
                    staleness: spec.max_age.map(|max_age| {
                        let modified = file_modified(&spec.path)
                            .or_else(|| current.as_ref().and_then(|c| c.modified_at()));
                        check_staleness(modified, max_age, now)
                    }),
                }
            })
            .collect();

        StatusReport {
            ready: self.gate.is_ready(),
            missing: self.gate.missing(),
            credentials,
        }
    }
}

/// Modification time of the file on disk, the same stamp the watcher checks.
fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Running watcher tasks started by [`CredentialService::spawn`].
#[derive(Debug)]
pub struct WatchHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl WatchHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for every watcher task to stop.
    pub async fn join(self) {
        self.tracker.wait().await;
    }

    /// Cancel and wait; returns within about one poll interval.
    pub async fn shutdown(self) {
        self.cancel();
        self.join().await;
        info!("credential watchers stopped");
    }
}

/// Serializable overview used by the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub ready: bool,
    pub missing: Vec<String>,
    pub credentials: Vec<CredentialStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub name: String,
    pub path: PathBuf,
    pub format: CredentialFormat,
    pub required: bool,
    pub state: &'static str,
    pub version: Option<u64>,
    pub fields: Vec<String>,
    pub observed_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub staleness: Option<StalenessCheck>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::Path;
    use tempfile::TempDir;

    fn service(dir: &Path, toml: &str) -> CredentialService {
        let config: Config = toml::from_str(toml).unwrap();
        let resolved = config.resolve(dir).unwrap();
        CredentialService::from_config(&resolved).unwrap()
    }

    #[test]
    fn test_subscribe_unknown_name() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path(), "secrets_dir = \".\"\n[credentials.a]\n");
        let err = service.subscribe("b", |_| {}).unwrap_err();
        assert!(matches!(err, Error::UnknownCredential { .. }));
    }

    #[tokio::test]
    async fn test_refresh_once_skips_missing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), "alpha").unwrap();
        let service = service(
            dir.path(),
            "secrets_dir = \".\"\n[credentials.a]\n[credentials.b]\n",
        );

        let outcomes = service.refresh_once().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "a");
        assert!(outcomes[0].1.is_rotated());
        assert!(!service.is_ready());
        assert_eq!(service.gate().missing(), vec!["b".to_string()]);

        // A second scan sees the same content.
        let outcomes = service.refresh_once().await;
        assert!(matches!(outcomes[0].1, RotationOutcome::Unchanged { version: 1 }));
    }

    #[tokio::test]
    async fn test_report_has_no_secret_values() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("db"), "username=app\npassword=s3cr3t\n").unwrap();
        let service = service(
            dir.path(),
            r#"
secrets_dir = "."
[credentials.db]
format = "key-value"
fields = ["username", "password"]
max_age = "1h"
[credentials.token]
required = false
"#,
        );
        service.refresh_once().await;

        let report = service.report();
        assert!(report.ready);
        assert!(report.missing.is_empty());

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("s3cr3t"));

        let db = &report.credentials[0];
        assert_eq!(db.name, "db");
        assert_eq!(db.state, "valid");
        assert_eq!(db.version, Some(1));
        assert_eq!(db.fields, vec!["password", "username"]);
        assert!(db.staleness.is_some());

        let token = &report.credentials[1];
        assert_eq!(token.state, "missing");
        assert!(token.staleness.is_none());
    }
}
