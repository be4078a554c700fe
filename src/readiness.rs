//! Startup readiness: have all required credentials been seen at least once?

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::credentials::CredentialStore;
use crate::error::{Error, Result};

/// Readiness of one required credential.
///
/// A credential only ever moves from `Missing` to `Valid`; later failures
/// leave the last accepted version in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReadinessState {
    Missing,
    Valid { version: u64 },
}

#[derive(Debug, Clone)]
pub struct ReadinessGate {
    store: Arc<CredentialStore>,
    required: BTreeSet<String>,
}

impl ReadinessGate {
    /// Fails with [`Error::UnknownCredential`] if a required name is not
    /// registered in the store.
    pub fn new<I, S>(store: Arc<CredentialStore>, required: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let required: BTreeSet<String> = required.into_iter().map(Into::into).collect();
        if let Some(unknown) = required.iter().find(|name| !store.contains(name)) {
            return Err(Error::unknown(unknown.as_str()));
        }
        Ok(Self { store, required })
    }

    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    pub fn state(&self, name: &str) -> ReadinessState {
        match self.store.current(name) {
            Ok(Some(credential)) => ReadinessState::Valid {
                version: credential.version(),
            },
            _ => ReadinessState::Missing,
        }
    }

    /// Per-name state for every required credential, sorted by name.
    pub fn states(&self) -> Vec<(String, ReadinessState)> {
        self.required
            .iter()
            .map(|name| (name.clone(), self.state(name)))
            .collect()
    }

    /// Required credentials that have not been accepted yet.
    pub fn missing(&self) -> Vec<String> {
        self.required
            .iter()
            .filter(|name| self.state(name) == ReadinessState::Missing)
            .cloned()
            .collect()
    }

    /// True once every required credential has been accepted at least once.
    pub fn is_ready(&self) -> bool {
        self.required
            .iter()
            .all(|name| matches!(self.state(name), ReadinessState::Valid { .. }))
    }

    /// Wait until ready. Returns `false` if `cancel` fires first.
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> bool {
        let mut receivers = Vec::new();
        for name in &self.required {
            if let Ok(rx) = self.store.watch(name) {
                receivers.push(rx);
            }
        }

        let all_present = async {
            for rx in &mut receivers {
                let present = rx.wait_for(Option::is_some).await.is_ok();
                if !present {
                    // Sender gone means the store was dropped.
                    return false;
                }
            }
            true
        };

        tokio::select! {
            _ = cancel.cancelled() => false,
            ready = all_present => {
                if ready {
                    info!(required = self.required.len(), "all required credentials available");
                }
                ready
            }
        }
    }
}
