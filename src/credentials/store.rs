//! In-process cache of the latest accepted credential per logical name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use super::Credential;
use crate::error::{Error, Result};

type Slot = watch::Sender<Option<Arc<Credential>>>;

/// Latest accepted credential for every registered logical name.
///
/// The set of names is fixed at construction, so lookups never take a
/// map-wide lock. Each name owns a `watch` slot: readers clone the `Arc`
/// they find there and writers replace it in one step, so a reader sees
/// either the old credential or the new one, never a mix.
#[derive(Debug)]
pub struct CredentialStore {
    slots: HashMap<String, Slot>,
}

impl CredentialStore {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = names
            .into_iter()
            .map(|name| (name.into(), watch::channel(None).0))
            .collect();
        Self { slots }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    fn slot(&self, name: &str) -> Result<&Slot> {
        self.slots.get(name).ok_or_else(|| Error::unknown(name))
    }

    /// The current credential, or [`Error::NotYetAvailable`] before the first
    /// accepted file.
    pub fn get(&self, name: &str) -> Result<Arc<Credential>> {
        self.current(name)?
            .ok_or_else(|| Error::not_yet_available(name))
    }

    /// Like [`get`](Self::get) but reports "not yet available" as `None`.
    pub fn current(&self, name: &str) -> Result<Option<Arc<Credential>>> {
        Ok(self.slot(name)?.borrow().clone())
    }

    /// Receiver that observes every replacement for `name`.
    pub fn watch(&self, name: &str) -> Result<watch::Receiver<Option<Arc<Credential>>>> {
        Ok(self.slot(name)?.subscribe())
    }

    /// Replace the credential for its name.
    ///
    /// Refuses (returns `Ok(false)`) a credential whose version is not newer
    /// than the one already stored.
    pub(crate) fn set(&self, credential: Arc<Credential>) -> Result<bool> {
        let slot = self.slot(credential.name())?;
        let replaced = slot.send_if_modified(|current| {
            let newer = current
                .as_ref()
                .map_or(true, |existing| credential.version() > existing.version());
            if newer {
                *current = Some(credential);
            }
            newer
        });
        Ok(replaced)
    }
}
