//! Rotation notifications.
//!
//! Handlers are registered per logical name and invoked after the store has
//! already been updated, one at a time, on the task that accepted the
//! rotation. Dropping the returned [`Subscription`] unregisters the handler.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

use crate::credentials::Credential;

/// Delivered to subscribers after a credential has been accepted.
#[derive(Debug, Clone)]
pub struct RotationEvent {
    pub name: String,
    pub version: u64,
    /// `None` for the first credential ever accepted for this name.
    pub previous_version: Option<u64>,
    pub credential: Arc<Credential>,
}

impl RotationEvent {
    pub fn is_initial(&self) -> bool {
        self.previous_version.is_none()
    }
}

pub type RotationHandler = Arc<dyn Fn(&RotationEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, RotationHandler)>>,
}

/// Registered rotation handlers, keyed by logical name.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry").finish_non_exhaustive()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `handler` for rotations of `name`.
    ///
    /// Does not check that `name` is registered in the store; callers that
    /// need that check go through [`CredentialService::subscribe`](crate::CredentialService::subscribe).
    pub fn subscribe<F>(&self, name: &str, handler: F) -> Subscription
    where
        F: Fn(&RotationEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .handlers
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            name: name.to_string(),
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live handlers for `name`.
    pub fn count(&self, name: &str) -> usize {
        self.lock().handlers.get(name).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's name.
    ///
    /// The handler list is copied before any handler runs, so handlers may
    /// subscribe or unsubscribe without deadlocking. A panicking handler is
    /// logged and does not stop the others.
    pub fn notify(&self, event: &RotationEvent) -> usize {
        let handlers: Vec<RotationHandler> = self
            .lock()
            .handlers
            .get(&event.name)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(
                    credential = %event.name,
                    version = event.version,
                    "rotation handler panicked"
                );
            }
        }
        handlers.len()
    }
}

/// Handle for a registered rotation handler.
///
/// The handler stays registered until this handle is dropped or
/// [`unsubscribe`](Self::unsubscribe) is called.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    name: String,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = registry.handlers.get_mut(&self.name) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                registry.handlers.remove(&self.name);
            }
        }
    }
}
