//! Listener registries and revocable subscriptions
//!
//! Every stream a service exposes is a [`Listeners`] registry. Subscribing
//! returns a [`Subscription`]; revoking it removes exactly that listener by
//! key, and a second revoke is a no-op. Notification walks a snapshot of the
//! registry, so a listener may revoke itself (or others) mid-delivery.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_key: u64,
    entries: BTreeMap<u64, Listener<T>>,
}

/// Ordered set of listeners for one event stream
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_key: 0,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Number of live listeners
    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener. Outstanding subscriptions become no-ops.
    pub fn clear(&self) {
        lock(&self.registry).entries.clear();
    }
}

impl<T: 'static> Listeners<T> {
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let key = {
            let mut registry = lock(&self.registry);
            let key = registry.next_key;
            registry.next_key += 1;
            registry.entries.insert(key, Arc::new(listener));
            key
        };

        let registry: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).entries.remove(&key);
            }
        })
    }

    /// Deliver `value` to every listener registered at the time of the call
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = lock(&self.registry).entries.values().cloned().collect();
        for listener in snapshot {
            listener(value);
        }
    }
}

/// Opaque unsubscribe capability
#[must_use = "dropping a Subscription leaves the listener registered"]
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Remove the associated listener. Idempotent.
    pub fn unsubscribe(&self) {
        let cancel = lock(&self.cancel).take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.cancel).is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Lock a mutex, recovering the guard if a listener panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
