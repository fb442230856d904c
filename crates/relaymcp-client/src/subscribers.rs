//! Ordered callback registries
//!
//! State observers, notification subscribers, progress subscribers and
//! elicitation handlers all live in a [`SubscriberRegistry`]: entries are keyed
//! by a monotonically increasing id, so iteration follows registration order
//! and removal does not disturb the others. Emission works on a snapshot, so a
//! callback may subscribe or unsubscribe without deadlocking.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Identifier of a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle to a registered callback
///
/// Call [`Subscription::unsubscribe`] to remove the callback. Dropping the
/// handle leaves the callback registered for the lifetime of its owner.
pub struct Subscription {
    id: SubscriptionId,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Id of the registered callback
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub(crate) struct SubscriberRegistry<F: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<SubscriptionId, Arc<F>>>,
}

impl<F: ?Sized + Send + Sync + 'static> SubscriberRegistry<F> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    /// Register `callback`; the returned handle removes it again
    pub(crate) fn subscribe(self: &Arc<Self>, callback: Arc<F>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().insert(id, callback);

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(id, move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Callbacks in registration order
    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Invoke every callback once, in registration order
    ///
    /// A panicking callback is logged and does not stop the others.
    pub(crate) fn emit(&self, what: &'static str, call: impl Fn(&F)) {
        for callback in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| call(&callback))).is_err() {
                tracing::warn!(subscriber = what, "Subscriber panicked; continuing with the rest");
            }
        }
    }
}

impl<F: ?Sized> fmt::Debug for SubscriberRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}
