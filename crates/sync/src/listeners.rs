use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

type Listener = Arc<dyn Fn(&[String]) + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Subscribers to "these sources changed" notifications.
///
/// Clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("count", &self.len()).finish()
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`, called with the aliases of changed sources.
    pub fn subscribe(&self, listener: impl Fn(&[String]) + Send + Sync + 'static) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner),
        }
    }

    /// Call every listener, in subscription order, with `changed`.
    ///
    /// Listeners run outside the lock, so they may subscribe or unsubscribe.
    /// A panicking listener is logged and skipped; the rest still run.
    pub fn emit(&self, changed: &[String]) {
        let snapshot: Vec<(u64, Listener)> =
            self.inner.lock().listeners.iter().map(|(id, listener)| (*id, listener.clone())).collect();
        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(changed))).is_err() {
                tracing::error!(listener = id, sources = ?changed, "Change listener panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Listeners::subscribe`].
///
/// Dropping it leaves the listener registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|inner| inner.lock().listeners.remove(&self.id).is_some())
    }
}
