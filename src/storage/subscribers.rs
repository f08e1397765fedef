//! Change observers for newly created events

use super::types::Event;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Handle returned by [`SubscriberRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    callbacks: BTreeMap<SubscriptionId, Callback>,
}

/// Ordered set of callbacks, invoked in subscription order
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: Mutex<Inner>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.callbacks.insert(id, Arc::new(callback));
        id
    }

    /// Returns false if the id was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.lock().callbacks.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every callback with `event`.
    ///
    /// Works on a snapshot, so callbacks may subscribe or unsubscribe
    /// without deadlocking. A panicking callback is logged and skipped.
    pub fn notify(&self, event: &Event) {
        let snapshot: Vec<(SubscriptionId, Callback)> = self
            .inner
            .lock()
            .callbacks
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(subscription = id.0, event_id = %event.id, "subscriber panicked");
            }
        }
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::Category;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> Event {
        Event {
            id: "evt".to_string(),
            title: "t".to_string(),
            category: Category::Other,
            latitude: 0.0,
            longitude: 0.0,
            timestamp: 0,
        }
    }

    #[test]
    fn test_notify_in_order() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = Arc::clone(&seen);
            registry.subscribe(move |_| seen.lock().push(n));
        }
        registry.notify(&event());

        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = registry.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.notify(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.subscribe(|_| panic!("observer failure"));
        let counter = Arc::clone(&calls);
        registry.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
