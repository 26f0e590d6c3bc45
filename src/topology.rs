//! Topology change events and listeners.
//!
//! A topology change is any membership transition: a join, a leave, a
//! detected failure or a coordinator handover. Each installed view fires
//! exactly one [`TopologyChangeEvent`] on the installing node, delivered
//! to every registered [`TopologyChangeListener`] in registration order.
//! Delivery across nodes is not synchronized; each node fires
//! independently when it installs its own copy of the view.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::warn;

/// Immutable snapshot describing one membership transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyChangeEvent {
    coordinator_has_changed: bool,
    coordinator: bool,
}

impl TopologyChangeEvent {
    pub fn new(coordinator_has_changed: bool, coordinator: bool) -> Self {
        TopologyChangeEvent {
            coordinator_has_changed,
            coordinator,
        }
    }

    /// Whether the local node is the coordinator after this transition.
    pub fn is_coordinator(&self) -> bool {
        self.coordinator
    }

    /// Whether the coordinator differs from the one in the previous view.
    pub fn coordinator_has_changed(&self) -> bool {
        self.coordinator_has_changed
    }
}

/// Receives topology change notifications.
///
/// Listeners run on the membership event path; a listener that panics is
/// logged and skipped, it never disturbs later listeners or the stored
/// view.
pub trait TopologyChangeListener: Send + Sync {
    fn on_change(&self, event: &TopologyChangeEvent);
}

/// Registration-ordered listener list with copy-on-write iteration.
///
/// Notification iterates over a snapshot, so concurrent add/remove never
/// disturbs an in-flight delivery.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn TopologyChangeListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        ListenerSet {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn TopologyChangeListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// Remove a listener by instance identity.
    pub fn remove(&self, listener: &Arc<dyn TopologyChangeListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .retain(|registered| !Arc::ptr_eq(registered, listener));
    }

    pub fn notify(&self, event: &TopologyChangeEvent) {
        let snapshot: Vec<Arc<dyn TopologyChangeListener>> = self
            .listeners
            .read()
            .expect("listener lock poisoned")
            .clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_change(event))).is_err() {
                warn!("a topology change listener panicked, skipping it");
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.listeners.read().expect("listener lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        count: AtomicUsize,
    }

    impl TopologyChangeListener for Counting {
        fn on_change(&self, _event: &TopologyChangeEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl TopologyChangeListener for Panicking {
        fn on_change(&self, _event: &TopologyChangeEvent) {
            panic!("listener bug");
        }
    }

    #[test]
    fn test_listeners_fire_in_registration_order_past_panics() {
        let set = ListenerSet::new();
        let first = Arc::new(Counting {
            count: AtomicUsize::new(0),
        });
        let second = Arc::new(Counting {
            count: AtomicUsize::new(0),
        });

        set.add(first.clone());
        set.add(Arc::new(Panicking));
        set.add(second.clone());

        set.notify(&TopologyChangeEvent::new(false, true));

        // The panicking listener in the middle did not stop delivery.
        assert_eq!(first.count.load(Ordering::SeqCst), 1);
        assert_eq!(second.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_by_instance() {
        let set = ListenerSet::new();
        let a = Arc::new(Counting {
            count: AtomicUsize::new(0),
        });
        let listener: Arc<dyn TopologyChangeListener> = a.clone();
        set.add(listener.clone());
        assert_eq!(set.len(), 1);
        set.remove(&listener);
        assert_eq!(set.len(), 0);

        set.notify(&TopologyChangeEvent::new(true, false));
        assert_eq!(a.count.load(Ordering::SeqCst), 0);
    }
}
