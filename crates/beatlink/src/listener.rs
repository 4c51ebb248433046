//! Copy-on-read listener fanout.
//!
//! Registration takes a short lock; delivery copies the list out and
//! iterates lock-free, so a listener calling back into the finder that
//! notified it can't deadlock. A panicking listener is caught and logged,
//! never allowed to take down the caller.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tracing::warn;

pub struct ListenerList<T: ?Sized> {
    listeners: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for ListenerList<T> {
    fn default() -> Self {
        ListenerList {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> ListenerList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<T>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn remove(&self, listener: &Arc<T>) {
        let mut listeners = self.listeners.write().unwrap();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.listeners.read().unwrap().clone()
    }

    /// Call `f` once per registered listener, swallowing panics.
    pub fn deliver(&self, mut f: impl FnMut(&T)) {
        for listener in self.snapshot() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(&listener)));
            if result.is_err() {
                warn!("listener panicked during fanout, suppressing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    trait Counter: Send + Sync {
        fn bump(&self, by: u32);
    }

    struct Adder(AtomicU32);
    impl Counter for Adder {
        fn bump(&self, by: u32) {
            self.0.fetch_add(by, Ordering::SeqCst);
        }
    }

    struct Panicker;
    impl Counter for Panicker {
        fn bump(&self, _by: u32) {
            panic!("boom");
        }
    }

    #[test]
    fn delivers_to_every_listener() {
        let list: ListenerList<dyn Counter> = ListenerList::new();
        let a = Arc::new(Adder(AtomicU32::new(0)));
        list.add(a.clone());
        list.deliver(|l| l.bump(3));
        assert_eq!(a.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn remove_stops_future_delivery() {
        let list: ListenerList<dyn Counter> = ListenerList::new();
        let a: Arc<dyn Counter> = Arc::new(Adder(AtomicU32::new(0)));
        list.add(a.clone());
        list.remove(&a);
        assert_eq!(list.snapshot().len(), 0);
    }

    #[test]
    fn a_panicking_listener_does_not_stop_the_others() {
        let list: ListenerList<dyn Counter> = ListenerList::new();
        let a = Arc::new(Adder(AtomicU32::new(0)));
        list.add(Arc::new(Panicker) as Arc<dyn Counter>);
        list.add(a.clone());
        list.deliver(|l| l.bump(1));
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
    }
}
