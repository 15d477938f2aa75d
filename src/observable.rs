//! Explicit listener registries for lifecycle notifications.
//!
//! An [`Observable`] holds an ordered list of callbacks. Registering returns an
//! [`ObserverToken`] that the caller keeps to unregister later; there is no
//! implicit lifetime tracking.
//!
//! `notify` iterates over a snapshot of the listener list, so callbacks may add
//! or remove listeners (including themselves) while a notification is in flight.
//! Listeners removed mid-notification are not called afterwards; listeners added
//! mid-notification receive the next notification.
//!
//! # Example
//!
//! ```
//! use strata::Observable;
//!
//! let on_resize: Observable<(u32, u32)> = Observable::new();
//! let token = on_resize.add(|(w, h)| println!("resized to {w}x{h}"));
//! on_resize.notify(&(1280, 720));
//! on_resize.remove(token);
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle returned by [`Observable::add`], used to unregister the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

type Listener<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Entry<T: ?Sized> {
    token: ObserverToken,
    listener: Listener<T>,
    removed: Rc<Cell<bool>>,
}

/// An ordered registry of callbacks invoked with a payload of type `T`.
pub struct Observable<T> {
    entries: RefCell<Vec<Entry<T>>>,
    next_token: Cell<u64>,
}

impl<T> Observable<T> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next_token: Cell::new(0),
        }
    }

    /// Registers a listener and returns its token.
    pub fn add<F>(&self, listener: F) -> ObserverToken
    where
        F: FnMut(&T) + 'static,
    {
        let token = ObserverToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.entries.borrow_mut().push(Entry {
            token,
            listener: Rc::new(RefCell::new(listener)),
            removed: Rc::new(Cell::new(false)),
        });
        token
    }

    /// Unregisters a listener. Returns `false` if the token is unknown.
    pub fn remove(&self, token: ObserverToken) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|e| e.token == token) {
            Some(index) => {
                let entry = entries.remove(index);
                entry.removed.set(true);
                true
            }
            None => false,
        }
    }

    /// Removes every listener.
    pub fn clear(&self) {
        for entry in self.entries.borrow_mut().drain(..) {
            entry.removed.set(true);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn has_observers(&self) -> bool {
        !self.is_empty()
    }

    /// Calls every registered listener with `payload`, in registration order.
    pub fn notify(&self, payload: &T) {
        let snapshot: Vec<(Listener<T>, Rc<Cell<bool>>)> = self
            .entries
            .borrow()
            .iter()
            .map(|e| (Rc::clone(&e.listener), Rc::clone(&e.removed)))
            .collect();

        for (listener, removed) in snapshot {
            if removed.get() {
                continue;
            }
            // A listener that re-enters its own observable is skipped rather than
            // double-borrowed.
            if let Ok(mut callback) = listener.try_borrow_mut() {
                callback(payload);
            }
        }
    }
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_in_registration_order() {
        let observable = Observable::<u32>::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let first = Rc::clone(&log);
        observable.add(move |v| first.borrow_mut().push(("first", *v)));
        let second = Rc::clone(&log);
        observable.add(move |v| second.borrow_mut().push(("second", *v)));

        observable.notify(&7);
        assert_eq!(*log.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let observable = Observable::<()>::new();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let token = observable.add(move |_| counter.set(counter.get() + 1));

        assert!(observable.remove(token));
        assert!(!observable.remove(token));
        observable.notify(&());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn removal_during_notify_skips_pending_listener() {
        let observable = Rc::new(Observable::<()>::new());
        let calls = Rc::new(Cell::new(0));

        let victim_token = Rc::new(Cell::new(None));
        let remover_observable = Rc::clone(&observable);
        let remover_token = Rc::clone(&victim_token);
        observable.add(move |_| {
            if let Some(token) = remover_token.get() {
                remover_observable.remove(token);
            }
        });
        let counter = Rc::clone(&calls);
        let token = observable.add(move |_| counter.set(counter.get() + 1));
        victim_token.set(Some(token));

        observable.notify(&());
        assert_eq!(calls.get(), 0);
        assert_eq!(observable.len(), 1);
    }

    #[test]
    fn listener_added_during_notify_waits_for_next_round() {
        let observable = Rc::new(Observable::<()>::new());
        let calls = Rc::new(Cell::new(0));

        let adder_observable = Rc::clone(&observable);
        let counter = Rc::clone(&calls);
        let added = Rc::new(Cell::new(false));
        observable.add(move |_| {
            if !added.get() {
                added.set(true);
                let inner = Rc::clone(&counter);
                adder_observable.add(move |_| inner.set(inner.get() + 1));
            }
        });

        observable.notify(&());
        assert_eq!(calls.get(), 0);
        observable.notify(&());
        assert_eq!(calls.get(), 1);
    }
}
