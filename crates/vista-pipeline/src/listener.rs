#![forbid(unsafe_code)]

//! Change listeners and RAII subscriptions.
//!
//! Listeners are held weakly; the returned [`Subscription`] owns the only
//! strong reference. Dead entries are pruned lazily on the next
//! notification, so dropping a subscription is O(1).

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use vista_core::{BatchKind, CollectionChange};

/// Receiver of change notifications.
///
/// Outside a batch every public mutation yields one `on_changes` call. A
/// batch is bracketed by `on_batch_begin` / `on_batch_end` and the changes
/// made inside it arrive as a single `on_changes` just before the end.
pub trait ChangeListener<T> {
    fn on_batch_begin(&mut self, _kind: BatchKind) {}

    fn on_changes(&mut self, changes: &[CollectionChange<T>]);

    fn on_batch_end(&mut self, _kind: BatchKind) {}
}

impl<T, F> ChangeListener<T> for F
where
    F: FnMut(&[CollectionChange<T>]),
{
    fn on_changes(&mut self, changes: &[CollectionChange<T>]) {
        self(changes);
    }
}

/// Keeps a listener registered; unsubscribes on drop.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

type ListenerCell<T> = RefCell<dyn ChangeListener<T>>;

/// One notification step queued for delivery.
#[derive(Debug, Clone)]
pub(crate) enum Notice<T> {
    Begin(BatchKind),
    Changes(Vec<CollectionChange<T>>),
    End(BatchKind),
}

/// Registration-ordered set of weakly held listeners.
pub(crate) struct ListenerSet<T> {
    entries: RefCell<Vec<Weak<ListenerCell<T>>>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn subscribe(&self, listener: impl ChangeListener<T> + 'static) -> Subscription {
        let strong: Rc<ListenerCell<T>> = Rc::new(RefCell::new(listener));
        self.entries.borrow_mut().push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Live listener count; prunes dead entries.
    pub(crate) fn len(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|w| w.strong_count() > 0);
        entries.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub(crate) fn deliver(&self, notice: &Notice<T>) {
        let live: Vec<Rc<ListenerCell<T>>> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|w| w.strong_count() > 0);
            entries.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            // A listener already on the stack is skipped rather than re-entered.
            let Ok(mut listener) = listener.try_borrow_mut() else {
                continue;
            };
            match notice {
                Notice::Begin(kind) => listener.on_batch_begin(*kind),
                Notice::Changes(changes) => listener.on_changes(changes),
                Notice::End(kind) => listener.on_batch_end(*kind),
            }
        }
    }
}
