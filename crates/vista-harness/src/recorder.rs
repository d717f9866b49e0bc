#![forbid(unsafe_code)]

//! Listener that records every notification verbatim.

use std::cell::RefCell;
use std::rc::Rc;

use vista_core::{BatchKind, CollectionChange, Item};
use vista_pipeline::{ChangeListener, ObservableCollection, Subscription};

/// One notification as a listener heard it.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded<T> {
    Begin(BatchKind),
    Changes(Vec<CollectionChange<T>>),
    End(BatchKind),
}

struct RecordingListener<T> {
    log: Rc<RefCell<Vec<Recorded<T>>>>,
}

impl<T: Clone> ChangeListener<T> for RecordingListener<T> {
    fn on_batch_begin(&mut self, kind: BatchKind) {
        self.log.borrow_mut().push(Recorded::Begin(kind));
    }

    fn on_changes(&mut self, changes: &[CollectionChange<T>]) {
        self.log.borrow_mut().push(Recorded::Changes(changes.to_vec()));
    }

    fn on_batch_end(&mut self, kind: BatchKind) {
        self.log.borrow_mut().push(Recorded::End(kind));
    }
}

/// Records the notifications of one collection until dropped.
pub struct Recorder<T> {
    log: Rc<RefCell<Vec<Recorded<T>>>>,
    _subscription: Subscription,
}

impl<T: Item> Recorder<T> {
    /// Record the decorated output.
    pub fn decorated(collection: &ObservableCollection<T>) -> Self {
        let log = Rc::new(RefCell::new(Vec::new()));
        let listener = RecordingListener { log: Rc::clone(&log) };
        Self {
            log,
            _subscription: collection.subscribe(listener),
        }
    }

    /// Record the raw source sequence.
    pub fn source(collection: &ObservableCollection<T>) -> Self {
        let log = Rc::new(RefCell::new(Vec::new()));
        let listener = RecordingListener { log: Rc::clone(&log) };
        Self {
            log,
            _subscription: collection.subscribe_source(listener),
        }
    }

    /// Everything heard so far.
    #[must_use]
    pub fn notices(&self) -> Vec<Recorded<T>> {
        self.log.borrow().clone()
    }

    /// Everything heard since the last call, clearing the log.
    pub fn take(&self) -> Vec<Recorded<T>> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    /// Changes heard so far, flattened across notifications.
    #[must_use]
    pub fn changes(&self) -> Vec<CollectionChange<T>> {
        self.log
            .borrow()
            .iter()
            .filter_map(|notice| match notice {
                Recorded::Changes(changes) => Some(changes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Number of `on_changes` deliveries heard so far.
    #[must_use]
    pub fn deliveries(&self) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|notice| matches!(notice, Recorded::Changes(_)))
            .count()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}
