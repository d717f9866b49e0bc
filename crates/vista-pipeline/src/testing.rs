//! Test probe shared by the decorator unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use vista_core::{CollectionChange, Item};

use crate::collection::ObservableCollection;
use crate::listener::Subscription;

/// Mirrors the decorated output by replaying every change it hears.
pub(crate) struct Probe<T: Item> {
    mirror: Rc<RefCell<Vec<T>>>,
    log: Rc<RefCell<Vec<CollectionChange<T>>>>,
    _sub: Subscription,
}

impl<T: Item> Probe<T> {
    pub(crate) fn new(collection: &ObservableCollection<T>) -> Self {
        let mirror = Rc::new(RefCell::new(collection.decorated_items().unwrap()));
        let log = Rc::new(RefCell::new(Vec::new()));
        let (m, l) = (Rc::clone(&mirror), Rc::clone(&log));
        let _sub = collection.subscribe(move |changes: &[CollectionChange<T>]| {
            for change in changes {
                change.apply_to(&mut m.borrow_mut()).unwrap();
                l.borrow_mut().push(change.clone());
            }
        });
        Self { mirror, log, _sub }
    }

    /// Changes heard since the last call.
    pub(crate) fn take(&self) -> Vec<CollectionChange<T>> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub(crate) fn mirror(&self) -> Vec<T> {
        self.mirror.borrow().clone()
    }

    /// Mirror and decorated output agree.
    pub(crate) fn check(&self, collection: &ObservableCollection<T>) {
        assert_eq!(self.mirror(), collection.decorated_items().unwrap());
    }
}
