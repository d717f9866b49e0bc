#![forbid(unsafe_code)]

//! Downstream replica rebuilt purely from change notifications.
//!
//! A [`Mirror`] seeds itself from the decorated output, then applies every
//! change it hears. If the pipeline's events are correct, the mirror always
//! equals a fresh read of the decorated output.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::warn;
use vista_core::{CollectionChange, Item, PipelineError};
use vista_pipeline::{ObservableCollection, Subscription};

#[derive(Debug, Default)]
struct Replica<T> {
    items: Vec<T>,
    errors: Vec<String>,
}

pub struct Mirror<T> {
    replica: Rc<RefCell<Replica<T>>>,
    _subscription: Subscription,
}

impl<T: Item> Mirror<T> {
    /// Subscribe to `collection`'s decorated output.
    pub fn new(collection: &ObservableCollection<T>) -> Result<Self, PipelineError> {
        let replica = Rc::new(RefCell::new(Replica {
            items: collection.decorated_items()?,
            errors: Vec::new(),
        }));
        let sink = Rc::clone(&replica);
        let subscription = collection.subscribe(move |changes: &[CollectionChange<T>]| {
            let mut replica = sink.borrow_mut();
            for change in changes {
                if let Err(err) = change.apply_to(&mut replica.items) {
                    warn!(error = %err, ?change, "change does not fit the mirror");
                    replica.errors.push(err.to_string());
                }
            }
        });
        Ok(Self {
            replica,
            _subscription: subscription,
        })
    }

    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.replica.borrow().items.clone()
    }

    /// Changes that could not be applied, formatted.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.replica.borrow().errors.clone()
    }

    /// Panic unless the mirror matches the decorated output and every
    /// change applied cleanly.
    pub fn assert_matches(&self, collection: &ObservableCollection<T>) {
        let errors = self.errors();
        assert!(errors.is_empty(), "unapplicable changes: {errors:?}");
        let expected = collection
            .decorated_items()
            .unwrap_or_else(|e| panic!("decorated read failed: {e}"));
        assert_eq!(self.items(), expected, "mirror diverged from decorated output");
    }
}
