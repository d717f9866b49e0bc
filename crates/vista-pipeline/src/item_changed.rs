#![forbid(unsafe_code)]

//! Debounced item-changed notifications.
//!
//! Property-change storms are collected into a deduplicating queue and
//! applied in one go: either as point `Changed` walks, or as a single chain
//! reset once the queue outgrows the configured threshold.
//!
//! # Failure Modes
//!
//! - A timer whose collection has been dropped or disposed does nothing.
//! - Deduplication scans the queue, so it stops once the queue outgrows
//!   the threshold; later raises are only counted, since the flush will
//!   reset the chain anyway.
//! - An item that can no longer be located is dropped with a `debug!`.

use std::fmt;
use std::rc::Weak;
use std::time::Duration;

use vista_core::{ChangeArgs, Item, Result};
use web_time::Instant;

use crate::collection::{ObservableCollection, Shared};

/// Pending `(item, args)` pairs, unique by item up to the threshold.
pub(crate) struct ItemChangeQueue<T> {
    pending: Vec<(T, ChangeArgs)>,
    /// Raises past the threshold, neither stored nor deduplicated.
    overflow: usize,
    first_raised: Option<Instant>,
}

impl<T> Default for ItemChangeQueue<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            overflow: 0,
            first_raised: None,
        }
    }
}

impl<T: Item> ItemChangeQueue<T> {
    /// Queue a notification; a repeat for the same item keeps one entry
    /// while at most `threshold` items are pending.
    pub(crate) fn push(&mut self, item: T, args: ChangeArgs, now: Instant, threshold: usize) {
        self.first_raised.get_or_insert(now);
        if self.pending.len() > threshold {
            self.overflow += 1;
            return;
        }
        match self.pending.iter_mut().find(|(x, _)| *x == item) {
            Some((_, existing)) => {
                if existing.property != args.property {
                    existing.property = None;
                }
            }
            None => self.pending.push((item, args)),
        }
    }

    /// Pending notifications, counting every raise past the threshold.
    pub(crate) fn len(&self) -> usize {
        self.pending.len() + self.overflow
    }

    /// Whether the oldest entry has waited at least `delay`.
    pub(crate) fn is_due(&self, now: Instant, delay: Duration) -> bool {
        self.first_raised
            .is_some_and(|t| now.saturating_duration_since(t) >= delay)
    }

    pub(crate) fn take(&mut self) -> Vec<(T, ChangeArgs)> {
        self.first_raised = None;
        self.overflow = 0;
        std::mem::take(&mut self.pending)
    }
}

/// Weak handle for driving a collection's item-changed flush from a timer.
pub struct ItemChangeTimer<T: Item> {
    shared: Weak<Shared<T>>,
}

impl<T: Item> fmt::Debug for ItemChangeTimer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemChangeTimer")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<T: Item> Clone for ItemChangeTimer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T: Item> ItemChangeTimer<T> {
    pub(crate) fn new(shared: Weak<Shared<T>>) -> Self {
        Self { shared }
    }

    fn collection(&self) -> Option<ObservableCollection<T>> {
        let shared = self.shared.upgrade()?;
        let collection = ObservableCollection::from_shared(shared);
        (!collection.is_disposed()).then_some(collection)
    }

    /// Whether the collection still exists and is not disposed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.collection().is_some()
    }

    /// Flush now; `Ok(false)` when the collection is gone.
    pub fn fire(&self) -> Result<bool> {
        match self.collection() {
            Some(collection) => collection.flush_item_changes().map(|()| true),
            None => Ok(false),
        }
    }

    /// Flush if the debounce window has elapsed at `now`.
    pub fn tick(&self, now: Instant) -> Result<bool> {
        match self.collection() {
            Some(collection) => collection.poll_item_changes(now),
            None => Ok(false),
        }
    }
}
