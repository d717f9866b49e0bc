#![forbid(unsafe_code)]

//! Predicate filter.
//!
//! Keeps an [`IndexMap`] from upstream position to item for every item that
//! passes the predicate. An edit costs a binary search plus the shift of
//! the entries after it.

use std::any::Any;
use std::fmt;

use vista_core::{ChangeArgs, IndexMap, Item, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

type Predicate<T> = Box<dyn Fn(&T) -> bool>;

pub struct Filter<T: Item> {
    predicate: Predicate<T>,
    visible: IndexMap<T>,
    priority: i32,
}

impl<T: Item> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("visible", &self.visible.len())
            .field("priority", &self.priority)
            .finish()
    }
}

impl<T: Item> Filter<T> {
    pub fn new(predicate: impl Fn(&T) -> bool + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            visible: IndexMap::new(),
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Swap the predicate; apply through `update_decorator` so the stage is
    /// rebuilt.
    pub fn set_predicate(&mut self, predicate: impl Fn(&T) -> bool + 'static) {
        self.predicate = Box::new(predicate);
    }

    /// Number of upstream items currently passing.
    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    /// Upstream positions currently passing, ascending.
    #[must_use]
    pub fn visible_indexes(&self) -> Vec<usize> {
        self.visible.indexes().collect()
    }

    fn passes(&self, item: &T) -> bool {
        (self.predicate)(item)
    }
}

impl<T: Item> Decorator<T> for Filter<T> {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_lazy(&self) -> bool {
        false
    }

    fn decorate<'a>(&'a self, _upstream: Items<'a, T>) -> Items<'a, T> {
        Box::new(self.visible.values().cloned())
    }

    fn on_reset(&mut self, _cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        self.visible.clear();
        for (index, item) in items.unwrap_or_default().iter().enumerate() {
            if self.passes(item) {
                self.visible.push(index, item.clone());
            }
        }
        Ok(())
    }

    fn on_added(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        let slot = self.visible.shift_indexes(index, 1);
        if !self.passes(&item) {
            return Ok(Flow::Stop);
        }
        self.visible.insert_at(slot, index, item.clone());
        Ok(Flow::Continue((item, slot)))
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        _old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        let passes = self.passes(&new_item);
        match (self.visible.binary_search(index), passes) {
            (Ok(slot), true) => {
                let shown = std::mem::replace(self.visible.value_at_mut(slot), new_item.clone());
                Ok(Flow::Continue((shown, new_item, slot)))
            }
            (Ok(slot), false) => {
                let shown = self.visible.remove_at(slot).value;
                cx.removed(shown, slot);
                Ok(Flow::Stop)
            }
            (Err(slot), true) => {
                self.visible.insert_at(slot, index, new_item.clone());
                cx.added(new_item, slot);
                Ok(Flow::Stop)
            }
            (Err(_), false) => Ok(Flow::Stop),
        }
    }

    fn on_moved(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        match self.visible.move_index(old_index, new_index) {
            Some(outcome) if outcome.rank_changed() => {
                Ok(Flow::Continue((item, outcome.from, outcome.to)))
            }
            _ => Ok(Flow::Stop),
        }
    }

    fn on_removed(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        _item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        match self.visible.binary_search(index) {
            Ok(slot) => {
                let shown = self.visible.remove_at(slot).value;
                self.visible.shift_slots(slot, -1);
                Ok(Flow::Continue((shown, slot)))
            }
            Err(slot) => {
                self.visible.shift_slots(slot, -1);
                Ok(Flow::Stop)
            }
        }
    }

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        let passes = self.passes(&item);
        match (self.visible.binary_search(index), passes) {
            (Ok(slot), true) => {
                *self.visible.value_at_mut(slot) = item.clone();
                Ok(Flow::Continue((item, slot, args)))
            }
            (Ok(slot), false) => {
                let shown = self.visible.remove_at(slot).value;
                cx.removed(shown, slot);
                Ok(Flow::Stop)
            }
            (Err(slot), true) => {
                self.visible.insert_at(slot, index, item.clone());
                cx.added(item, slot);
                Ok(Flow::Stop)
            }
            (Err(_), false) => Ok(Flow::Stop),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
