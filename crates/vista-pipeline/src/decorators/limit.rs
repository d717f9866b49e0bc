#![forbid(unsafe_code)]

//! Cap the number of items matching a condition.
//!
//! Items the condition rejects always pass. Of the items it accepts (all
//! items, without a condition), only the first `limit` in upstream order are
//! shown; when one of them leaves the window the next accepted item is
//! promoted, and when an accepted item enters it the last one is evicted.
//!
//! Accepted positions live in an [`IndexMap`]; the slot of an entry is its
//! rank among accepted items, so an upstream position `i` maps to
//!
//! ```text
//! output(i) = i - max(0, rank(i) - limit)
//! ```

use std::any::Any;
use std::fmt;

use vista_core::{ChangeArgs, IndexMap, Item, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

type Condition<T> = Box<dyn Fn(&T) -> bool>;

/// Output positions of one item across an in-place edit.
struct Recount<T> {
    before: Option<usize>,
    after: Option<usize>,
    follow: Option<Follow<T>>,
}

/// Secondary change caused by the window shifting.
enum Follow<T> {
    Evicted(T, usize),
    Promoted(T, usize),
}

pub struct Limit<T: Item> {
    limit: usize,
    condition: Option<Condition<T>>,
    counted: IndexMap<()>,
    priority: i32,
}

impl<T: Item> fmt::Debug for Limit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limit")
            .field("limit", &self.limit)
            .field("counted", &self.counted.len())
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl<T: Item> Limit<T> {
    /// Show at most `limit` items.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            condition: None,
            counted: IndexMap::new(),
            priority: 0,
        }
    }

    /// Show at most `limit` items matching `condition`; others pass freely.
    pub fn with_condition(limit: usize, condition: impl Fn(&T) -> bool + 'static) -> Self {
        Self {
            condition: Some(Box::new(condition)),
            ..Self::new(limit)
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Apply through `update_decorator`.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// Apply through `update_decorator`.
    pub fn set_condition(&mut self, condition: impl Fn(&T) -> bool + 'static) {
        self.condition = Some(Box::new(condition));
    }

    /// Number of upstream items the condition accepts, shown or not.
    #[must_use]
    pub fn counted_len(&self) -> usize {
        self.counted.len()
    }

    fn counts(&self, item: &T) -> bool {
        self.condition.as_ref().is_none_or(|c| c(item))
    }

    fn hidden_before(&self, index: usize) -> usize {
        self.counted.rank(index).saturating_sub(self.limit)
    }

    fn output_index(&self, index: usize) -> usize {
        index - self.hidden_before(index)
    }

    fn is_visible(&self, index: usize) -> bool {
        match self.counted.binary_search(index) {
            Ok(slot) => slot < self.limit,
            Err(_) => true,
        }
    }

    /// Upstream index of the last accepted item inside the window.
    fn last_in_window(&self) -> Option<usize> {
        (self.limit > 0 && self.counted.len() >= self.limit)
            .then(|| self.counted.entry_at(self.limit - 1).index)
    }

    fn insert(&mut self, cx: &mut DecoratorContext<'_, T>, index: usize, item: T) -> Result<()> {
        let slot = self.counted.shift_indexes(index, 1);
        if !self.counts(&item) {
            cx.added(item, self.output_index(index));
            return Ok(());
        }
        self.counted.insert_at(slot, index, ());
        if slot >= self.limit {
            return Ok(());
        }
        if self.counted.len() > self.limit {
            let evicted = self.counted.entry_at(self.limit).index;
            cx.removed(cx.upstream_item(evicted)?, evicted - 1);
        }
        cx.added(item, index);
        Ok(())
    }

    fn remove(&mut self, cx: &mut DecoratorContext<'_, T>, index: usize, item: T) {
        match self.counted.binary_search(index) {
            Err(_) => {
                let at = self.output_index(index);
                self.counted.shift_indexes(index, -1);
                cx.removed(item, at);
            }
            Ok(slot) => {
                self.counted.remove_at(slot);
                self.counted.shift_indexes(index, -1);
                if slot < self.limit {
                    cx.removed(item, index);
                    if let Some(promoted) = self.last_in_window() {
                        if let Ok(next) = cx.upstream_item(promoted) {
                            cx.added(next, promoted);
                        }
                    }
                }
            }
        }
    }

    /// Re-evaluate the item at `index` in place.
    fn recount(&mut self, cx: &DecoratorContext<'_, T>, index: usize, counts: bool) -> Result<Recount<T>> {
        let before = self.is_visible(index).then(|| self.output_index(index));
        let mut follow = None;
        match (self.counted.binary_search(index), counts) {
            (Err(slot), true) => {
                self.counted.insert_at(slot, index, ());
                if slot < self.limit && self.counted.len() > self.limit {
                    let evicted = self.counted.entry_at(self.limit).index;
                    follow = Some(Follow::Evicted(cx.upstream_item(evicted)?, evicted));
                }
            }
            (Ok(slot), false) => {
                self.counted.remove_at(slot);
                if slot < self.limit {
                    if let Some(promoted) = self.last_in_window() {
                        follow = Some(Follow::Promoted(cx.upstream_item(promoted)?, promoted));
                    }
                }
            }
            _ => {}
        }
        let after = self.is_visible(index).then(|| self.output_index(index));
        Ok(Recount { before, after, follow })
    }

    fn emit_follow(cx: &mut DecoratorContext<'_, T>, follow: Option<Follow<T>>) {
        match follow {
            Some(Follow::Evicted(item, at)) => cx.removed(item, at),
            Some(Follow::Promoted(item, at)) => cx.added(item, at),
            None => {}
        }
    }
}

impl<T: Item> Decorator<T> for Limit<T> {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_cache_required(&self) -> bool {
        true
    }

    fn decorate<'a>(&'a self, upstream: Items<'a, T>) -> Items<'a, T> {
        Box::new(
            upstream
                .enumerate()
                .filter(|(i, _)| self.is_visible(*i))
                .map(|(_, item)| item),
        )
    }

    fn on_reset(&mut self, _cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        self.counted.clear();
        for (index, item) in items.unwrap_or_default().iter().enumerate() {
            if self.counts(item) {
                self.counted.push(index, ());
            }
        }
        Ok(())
    }

    fn on_added(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.insert(cx, index, item)?;
        Ok(Flow::Stop)
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        let counts = self.counts(&new_item);
        let Recount { before, after, follow } = self.recount(cx, index, counts)?;
        match (before, after) {
            (Some(at), Some(_)) if follow.is_none() => return Ok(Flow::Continue((old_item, new_item, at))),
            (Some(at), Some(_)) => cx.replaced(old_item, new_item, at),
            (Some(at), None) => cx.removed(old_item, at),
            (None, Some(at)) => cx.added(new_item, at),
            (None, None) => {}
        }
        Self::emit_follow(cx, follow);
        Ok(Flow::Stop)
    }

    fn on_moved(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        let from = self.output_index(old_index);
        let window_end = self.last_in_window();
        let Some(outcome) = self.counted.move_index(old_index, new_index) else {
            let to = self.output_index(new_index);
            return Ok(if from == to {
                Flow::Stop
            } else {
                Flow::Continue((item, from, to))
            });
        };
        match (outcome.from < self.limit, outcome.to < self.limit) {
            (true, true) if old_index == new_index => Ok(Flow::Stop),
            (true, true) => Ok(Flow::Continue((item, old_index, new_index))),
            (false, false) => Ok(Flow::Stop),
            (true, false) => {
                cx.removed(item, old_index);
                if let Some(promoted) = self.last_in_window() {
                    cx.added(cx.upstream_item(promoted)?, promoted);
                }
                Ok(Flow::Stop)
            }
            (false, true) => {
                // The old window end was pushed to rank `limit`.
                if let Some(evicted) = window_end {
                    let now = self.counted.entry_at(self.limit).index;
                    cx.removed(cx.upstream_item(now)?, evicted);
                }
                cx.added(item, new_index);
                Ok(Flow::Stop)
            }
        }
    }

    fn on_removed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.remove(cx, index, item);
        Ok(Flow::Stop)
    }

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        let counts = self.counts(&item);
        let Recount { before, after, follow } = self.recount(cx, index, counts)?;
        match (before, after) {
            (Some(at), Some(_)) if follow.is_none() => return Ok(Flow::Continue((item, at, args))),
            (Some(at), Some(_)) => cx.changed(item, at, args),
            (Some(at), None) => cx.removed(item, at),
            (None, Some(at)) => cx.added(item, at),
            (None, None) => {}
        }
        Self::emit_follow(cx, follow);
        Ok(Flow::Stop)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
