#![forbid(unsafe_code)]

//! Stable sort over a derived key.
//!
//! Entries are kept ordered by `(key, original index)`, so equal keys keep
//! their upstream order. Each entry stores the key it was sorted under;
//! a `Changed` event recomputes the key and relocates the entry only if
//! its position actually moves.
//!
//! # Failure Modes
//!
//! - An event naming an upstream index no entry records returns
//!   [`PipelineError::ItemNotFound`].

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;

use vista_core::{ChangeArgs, Item, PipelineError, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

type KeyFn<T, K> = Box<dyn Fn(&T) -> K>;
type CompareFn<K> = Box<dyn Fn(&K, &K) -> Ordering>;

struct SortEntry<T, K> {
    original: usize,
    item: T,
    key: K,
}

pub struct Sort<T: Item, K: 'static = T> {
    key: KeyFn<T, K>,
    compare: CompareFn<K>,
    entries: Vec<SortEntry<T, K>>,
    priority: i32,
}

impl<T: Item, K> fmt::Debug for Sort<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sort")
            .field("len", &self.entries.len())
            .field("priority", &self.priority)
            .finish()
    }
}

impl<T: Item> Sort<T, T> {
    /// Sort items with a comparator.
    pub fn new(compare: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        Self::with_parts(Box::new(T::clone), Box::new(compare))
    }
}

impl<T: Item + Ord> Sort<T, T> {
    #[must_use]
    pub fn ascending() -> Self {
        Self::new(T::cmp)
    }

    #[must_use]
    pub fn descending() -> Self {
        Self::new(|a: &T, b: &T| b.cmp(a))
    }
}

impl<T: Item, K: Ord + 'static> Sort<T, K> {
    /// Sort by a derived key.
    pub fn by_key(key: impl Fn(&T) -> K + 'static) -> Self {
        Self::with_parts(Box::new(key), Box::new(K::cmp))
    }

    pub fn by_key_descending(key: impl Fn(&T) -> K + 'static) -> Self {
        Self::with_parts(Box::new(key), Box::new(|a: &K, b: &K| b.cmp(a)))
    }
}

impl<T: Item, K: 'static> Sort<T, K> {
    fn with_parts(key: KeyFn<T, K>, compare: CompareFn<K>) -> Self {
        Self {
            key,
            compare,
            entries: Vec::new(),
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Swap the comparator; apply through `update_decorator` so the stage is
    /// re-sorted.
    pub fn set_compare(&mut self, compare: impl Fn(&K, &K) -> Ordering + 'static) {
        self.compare = Box::new(compare);
    }

    /// Upstream index of each output position.
    #[must_use]
    pub fn original_indexes(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.original).collect()
    }

    fn order(&self, entry: &SortEntry<T, K>, key: &K, original: usize) -> Ordering {
        (self.compare)(&entry.key, key).then(entry.original.cmp(&original))
    }

    /// Slot at which `(key, original)` belongs.
    fn insertion_point(&self, key: &K, original: usize) -> usize {
        self.entries
            .partition_point(|e| self.order(e, key, original) == Ordering::Less)
    }

    /// Slot of the entry for upstream `original`.
    ///
    /// Tries a binary search under `item`'s current key first; falls back to
    /// a scan when the key has drifted since the entry was stored.
    fn locate(&self, original: usize, item: Option<&T>) -> Result<usize> {
        if let Some(item) = item {
            let key = (self.key)(item);
            let slot = self.insertion_point(&key, original);
            if self.entries.get(slot).is_some_and(|e| e.original == original) {
                return Ok(slot);
            }
        }
        self.entries
            .iter()
            .position(|e| e.original == original)
            .ok_or(PipelineError::ItemNotFound {
                decorator: "sort",
                index: original,
            })
    }

    fn shift_originals(&mut self, from: usize, delta: isize) {
        for entry in &mut self.entries {
            if entry.original >= from {
                entry.original = entry.original.saturating_add_signed(delta);
            }
        }
    }

    fn insert_entry(&mut self, entry: SortEntry<T, K>) -> usize {
        let slot = self.insertion_point(&entry.key, entry.original);
        self.entries.insert(slot, entry);
        slot
    }
}

impl<T: Item, K: 'static> Decorator<T> for Sort<T, K> {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_lazy(&self) -> bool {
        false
    }

    fn is_cache_required(&self) -> bool {
        true
    }

    fn decorate<'a>(&'a self, _upstream: Items<'a, T>) -> Items<'a, T> {
        Box::new(self.entries.iter().map(|e| e.item.clone()))
    }

    fn on_reset(&mut self, _cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        let mut entries: Vec<SortEntry<T, K>> = items
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(original, item)| SortEntry {
                original,
                key: (self.key)(item),
                item: item.clone(),
            })
            .collect();
        entries.sort_by(|a, b| (self.compare)(&a.key, &b.key).then(a.original.cmp(&b.original)));
        self.entries = entries;
        Ok(())
    }

    fn on_added(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.shift_originals(index, 1);
        let slot = self.insert_entry(SortEntry {
            original: index,
            key: (self.key)(&item),
            item: item.clone(),
        });
        Ok(Flow::Continue((item, slot)))
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        let slot = self.locate(index, Some(&old_item))?;
        let old = self.entries.remove(slot);
        let new_slot = self.insert_entry(SortEntry {
            original: index,
            key: (self.key)(&new_item),
            item: new_item.clone(),
        });
        if new_slot == slot {
            return Ok(Flow::Continue((old.item, new_item, slot)));
        }
        cx.removed(old.item, slot);
        cx.added(new_item, new_slot);
        Ok(Flow::Stop)
    }

    fn on_moved(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        let slot = self.locate(old_index, Some(&item))?;
        let mut entry = self.entries.remove(slot);
        for other in &mut self.entries {
            let o = other.original;
            if old_index < new_index && o > old_index && o <= new_index {
                other.original -= 1;
            } else if new_index < old_index && o >= new_index && o < old_index {
                other.original += 1;
            }
        }
        entry.original = new_index;
        let shown = entry.item.clone();
        let new_slot = self.insert_entry(entry);
        if new_slot == slot {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue((shown, slot, new_slot)))
    }

    fn on_removed(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        let slot = self.locate(index, Some(&item))?;
        let entry = self.entries.remove(slot);
        self.shift_originals(index + 1, -1);
        Ok(Flow::Continue((entry.item, slot)))
    }

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        let slot = self.locate(index, None)?;
        let mut entry = self.entries.remove(slot);
        entry.key = (self.key)(&item);
        entry.item = item.clone();
        let new_slot = self.insert_entry(entry);
        if new_slot != slot {
            cx.moved(item.clone(), slot, new_slot);
        }
        Ok(Flow::Continue((item, new_slot, args)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
