#![forbid(unsafe_code)]

//! Expand nested collections in place.
//!
//! An upstream item for which the `nested` accessor returns a collection is
//! replaced by that collection's decorated items; other items pass through.
//! An empty nested collection contributes nothing.
//!
//! Every distinct child is tracked once, with the ascending upstream
//! positions it occurs at and a snapshot of its decorated output. For
//! upstream position `p`:
//!
//! ```text
//! flat(p) = p + sum over children c of |{ q in c.positions : q < p }| * (len(c) - 1)
//! ```
//!
//! # Invariants
//!
//! 1. A child is linked (and shares the owner's lock) iff it occurs at
//!    least once upstream.
//! 2. A child's snapshot matches every change it has forwarded.
//! 3. A child `Reset` rebuilds this stage and everything after it.

use std::any::Any;
use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;
use vista_core::{ChangeArgs, CollectionChange, CollectionId, Item, PipelineError, Result};

use crate::collection::ObservableCollection;
use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

type NestedFn<T> = Box<dyn Fn(&T) -> Option<ObservableCollection<T>>>;

struct Child<T: Item> {
    collection: ObservableCollection<T>,
    positions: Vec<usize>,
    items: Vec<T>,
}

impl<T: Item> Child<T> {
    fn len(&self) -> isize {
        isize::try_from(self.items.len()).unwrap_or(isize::MAX)
    }
}

pub struct Flatten<T: Item> {
    nested: NestedFn<T>,
    slots: Vec<Option<CollectionId>>,
    children: FxHashMap<CollectionId, Child<T>>,
    priority: i32,
}

impl<T: Item> fmt::Debug for Flatten<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flatten")
            .field("upstream", &self.slots.len())
            .field("children", &self.children.len())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Position of `p` after an upstream move of `old` to `new`.
fn renumber(p: usize, old: usize, new: usize) -> usize {
    if old < new && p > old && p <= new {
        p - 1
    } else if new < old && p >= new && p < old {
        p + 1
    } else {
        p
    }
}

impl<T: Item> Flatten<T> {
    pub fn new(nested: impl Fn(&T) -> Option<ObservableCollection<T>> + 'static) -> Self {
        Self {
            nested: Box::new(nested),
            slots: Vec::new(),
            children: FxHashMap::default(),
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Number of distinct nested collections currently linked.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Upstream positions at which `child` occurs.
    #[must_use]
    pub fn positions_of(&self, child: CollectionId) -> Vec<usize> {
        self.children
            .get(&child)
            .map(|c| c.positions.clone())
            .unwrap_or_default()
    }

    /// Output index of upstream position `p`.
    fn flat_index(&self, p: usize) -> usize {
        let offset: isize = self
            .children
            .values()
            .map(|child| {
                let before = child.positions.partition_point(|&q| q < p);
                isize::try_from(before).unwrap_or(isize::MAX) * (child.len() - 1)
            })
            .sum();
        p.saturating_add_signed(offset)
    }

    fn shift(&mut self, map: impl Fn(usize) -> usize) {
        for child in self.children.values_mut() {
            for q in &mut child.positions {
                *q = map(*q);
            }
        }
    }

    /// Record that `collection` occurs at upstream `p`, linking it on first
    /// sight.
    fn track(&mut self, cx: &DecoratorContext<'_, T>, collection: ObservableCollection<T>, p: usize) -> Result<CollectionId> {
        let id = collection.id();
        match self.children.get_mut(&id) {
            Some(child) => {
                let at = child.positions.partition_point(|&q| q < p);
                child.positions.insert(at, p);
            }
            None => {
                cx.link_nested(&collection)?;
                let items = collection.decorated_items()?;
                trace!(child = %id, len = items.len(), "linked nested collection");
                self.children.insert(
                    id,
                    Child {
                        collection,
                        positions: vec![p],
                        items,
                    },
                );
            }
        }
        Ok(id)
    }

    /// Forget the occurrence of `id` at upstream `p`, unlinking the child
    /// when it was the last one.
    fn untrack(&mut self, cx: &DecoratorContext<'_, T>, id: CollectionId, p: usize) {
        let Some(child) = self.children.get_mut(&id) else {
            return;
        };
        child.positions.retain(|&q| q != p);
        if child.positions.is_empty() {
            if let Some(child) = self.children.remove(&id) {
                cx.unlink_nested(&child.collection);
            }
        }
    }

    fn release_all(&mut self, cx: &DecoratorContext<'_, T>) {
        for (_, child) in self.children.drain() {
            cx.unlink_nested(&child.collection);
        }
        self.slots.clear();
    }

    /// Insert upstream `item` at `p`. Returns the output index for a plain
    /// item; nested items emit their children and return `None`.
    fn admit(&mut self, cx: &mut DecoratorContext<'_, T>, p: usize, item: &T) -> Result<Option<usize>> {
        self.shift(|q| if q >= p { q + 1 } else { q });
        let Some(collection) = (self.nested)(item) else {
            self.slots.insert(p, None);
            return Ok(Some(self.flat_index(p)));
        };
        let id = self.track(cx, collection, p)?;
        self.slots.insert(p, Some(id));
        let base = self.flat_index(p);
        if let Some(child) = self.children.get(&id) {
            for (k, nested) in child.items.iter().enumerate() {
                cx.added(nested.clone(), base + k);
            }
        }
        Ok(None)
    }

    /// Remove upstream position `p`. Returns the output index for a plain
    /// item; nested items retract their children and return `None`.
    fn evict(&mut self, cx: &mut DecoratorContext<'_, T>, p: usize) -> Result<Option<usize>> {
        if p >= self.slots.len() {
            return Err(PipelineError::ItemNotFound {
                decorator: "flatten",
                index: p,
            });
        }
        let base = self.flat_index(p);
        let slot = self.slots.remove(p);
        if let Some(id) = slot {
            if let Some(child) = self.children.get(&id) {
                for (k, nested) in child.items.iter().enumerate().rev() {
                    cx.removed(nested.clone(), base + k);
                }
            }
            self.untrack(cx, id, p);
        }
        self.shift(|q| if q > p { q - 1 } else { q });
        Ok(slot.is_none().then_some(base))
    }

    fn id_of(&self, item: &T) -> Option<CollectionId> {
        (self.nested)(item).map(|c| c.id())
    }
}

impl<T: Item> Decorator<T> for Flatten<T> {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn has_additional_items(&self) -> bool {
        true
    }

    fn is_cache_required(&self) -> bool {
        true
    }

    fn decorate<'a>(&'a self, upstream: Items<'a, T>) -> Items<'a, T> {
        Box::new(upstream.enumerate().flat_map(move |(i, item)| {
            let expanded: SmallVec<[T; 4]> = match self.slots.get(i).copied().flatten() {
                Some(id) => self
                    .children
                    .get(&id)
                    .map(|c| c.items.iter().cloned().collect())
                    .unwrap_or_default(),
                None => smallvec::smallvec![item],
            };
            expanded
        }))
    }

    fn on_reset(&mut self, cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        self.release_all(cx);
        for (p, item) in items.unwrap_or_default().iter().enumerate() {
            let slot = match (self.nested)(item) {
                Some(collection) => Some(self.track(cx, collection, p)?),
                None => None,
            };
            self.slots.push(slot);
        }
        Ok(())
    }

    fn on_added(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        Ok(match self.admit(cx, index, &item)? {
            Some(at) => Flow::Continue((item, at)),
            None => Flow::Stop,
        })
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        let plain = self.slots.get(index).is_some_and(Option::is_none) && self.id_of(&new_item).is_none();
        if plain {
            return Ok(Flow::Continue((old_item, new_item, self.flat_index(index))));
        }
        if let Some(at) = self.evict(cx, index)? {
            cx.removed(old_item, at);
        }
        if let Some(at) = self.admit(cx, index, &new_item)? {
            cx.added(new_item, at);
        }
        Ok(Flow::Stop)
    }

    fn on_moved(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        match self.slots.get(old_index) {
            None => Err(PipelineError::ItemNotFound {
                decorator: "flatten",
                index: old_index,
            }),
            Some(None) => {
                let from = self.flat_index(old_index);
                let slot = self.slots.remove(old_index);
                self.slots.insert(new_index, slot);
                self.shift(|q| renumber(q, old_index, new_index));
                let to = self.flat_index(new_index);
                Ok(if from == to {
                    Flow::Stop
                } else {
                    Flow::Continue((item, from, to))
                })
            }
            Some(Some(_)) => {
                self.evict(cx, old_index)?;
                self.admit(cx, new_index, &item)?;
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
        Ok(match self.evict(cx, index)? {
            Some(at) => Flow::Continue((item, at)),
            None => Flow::Stop,
        })
    }

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        let Some(current) = self.slots.get(index).copied() else {
            return Err(PipelineError::ItemNotFound {
                decorator: "flatten",
                index,
            });
        };
        if current != self.id_of(&item) {
            if let Some(at) = self.evict(cx, index)? {
                cx.removed(item.clone(), at);
            }
            if let Some(at) = self.admit(cx, index, &item)? {
                cx.added(item, at);
            }
            return Ok(Flow::Stop);
        }
        if current.is_some() {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue((item, self.flat_index(index), args)))
    }

    fn on_nested(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        child: CollectionId,
        change: &CollectionChange<T>,
    ) -> Result<()> {
        let Some(state) = self.children.get_mut(&child) else {
            trace!(%child, "change from an untracked child");
            return Ok(());
        };
        if let CollectionChange::Reset { .. } = change {
            cx.reset();
            return Ok(());
        }
        match change {
            CollectionChange::Changed { item, index, .. } => match state.items.get_mut(*index) {
                Some(slot) => *slot = item.clone(),
                None => {
                    return Err(PipelineError::IndexOutOfRange {
                        index: *index,
                        len: state.items.len(),
                    });
                }
            },
            other => other.apply_to(&mut state.items)?,
        }
        let positions = state.positions.clone();
        // Sizes are already updated, so each base accounts for the blocks
        // rewritten before it.
        for p in positions {
            let base = self.flat_index(p);
            match change {
                CollectionChange::Added { item, index } => cx.added(item.clone(), base + index),
                CollectionChange::Removed { item, index } => cx.removed(item.clone(), base + index),
                CollectionChange::Replaced {
                    old_item,
                    new_item,
                    index,
                } => cx.replaced(old_item.clone(), new_item.clone(), base + index),
                CollectionChange::Moved {
                    item,
                    old_index,
                    new_index,
                } => cx.moved(item.clone(), base + old_index, base + new_index),
                CollectionChange::Changed { item, index, args } => {
                    cx.changed(item.clone(), base + index, args.clone());
                }
                CollectionChange::Reset { .. } => {}
            }
        }
        Ok(())
    }

    fn on_detached(&mut self, cx: &mut DecoratorContext<'_, T>) {
        self.release_all(cx);
    }

    fn lookup_indexes(&self, item: &T) -> SmallVec<[usize; 2]> {
        let mut found = SmallVec::new();
        for child in self.children.values() {
            for (k, _) in child.items.iter().enumerate().filter(|(_, x)| *x == item) {
                for &p in &child.positions {
                    found.push(self.flat_index(p) + k);
                }
            }
        }
        found.sort_unstable();
        found
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
