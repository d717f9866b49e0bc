#![forbid(unsafe_code)]

//! Key-based deduplication.
//!
//! Every upstream occurrence is recorded with its key, and every group keeps
//! the sorted list of its members' upstream indexes. Per key, the member
//! with the smallest upstream index is the representative and is the only
//! one shown downstream.
//!
//! # Invariants
//!
//! 1. A group exists iff at least one occurrence carries its key.
//! 2. A group's representative is `members[0]`, its earliest occurrence.
//! 3. Output slots are sticky across hand-offs: when a representative is
//!    removed or overtaken by an inserted occurrence, the group keeps its
//!    slot. With an equal value nothing is emitted; otherwise one `Replaced`
//!    is.
//! 4. A new group, or a group whose representative was moved, lands after
//!    every other visible group whose representative precedes it upstream.
//!
//! Choosing a successor costs O(members-in-key). Keeping member indexes
//! current is a bulk shift, like the one [`IndexMap`](vista_core::IndexMap)
//! performs on insert and remove.
//!
//! Because hand-offs keep their slot, the output order can differ from a
//! fresh reset over the same upstream; the set of groups, their
//! representatives, and their counts cannot.

use std::any::Any;
use std::fmt;
use std::hash::Hash;

use ahash::AHashMap;
use smallvec::SmallVec;
use vista_core::{ChangeArgs, Item, PipelineError, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

type KeyFn<T, K> = Box<dyn Fn(&T) -> K>;

/// Sorted upstream indexes of one key's occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupState {
    members: SmallVec<[usize; 4]>,
}

impl GroupState {
    fn rep(&self) -> usize {
        self.members[0]
    }
}

pub struct Distinct<T: Item, K: 'static = T> {
    key: KeyFn<T, K>,
    occurrences: Vec<(K, T)>,
    groups: AHashMap<K, GroupState>,
    visible: Vec<K>,
    priority: i32,
}

impl<T: Item, K> fmt::Debug for Distinct<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distinct")
            .field("occurrences", &self.occurrences.len())
            .field("groups", &self.groups.len())
            .field("priority", &self.priority)
            .finish()
    }
}

impl<T: Item + Eq + Hash> Distinct<T, T> {
    /// Deduplicate by the item itself.
    #[must_use]
    pub fn by_value() -> Self {
        Self::new(T::clone)
    }
}

impl<T: Item, K: Eq + Hash + Clone + 'static> Distinct<T, K> {
    pub fn new(key: impl Fn(&T) -> K + 'static) -> Self {
        Self {
            key: Box::new(key),
            occurrences: Vec::new(),
            groups: AHashMap::new(),
            visible: Vec::new(),
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// `(representative index, occurrence count)` per group, ordered by
    /// representative.
    #[must_use]
    pub fn representatives(&self) -> Vec<(usize, usize)> {
        let mut reps: Vec<(usize, usize)> = self
            .groups
            .values()
            .map(|g| (g.rep(), g.members.len()))
            .collect();
        reps.sort_unstable();
        reps
    }

    fn shown(&self, key: &K) -> Option<&T> {
        let group = self.groups.get(key)?;
        self.occurrences.get(group.rep()).map(|(_, item)| item)
    }

    fn slot_of(&self, key: &K) -> Result<usize> {
        self.visible
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| PipelineError::InvariantViolation("distinct group has no output slot".into()))
    }

    /// Slot for `key` among the other visible groups, given its
    /// representative `rep`.
    fn landing_slot(&self, key: &K, rep: usize) -> usize {
        self.visible
            .iter()
            .filter(|k| *k != key && self.groups.get(*k).is_some_and(|g| g.rep() < rep))
            .count()
    }

    fn missing(index: usize) -> PipelineError {
        PipelineError::ItemNotFound {
            decorator: "distinct",
            index,
        }
    }

    /// Remap every member index through `f`.
    fn remap(&mut self, f: impl Fn(usize) -> usize) {
        for group in self.groups.values_mut() {
            for m in &mut group.members {
                *m = f(*m);
            }
        }
    }

    /// Record a new occurrence at upstream `index` and emit what it changes.
    fn admit(&mut self, cx: &mut DecoratorContext<'_, T>, index: usize, item: T) -> Result<()> {
        let key = (self.key)(&item);
        self.remap(|m| if m >= index { m + 1 } else { m });
        self.occurrences.insert(index, (key.clone(), item.clone()));
        match self.groups.get_mut(&key) {
            Some(group) => {
                let at = group.members.partition_point(|&m| m < index);
                group.members.insert(at, index);
                if at == 0 {
                    let old = self.occurrences[group.members[1]].1.clone();
                    if old != item {
                        let slot = self.slot_of(&key)?;
                        cx.replaced(old, item, slot);
                    }
                }
            }
            None => {
                let slot = self.landing_slot(&key, index);
                self.visible.insert(slot, key.clone());
                self.groups.insert(
                    key,
                    GroupState {
                        members: smallvec::smallvec![index],
                    },
                );
                cx.added(item, slot);
            }
        }
        Ok(())
    }

    /// Drop the occurrence at upstream `index` and emit what it changes.
    fn retire(&mut self, cx: &mut DecoratorContext<'_, T>, index: usize) -> Result<()> {
        if index >= self.occurrences.len() {
            return Err(Self::missing(index));
        }
        let (key, item) = self.occurrences.remove(index);
        let group = self.groups.get_mut(&key).ok_or_else(|| Self::missing(index))?;
        let at = group
            .members
            .binary_search(&index)
            .map_err(|_| Self::missing(index))?;
        group.members.remove(at);
        let emptied = group.members.is_empty();
        self.remap(|m| if m > index { m - 1 } else { m });
        if emptied {
            let slot = self.slot_of(&key)?;
            self.visible.remove(slot);
            self.groups.remove(&key);
            cx.removed(item, slot);
            return Ok(());
        }
        if at == 0 {
            // Hand off to the next occurrence of the same key.
            let shown = self.shown(&key).cloned().ok_or_else(|| Self::missing(index))?;
            if shown != item {
                let slot = self.slot_of(&key)?;
                cx.replaced(item, shown, slot);
            }
        }
        Ok(())
    }
}

impl<T: Item, K: Eq + Hash + Clone + 'static> Decorator<T> for Distinct<T, K> {
    fn name(&self) -> &'static str {
        "distinct"
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
        Box::new(self.visible.iter().filter_map(|k| self.shown(k).cloned()))
    }

    fn on_reset(&mut self, _cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        self.occurrences.clear();
        self.groups.clear();
        self.visible.clear();
        for (index, item) in items.unwrap_or_default().iter().enumerate() {
            let key = (self.key)(item);
            match self.groups.get_mut(&key) {
                Some(group) => group.members.push(index),
                None => {
                    self.groups.insert(
                        key.clone(),
                        GroupState {
                            members: smallvec::smallvec![index],
                        },
                    );
                    self.visible.push(key.clone());
                }
            }
            self.occurrences.push((key, item.clone()));
        }
        Ok(())
    }

    fn on_added(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.admit(cx, index, item)?;
        Ok(Flow::Stop)
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        _old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        let key = (self.key)(&new_item);
        let Some((current, shown)) = self.occurrences.get_mut(index) else {
            return Err(Self::missing(index));
        };
        if *current != key {
            self.retire(cx, index)?;
            self.admit(cx, index, new_item)?;
            return Ok(Flow::Stop);
        }
        let old = std::mem::replace(shown, new_item.clone());
        if self.groups.get(&key).is_some_and(|g| g.rep() == index) {
            let slot = self.slot_of(&key)?;
            return Ok(Flow::Continue((old, new_item, slot)));
        }
        Ok(Flow::Stop)
    }

    fn on_moved(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        _item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        if old_index >= self.occurrences.len() || new_index >= self.occurrences.len() {
            return Err(Self::missing(old_index));
        }
        let entry = self.occurrences.remove(old_index);
        let key = entry.0.clone();
        self.occurrences.insert(new_index, entry);

        let group = self.groups.get_mut(&key).ok_or_else(|| Self::missing(old_index))?;
        let was_rep = group.rep() == old_index;
        let at = group
            .members
            .binary_search(&old_index)
            .map_err(|_| Self::missing(old_index))?;
        group.members.remove(at);
        // Positions of the untouched occurrences after the move.
        self.remap(|m| {
            if old_index < new_index && m > old_index && m <= new_index {
                m - 1
            } else if new_index < old_index && m >= new_index && m < old_index {
                m + 1
            } else {
                m
            }
        });
        let group = self.groups.get_mut(&key).ok_or_else(|| Self::missing(new_index))?;
        // Where the previous representative sits now.
        let previous = if was_rep { new_index } else { group.rep() };
        let at = group.members.partition_point(|&m| m < new_index);
        group.members.insert(at, new_index);
        let rep = group.rep();
        let is_rep = rep == new_index;

        let slot = self.slot_of(&key)?;
        if previous != rep {
            let old = self.occurrences[previous].1.clone();
            let shown = self.occurrences[rep].1.clone();
            if old != shown {
                cx.replaced(old, shown, slot);
            }
        }
        if was_rep || is_rep {
            let target = self.landing_slot(&key, rep);
            if target != slot {
                let moved = self.visible.remove(slot);
                self.visible.insert(target, moved);
                let shown = self.occurrences[rep].1.clone();
                cx.moved(shown, slot, target);
            }
        }
        Ok(Flow::Stop)
    }

    fn on_removed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        _item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.retire(cx, index)?;
        Ok(Flow::Stop)
    }

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        let key = (self.key)(&item);
        let Some((current, shown)) = self.occurrences.get_mut(index) else {
            return Err(Self::missing(index));
        };
        if *current != key {
            self.retire(cx, index)?;
            self.admit(cx, index, item)?;
            return Ok(Flow::Stop);
        }
        *shown = item.clone();
        if self.groups.get(&key).is_some_and(|g| g.rep() == index) {
            let slot = self.slot_of(&key)?;
            return Ok(Flow::Continue((item, slot, args)));
        }
        Ok(Flow::Stop)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ObservableCollection;
    use crate::testing::Probe;
    use proptest::prelude::*;
    use vista_core::CollectionChange;

    fn letters(s: &[&'static str]) -> Vec<&'static str> {
        s.to_vec()
    }

    #[test]
    fn representative_hand_off_is_silent() {
        let c = ObservableCollection::from_vec(letters(&["a", "b", "a", "c"]));
        let handle = c.attach(Distinct::by_value()).unwrap();
        let probe = Probe::new(&c);
        assert_eq!(probe.mirror(), vec!["a", "b", "c"]);
        c.remove_at(0).unwrap();
        assert!(probe.take().is_empty());
        assert_eq!(c.decorated_items().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            c.with_decorator(handle, |d| d.representatives()).unwrap(),
            vec![(0, 1), (1, 1), (2, 1)]
        );
    }

    #[test]
    fn last_occurrence_removal_removes_group() {
        let c = ObservableCollection::from_vec(letters(&["a", "b", "a"]));
        c.attach(Distinct::by_value()).unwrap();
        let probe = Probe::new(&c);
        c.remove_at(1).unwrap();
        assert_eq!(probe.take(), vec![CollectionChange::Removed { item: "b", index: 1 }]);
        c.push("d").unwrap();
        c.push("a").unwrap();
        assert_eq!(probe.take(), vec![CollectionChange::Added { item: "d", index: 1 }]);
        probe.check(&c);
    }

    #[test]
    fn earlier_occurrence_with_new_value_replaces() {
        let c = ObservableCollection::from_vec(vec![(1, 'x'), (2, 'y')]);
        c.attach(Distinct::new(|p: &(i32, char)| p.0)).unwrap();
        let probe = Probe::new(&c);
        c.insert(0, (2, 'z')).unwrap();
        assert_eq!(
            probe.take(),
            vec![CollectionChange::Replaced {
                old_item: (2, 'y'),
                new_item: (2, 'z'),
                index: 1
            }]
        );
        probe.check(&c);
    }

    #[test]
    fn successor_is_the_next_member_of_the_same_key() {
        let c = ObservableCollection::from_vec(vec![(1, 'a'), (2, 'b'), (1, 'c'), (2, 'd'), (1, 'e')]);
        let handle = c.attach(Distinct::new(|p: &(i32, char)| p.0)).unwrap();
        let seen = Probe::new(&c);

        c.remove_at(0).unwrap();
        assert_eq!(
            seen.take(),
            vec![CollectionChange::Replaced {
                old_item: (1, 'a'),
                new_item: (1, 'c'),
                index: 0
            }]
        );
        assert_eq!(
            c.with_decorator(handle, |d| d.representatives()).unwrap(),
            vec![(0, 2), (1, 2)]
        );

        c.remove_at(1).unwrap();
        assert_eq!(
            seen.take(),
            vec![CollectionChange::Replaced {
                old_item: (1, 'c'),
                new_item: (1, 'e'),
                index: 0
            }]
        );
        assert_eq!(c.decorated_items().unwrap(), vec![(1, 'e'), (2, 'b')]);
        assert_eq!(
            c.with_decorator(handle, |d| d.representatives()).unwrap(),
            vec![(0, 2), (2, 1)]
        );
        seen.check(&c);
    }

    #[test]
    fn key_change_regroups() {
        let c = ObservableCollection::from_vec(vec![1, 2, 3]);
        let handle = c.attach(Distinct::by_value()).unwrap();
        let probe = Probe::new(&c);
        c.replace(2, 1).unwrap();
        assert_eq!(probe.take(), vec![CollectionChange::Removed { item: 3, index: 2 }]);
        assert_eq!(c.with_decorator(handle, |d| d.group_count()).unwrap(), 2);
        c.replace(0, 7).unwrap();
        probe.check(&c);
        assert_eq!(
            c.with_decorator(handle, |d| d.representatives()).unwrap(),
            vec![(0, 1), (1, 1), (2, 1)]
        );
    }

    #[test]
    fn moves_keep_slots_and_track_representatives() {
        let c = ObservableCollection::from_vec(vec![(1, 'p'), (2, 'q'), (1, 'r')]);
        let handle = c
            .attach(Distinct::new(|p: &(i32, char)| p.0))
            .unwrap();
        let probe = Probe::new(&c);
        c.move_item(2, 0).unwrap();
        assert_eq!(
            probe.take(),
            vec![CollectionChange::Replaced {
                old_item: (1, 'p'),
                new_item: (1, 'r'),
                index: 0
            }]
        );
        c.move_item(0, 2).unwrap();
        assert_eq!(
            probe.take(),
            vec![CollectionChange::Replaced {
                old_item: (1, 'r'),
                new_item: (1, 'p'),
                index: 0
            }]
        );
        probe.check(&c);
        assert_eq!(
            c.with_decorator(handle, |d| d.representatives()).unwrap(),
            vec![(0, 2), (1, 1)]
        );
    }

    #[test]
    fn moving_a_representative_moves_its_slot() {
        let c = ObservableCollection::from_vec(letters(&["a", "b"]));
        c.attach(Distinct::by_value()).unwrap();
        let seen = Probe::new(&c);
        c.move_item(1, 0).unwrap();
        assert_eq!(
            seen.take(),
            vec![CollectionChange::Moved {
                item: "b",
                old_index: 1,
                new_index: 0
            }]
        );
        assert_eq!(c.decorated_items().unwrap(), vec!["b", "a"]);

        c.push("c").unwrap();
        seen.take();
        c.move_item(0, 2).unwrap();
        assert_eq!(
            seen.take(),
            vec![CollectionChange::Moved {
                item: "b",
                old_index: 0,
                new_index: 2
            }]
        );
        assert_eq!(c.decorated_items().unwrap(), vec!["a", "c", "b"]);
        seen.check(&c);
    }

    #[test]
    fn moving_a_hidden_occurrence_ahead_hands_off_and_moves() {
        let c = ObservableCollection::from_vec(vec![(1, 'x'), (2, 'y'), (1, 'z')]);
        c.attach(Distinct::new(|p: &(i32, char)| p.0)).unwrap();
        let seen = Probe::new(&c);
        c.move_item(1, 0).unwrap();
        seen.take();
        assert_eq!(c.decorated_items().unwrap(), vec![(2, 'y'), (1, 'x')]);

        // (1, 'z') overtakes both and becomes the shown occurrence of key 1.
        c.move_item(2, 0).unwrap();
        assert_eq!(
            seen.take(),
            vec![
                CollectionChange::Replaced {
                    old_item: (1, 'x'),
                    new_item: (1, 'z'),
                    index: 1
                },
                CollectionChange::Moved {
                    item: (1, 'z'),
                    old_index: 1,
                    new_index: 0
                },
            ]
        );
        assert_eq!(c.decorated_items().unwrap(), vec![(1, 'z'), (2, 'y')]);
        seen.check(&c);
    }

    fn first_occurrences(items: &[u8]) -> Vec<u8> {
        let mut seen = Vec::new();
        for item in items {
            if !seen.contains(item) {
                seen.push(*item);
            }
        }
        seen
    }

    proptest! {
        #[test]
        fn moves_keep_first_occurrence_order(
            seed in prop::collection::vec(0u8..5, 1..12),
            moves in prop::collection::vec((0usize..16, 0usize..16), 0..24),
        ) {
            let c = ObservableCollection::from_vec(seed);
            c.attach(Distinct::by_value()).unwrap();
            let seen = Probe::new(&c);
            for (from, to) in moves {
                let len = c.len();
                c.move_item(from % len, to % len).unwrap();
                prop_assert_eq!(c.decorated_items().unwrap(), first_occurrences(&c.items()));
            }
            seen.check(&c);
        }
    }
}
