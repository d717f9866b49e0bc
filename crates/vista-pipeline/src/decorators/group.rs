#![forbid(unsafe_code)]

//! Group headers.
//!
//! Each distinct key gets one header item, built when the group appears and
//! injected directly before the group's first member. Members stay in
//! upstream order; pair with a [`Sort`](super::Sort) on the same key to
//! cluster them.
//!
//! Header positions are tracked in an [`IndexMap`] keyed by the upstream
//! index of each group's first member, so for upstream index `i`:
//!
//! ```text
//! output(i)        = i + |{ first <= i }|
//! header_output(f) = f + |{ first <  f }|
//! ```
//!
//! # Invariants
//!
//! 1. A group exists iff at least one member carries its key.
//! 2. A header sits immediately before its group's earliest member.
//! 3. A header value is fixed for the life of its group.
//!
//! # Failure Modes
//!
//! - An event naming an unknown upstream index returns
//!   [`PipelineError::ItemNotFound`].

use std::any::Any;
use std::fmt;
use std::hash::Hash;

use ahash::AHashMap;
use smallvec::SmallVec;
use vista_core::{ChangeArgs, IndexMap, Item, PipelineError, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

type KeyFn<T, K> = Box<dyn Fn(&T) -> K>;
type HeaderFn<T, K> = Box<dyn Fn(&K, &T) -> T>;

struct GroupRecord<T> {
    header: T,
    count: usize,
}

pub struct Group<T: Item, K: 'static> {
    key: KeyFn<T, K>,
    make_header: HeaderFn<T, K>,
    keys: Vec<K>,
    groups: AHashMap<K, GroupRecord<T>>,
    headers: IndexMap<K>,
    priority: i32,
}

impl<T: Item, K> fmt::Debug for Group<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("members", &self.keys.len())
            .field("groups", &self.groups.len())
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

impl<T: Item, K: Eq + Hash + Clone + 'static> Group<T, K> {
    /// Group by `key`; `make_header` builds a group's header from its key
    /// and first member.
    pub fn new(key: impl Fn(&T) -> K + 'static, make_header: impl Fn(&K, &T) -> T + 'static) -> Self {
        Self {
            key: Box::new(key),
            make_header: Box::new(make_header),
            keys: Vec::new(),
            groups: AHashMap::new(),
            headers: IndexMap::new(),
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

    #[must_use]
    pub fn header(&self, key: &K) -> Option<&T> {
        self.groups.get(key).map(|g| &g.header)
    }

    #[must_use]
    pub fn member_count(&self, key: &K) -> usize {
        self.groups.get(key).map_or(0, |g| g.count)
    }

    /// Upstream index of each group's first member, ascending.
    #[must_use]
    pub fn group_starts(&self) -> Vec<usize> {
        self.headers.indexes().collect()
    }

    fn output_index(&self, index: usize) -> usize {
        index + self.headers.rank(index + 1)
    }

    fn header_index(&self, first: usize) -> usize {
        first + self.headers.rank(first)
    }

    fn first_of(&self, key: &K) -> Option<usize> {
        self.headers
            .entries()
            .iter()
            .find(|e| e.value == *key)
            .map(|e| e.index)
    }

    fn missing(index: usize) -> PipelineError {
        PipelineError::ItemNotFound {
            decorator: "group",
            index,
        }
    }

    fn header_of(&self, key: &K, index: usize) -> Result<T> {
        self.groups
            .get(key)
            .map(|g| g.header.clone())
            .ok_or_else(|| Self::missing(index))
    }

    /// Insert a member at upstream `index`, emitting header changes.
    fn insert_member(&mut self, cx: &mut DecoratorContext<'_, T>, index: usize, item: T) -> Result<()> {
        let key = (self.key)(&item);
        self.keys.insert(index, key.clone());
        self.headers.shift_indexes(index, 1);
        match self.first_of(&key) {
            Some(first) => {
                let header = self.header_of(&key, index)?;
                if let Some(group) = self.groups.get_mut(&key) {
                    group.count += 1;
                }
                let at = self.output_index(index);
                cx.added(item, at);
                if index < first {
                    let from = self.header_index(first);
                    self.headers.remove(first);
                    self.headers.add(index, key, None);
                    cx.moved(header, from, at);
                }
            }
            None => {
                let header = (self.make_header)(&key, &item);
                self.headers.add(index, key.clone(), None);
                self.groups.insert(
                    key,
                    GroupRecord {
                        header: header.clone(),
                        count: 1,
                    },
                );
                let at = self.header_index(index);
                cx.added(header, at);
                cx.added(item, at + 1);
            }
        }
        Ok(())
    }

    /// Remove the member at upstream `index`, emitting header changes.
    fn remove_member(&mut self, cx: &mut DecoratorContext<'_, T>, index: usize, item: T) -> Result<()> {
        if index >= self.keys.len() {
            return Err(Self::missing(index));
        }
        let at = self.output_index(index);
        let key = self.keys.remove(index);
        let remaining = match self.groups.get_mut(&key) {
            Some(group) => {
                group.count -= 1;
                group.count
            }
            None => return Err(Self::missing(index)),
        };
        let was_first = self.headers.remove(index).is_some();
        self.headers.shift_indexes(index, -1);
        cx.removed(item, at);
        if remaining == 0 {
            let record = self.groups.remove(&key).ok_or_else(|| Self::missing(index))?;
            cx.removed(record.header, at - 1);
            return Ok(());
        }
        if was_first {
            let next = self.keys[index..]
                .iter()
                .position(|k| *k == key)
                .map(|offset| index + offset)
                .ok_or_else(|| Self::missing(index))?;
            let header = self.header_of(&key, index)?;
            self.headers.add(next, key, None);
            let to = self.header_index(next);
            if to != at - 1 {
                cx.moved(header, at - 1, to);
            }
        }
        Ok(())
    }
}

impl<T: Item, K: Eq + Hash + Clone + 'static> Decorator<T> for Group<T, K> {
    fn name(&self) -> &'static str {
        "group"
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
            let mut out: SmallVec<[T; 2]> = SmallVec::new();
            if let Some(group) = self.headers.get(i).and_then(|k| self.groups.get(k)) {
                out.push(group.header.clone());
            }
            out.push(item);
            out
        }))
    }

    fn on_reset(&mut self, _cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        self.keys.clear();
        self.groups.clear();
        self.headers.clear();
        for (index, item) in items.unwrap_or_default().iter().enumerate() {
            let key = (self.key)(item);
            match self.groups.get_mut(&key) {
                Some(group) => group.count += 1,
                None => {
                    let header = (self.make_header)(&key, item);
                    self.groups.insert(key.clone(), GroupRecord { header, count: 1 });
                    self.headers.push(index, key.clone());
                }
            }
            self.keys.push(key);
        }
        Ok(())
    }

    fn on_added(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.insert_member(cx, index, item)?;
        Ok(Flow::Stop)
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        let key = (self.key)(&new_item);
        match self.keys.get(index) {
            None => Err(Self::missing(index)),
            Some(current) if *current == key => {
                Ok(Flow::Continue((old_item, new_item, self.output_index(index))))
            }
            Some(_) => {
                self.remove_member(cx, index, old_item)?;
                self.insert_member(cx, index, new_item)?;
                Ok(Flow::Stop)
            }
        }
    }

    fn on_moved(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        let Some(key) = self.keys.get(old_index).cloned() else {
            return Err(Self::missing(old_index));
        };
        let first = self.first_of(&key).ok_or_else(|| Self::missing(old_index))?;
        let keeps_header = first != old_index && new_index < renumber(first, old_index, new_index);
        if first == old_index || keeps_header {
            // The moved member is or becomes its group's first: the header
            // travels with it.
            self.remove_member(cx, old_index, item.clone())?;
            self.insert_member(cx, new_index, item)?;
            return Ok(Flow::Stop);
        }
        let from = self.output_index(old_index);
        let moved = self.keys.remove(old_index);
        self.keys.insert(new_index, moved);
        self.headers.move_index(old_index, new_index);
        let to = self.output_index(new_index);
        if from == to {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue((item, from, to)))
    }

    fn on_removed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.remove_member(cx, index, item)?;
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
        match self.keys.get(index) {
            None => Err(Self::missing(index)),
            Some(current) if *current == key => Ok(Flow::Continue((item, self.output_index(index), args))),
            Some(_) => {
                self.remove_member(cx, index, item.clone())?;
                self.insert_member(cx, index, item)?;
                Ok(Flow::Stop)
            }
        }
    }

    fn lookup_indexes(&self, item: &T) -> SmallVec<[usize; 2]> {
        self.headers
            .entries()
            .iter()
            .filter(|e| self.groups.get(&e.value).is_some_and(|g| g.header == *item))
            .map(|e| self.header_index(e.index))
            .collect()
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
    use vista_core::CollectionChange;

    fn by_initial() -> Group<String, char> {
        Group::new(
            |s: &String| s.chars().next().unwrap_or(' '),
            |k: &char, _first: &String| format!("#{k}"),
        )
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn headers_precede_first_members() {
        let c = ObservableCollection::from_vec(words(&["apple", "avocado", "banana"]));
        let handle = c.attach(by_initial()).unwrap();
        assert_eq!(
            c.decorated_items().unwrap(),
            words(&["#a", "apple", "avocado", "#b", "banana"])
        );
        assert_eq!(c.with_decorator(handle, |g| g.member_count(&'a')).unwrap(), 2);
        assert_eq!(c.with_decorator(handle, |g| g.group_starts()).unwrap(), vec![0, 2]);
    }

    #[test]
    fn new_group_adds_header_then_member() {
        let c = ObservableCollection::from_vec(words(&["apple", "banana"]));
        c.attach(by_initial()).unwrap();
        let probe = Probe::new(&c);
        c.push("cherry".to_owned()).unwrap();
        assert_eq!(
            probe.take(),
            vec![
                CollectionChange::Added {
                    item: "#c".to_owned(),
                    index: 4
                },
                CollectionChange::Added {
                    item: "cherry".to_owned(),
                    index: 5
                },
            ]
        );
        probe.check(&c);
    }

    #[test]
    fn earlier_member_pulls_header_forward() {
        let c = ObservableCollection::from_vec(words(&["banana", "apple"]));
        c.attach(by_initial()).unwrap();
        let probe = Probe::new(&c);
        c.insert(0, "apricot".to_owned()).unwrap();
        assert_eq!(
            probe.take(),
            vec![
                CollectionChange::Added {
                    item: "apricot".to_owned(),
                    index: 0
                },
                CollectionChange::Moved {
                    item: "#a".to_owned(),
                    old_index: 3,
                    new_index: 0
                },
            ]
        );
        probe.check(&c);
        assert_eq!(
            c.decorated_items().unwrap(),
            words(&["#a", "apricot", "#b", "banana", "apple"])
        );
    }

    #[test]
    fn removing_members_retracts_or_moves_headers() {
        let c = ObservableCollection::from_vec(words(&["apple", "banana", "avocado", "cherry"]));
        c.attach(by_initial()).unwrap();
        let probe = Probe::new(&c);
        c.remove_at(0).unwrap();
        assert_eq!(
            probe.take(),
            vec![
                CollectionChange::Removed {
                    item: "apple".to_owned(),
                    index: 1
                },
                CollectionChange::Moved {
                    item: "#a".to_owned(),
                    old_index: 0,
                    new_index: 2
                },
            ]
        );
        c.remove_at(2).unwrap();
        assert_eq!(
            probe.take(),
            vec![
                CollectionChange::Removed {
                    item: "cherry".to_owned(),
                    index: 5
                },
                CollectionChange::Removed {
                    item: "#c".to_owned(),
                    index: 4
                },
            ]
        );
        probe.check(&c);
    }

    #[test]
    fn moves_keep_headers_in_place() {
        let c = ObservableCollection::from_vec(words(&["apple", "banana", "berry", "cherry"]));
        c.attach(by_initial()).unwrap();
        let probe = Probe::new(&c);
        c.move_item(2, 3).unwrap();
        assert_eq!(
            probe.take(),
            vec![CollectionChange::Moved {
                item: "berry".to_owned(),
                old_index: 4,
                new_index: 6
            }]
        );
        c.move_item(3, 0).unwrap();
        probe.check(&c);
        assert_eq!(
            c.decorated_items().unwrap(),
            words(&["#b", "berry", "#a", "apple", "banana", "#c", "cherry"])
        );
    }

    #[test]
    fn key_change_regroups_member() {
        let c = ObservableCollection::from_vec(words(&["apple", "banana"]));
        let handle = c.attach(by_initial()).unwrap();
        let probe = Probe::new(&c);
        c.replace(1, "apricot".to_owned()).unwrap();
        probe.check(&c);
        assert_eq!(c.decorated_items().unwrap(), words(&["#a", "apple", "apricot"]));
        assert_eq!(c.with_decorator(handle, |g| g.group_count()).unwrap(), 1);
    }
}
