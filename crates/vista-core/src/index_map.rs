#![forbid(unsafe_code)]

//! Sorted position-to-payload map used by decorators for index bookkeeping.
//!
//! An [`IndexMap`] records which upstream positions a decorator currently
//! cares about (items passing a filter, items counted by a limit, group
//! header anchors) together with a per-position payload. Entries live in a
//! plain vector ordered by position so lookups are a binary search and bulk
//! renumbering after an upstream insert or remove is a tight loop over the
//! tail of the vector.
//!
//! # Invariants
//!
//! 1. Entry positions are strictly ascending.
//! 2. [`IndexMap::binary_search`] returns `Err(p)` with the insertion point
//!    when the position is absent, so callers never search twice.
//! 3. [`IndexMap::shift_indexes`] and [`IndexMap::move_index`] renumber
//!    entries exactly the way the upstream sequence renumbers its items.
//!
//! # Failure Modes
//!
//! - Positional accessors (`entry_at`, `remove_at`, `insert_at`) panic on an
//!   out-of-range slot, like `Vec`.
//! - Index-keyed accessors (`get`, `remove`, `move_index`) return `None` for
//!   absent positions.

use std::fmt;

/// Minimum number of slots allocated on first growth.
const MIN_CAPACITY: usize = 4;

/// A single `(index, value)` pair stored in an [`IndexMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry<V> {
    /// Upstream position.
    pub index: usize,
    /// Decorator payload for that position.
    pub value: V,
}

/// Result of relocating an entry with [`IndexMap::move_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Slot of the entry before the move.
    pub from: usize,
    /// Slot of the entry after the move.
    pub to: usize,
}

impl MoveOutcome {
    /// Whether the entry changed rank among the recorded positions.
    #[must_use]
    pub const fn rank_changed(&self) -> bool {
        self.from != self.to
    }
}

/// Sorted vector of `(index, value)` entries.
#[derive(Clone, PartialEq, Eq)]
pub struct IndexMap<V> {
    entries: Vec<IndexEntry<V>>,
}

impl<V> Default for IndexMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for IndexMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (e.index, &e.value)))
            .finish()
    }
}

impl<V> IndexMap<V> {
    /// Create an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create an empty map with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Number of recorded positions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no positions are recorded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocated slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Drop every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Locate `index`: `Ok(slot)` if recorded, `Err(insertion_slot)` otherwise.
    #[inline]
    pub fn binary_search(&self, index: usize) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.index.cmp(&index))
    }

    /// Number of recorded positions strictly below `index`.
    #[inline]
    #[must_use]
    pub fn rank(&self, index: usize) -> usize {
        match self.binary_search(index) {
            Ok(slot) | Err(slot) => slot,
        }
    }

    /// Whether `index` is recorded.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.binary_search(index).is_ok()
    }

    /// Payload recorded at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&V> {
        self.binary_search(index)
            .ok()
            .map(|slot| &self.entries[slot].value)
    }

    /// Mutable payload recorded at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut V> {
        match self.binary_search(index) {
            Ok(slot) => Some(&mut self.entries[slot].value),
            Err(_) => None,
        }
    }

    /// Entry stored in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= len()`.
    #[must_use]
    pub fn entry_at(&self, slot: usize) -> &IndexEntry<V> {
        &self.entries[slot]
    }

    /// Mutable payload stored in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= len()`.
    pub fn value_at_mut(&mut self, slot: usize) -> &mut V {
        &mut self.entries[slot].value
    }

    /// All entries in ascending position order.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry<V>] {
        &self.entries
    }

    /// Payloads in ascending position order.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.entries.iter().map(|e| &e.value)
    }

    /// Recorded positions in ascending order.
    pub fn indexes(&self) -> impl DoubleEndedIterator<Item = usize> + ExactSizeIterator + '_ {
        self.entries.iter().map(|e| e.index)
    }

    /// Record `value` at `index`, replacing an existing payload.
    ///
    /// `hint` is a candidate slot; when it is the correct insertion point the
    /// binary search is skipped. Returns the slot the entry landed in.
    pub fn add(&mut self, index: usize, value: V, hint: Option<usize>) -> usize {
        let found = match hint {
            Some(slot) if self.hint_fits(slot, index) => {
                if self.entries.get(slot).is_some_and(|e| e.index == index) {
                    Ok(slot)
                } else {
                    Err(slot)
                }
            }
            _ => self.binary_search(index),
        };
        match found {
            Ok(slot) => {
                self.entries[slot].value = value;
                slot
            }
            Err(slot) => {
                self.insert_at(slot, index, value);
                slot
            }
        }
    }

    /// Append an entry whose index is above every recorded one.
    ///
    /// Used when rebuilding from an ordered upstream scan.
    pub fn push(&mut self, index: usize, value: V) {
        debug_assert!(
            self.entries.last().is_none_or(|e| e.index < index),
            "IndexMap::push out of order"
        );
        self.grow();
        self.entries.push(IndexEntry { index, value });
    }

    /// Insert an entry at `slot` without searching.
    ///
    /// # Panics
    ///
    /// Panics if `slot > len()`. Ordering is checked in debug builds.
    pub fn insert_at(&mut self, slot: usize, index: usize, value: V) {
        debug_assert!(
            slot == 0 || self.entries[slot - 1].index < index,
            "IndexMap::insert_at breaks ordering"
        );
        debug_assert!(
            slot == self.entries.len() || self.entries[slot].index > index,
            "IndexMap::insert_at breaks ordering"
        );
        self.grow();
        self.entries.insert(slot, IndexEntry { index, value });
    }

    /// Remove the entry in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= len()`.
    pub fn remove_at(&mut self, slot: usize) -> IndexEntry<V> {
        self.entries.remove(slot)
    }

    /// Remove the entry recorded at `index`, returning its payload.
    pub fn remove(&mut self, index: usize) -> Option<V> {
        match self.binary_search(index) {
            Ok(slot) => Some(self.entries.remove(slot).value),
            Err(_) => None,
        }
    }

    /// Add `delta` to every recorded position `>= from_index`.
    ///
    /// Returns the first affected slot. Callers keep positions ascending:
    /// after an upstream insert at `i` call `shift_indexes(i, 1)`, after an
    /// upstream remove at `i` drop the entry at `i` first and then call
    /// `shift_indexes(i, -1)`.
    pub fn shift_indexes(&mut self, from_index: usize, delta: isize) -> usize {
        let start = self.rank(from_index);
        self.shift_slots(start, delta);
        start
    }

    /// Add `delta` to the position of every entry in slots `>= from_slot`.
    pub fn shift_slots(&mut self, from_slot: usize, delta: isize) {
        if delta == 0 {
            return;
        }
        for entry in &mut self.entries[from_slot..] {
            entry.index = entry.index.saturating_add_signed(delta);
        }
    }

    /// Renumber positions for an upstream move of `old_index` to `new_index`.
    ///
    /// Every recorded position is updated as the upstream sequence would be;
    /// returns the entry's slots before and after when `old_index` was
    /// recorded.
    pub fn move_index(&mut self, old_index: usize, new_index: usize) -> Option<MoveOutcome> {
        let found = self.binary_search(old_index);
        if old_index == new_index {
            return found.ok().map(|slot| MoveOutcome {
                from: slot,
                to: slot,
            });
        }
        let moved = match found {
            Ok(slot) => Some((slot, self.entries.remove(slot).value)),
            Err(_) => None,
        };
        if old_index < new_index {
            let lo = self.rank(old_index + 1);
            let hi = self.rank(new_index + 1);
            for entry in &mut self.entries[lo..hi] {
                entry.index -= 1;
            }
        } else {
            let lo = self.rank(new_index);
            let hi = self.rank(old_index);
            for entry in &mut self.entries[lo..hi] {
                entry.index += 1;
            }
        }
        moved.map(|(from, value)| {
            let to = self.rank(new_index);
            self.insert_at(to, new_index, value);
            MoveOutcome { from, to }
        })
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(usize, &V) -> bool) {
        self.entries.retain(|e| keep(e.index, &e.value));
    }

    fn hint_fits(&self, slot: usize, index: usize) -> bool {
        slot <= self.entries.len()
            && (slot == 0 || self.entries[slot - 1].index < index)
            && (slot == self.entries.len() || self.entries[slot].index >= index)
    }

    /// Doubling growth so bursts of inserts do not reallocate per call.
    fn grow(&mut self) {
        let cap = self.entries.capacity();
        if self.entries.len() == cap {
            self.entries.reserve_exact(cap.max(MIN_CAPACITY));
        }
    }
}

impl<V> FromIterator<(usize, V)> for IndexMap<V> {
    fn from_iter<I: IntoIterator<Item = (usize, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (index, value) in iter {
            map.add(index, value, Some(map.len()));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(indexes: &[usize]) -> IndexMap<char> {
        indexes
            .iter()
            .map(|&i| (i, char::from(b'a' + i as u8)))
            .collect()
    }

    #[test]
    fn binary_search_reports_insertion_point() {
        let m = map(&[1, 4, 7]);
        assert_eq!(m.binary_search(4), Ok(1));
        assert_eq!(m.binary_search(0), Err(0));
        assert_eq!(m.binary_search(5), Err(2));
        assert_eq!(m.binary_search(9), Err(3));
        assert_eq!(m.rank(7), 2);
        assert_eq!(m.rank(8), 3);
    }

    #[test]
    fn add_replaces_existing_payload() {
        let mut m = map(&[2, 5]);
        let slot = m.add(5, 'z', None);
        assert_eq!(slot, 1);
        assert_eq!(m.get(5), Some(&'z'));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn add_with_wrong_hint_falls_back_to_search() {
        let mut m = map(&[2, 5, 8]);
        let slot = m.add(6, 'x', Some(0));
        assert_eq!(slot, 2);
        assert_eq!(m.indexes().collect::<Vec<_>>(), vec![2, 5, 6, 8]);
    }

    #[test]
    fn shift_after_insert_and_remove() {
        let mut m = map(&[0, 3, 6]);
        assert_eq!(m.shift_indexes(3, 1), 1);
        assert_eq!(m.indexes().collect::<Vec<_>>(), vec![0, 4, 7]);
        assert_eq!(m.remove(4), Some('d'));
        m.shift_indexes(4, -1);
        assert_eq!(m.indexes().collect::<Vec<_>>(), vec![0, 6]);
    }

    #[test]
    fn move_forward_renumbers_between() {
        let mut m = map(&[1, 2, 3, 5]);
        let outcome = m.move_index(1, 3).unwrap();
        assert_eq!(outcome, MoveOutcome { from: 0, to: 2 });
        assert_eq!(m.indexes().collect::<Vec<_>>(), vec![1, 2, 3, 5]);
        assert_eq!(m.get(3), Some(&'b'));
        assert_eq!(m.get(1), Some(&'c'));
    }

    #[test]
    fn move_backward_renumbers_between() {
        let mut m = map(&[0, 2, 4]);
        let outcome = m.move_index(4, 1).unwrap();
        assert_eq!(outcome, MoveOutcome { from: 2, to: 1 });
        assert_eq!(m.indexes().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(m.get(1), Some(&'e'));
    }

    #[test]
    fn move_of_unrecorded_position_still_renumbers() {
        let mut m = map(&[1, 3]);
        assert_eq!(m.move_index(0, 2), None);
        assert_eq!(m.indexes().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    #[should_panic]
    fn remove_at_out_of_range_panics() {
        let mut m = map(&[1]);
        m.remove_at(3);
    }

    #[test]
    fn growth_doubles() {
        let mut m = IndexMap::new();
        m.push(0, ());
        assert!(m.capacity() >= MIN_CAPACITY);
        for i in 1..5 {
            m.push(i, ());
        }
        assert!(m.capacity() >= 8);
    }

    fn apply_move(model: &mut Vec<Option<u32>>, old: usize, new: usize) {
        let v = model.remove(old);
        model.insert(new, v);
    }

    proptest! {
        #[test]
        fn move_matches_vec_model(
            marks in proptest::collection::vec(any::<bool>(), 1..24),
            old_seed in any::<usize>(),
            new_seed in any::<usize>(),
        ) {
            let len = marks.len();
            let mut model: Vec<Option<u32>> = marks
                .iter()
                .enumerate()
                .map(|(i, &m)| m.then_some(i as u32))
                .collect();
            let mut m: IndexMap<u32> = model
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (i, v)))
                .collect();
            let (old, new) = (old_seed % len, new_seed % len);
            apply_move(&mut model, old, new);
            m.move_index(old, new);
            let expected: Vec<(usize, u32)> = model
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (i, v)))
                .collect();
            let actual: Vec<(usize, u32)> =
                m.entries().iter().map(|e| (e.index, e.value)).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
