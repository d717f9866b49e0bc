#![forbid(unsafe_code)]

//! Fixed items before and after the upstream sequence.

use std::any::Any;
use std::fmt;

use smallvec::SmallVec;
use vista_core::{ChangeArgs, Item, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

pub struct HeaderFooter<T: Item> {
    header: Vec<T>,
    footer: Vec<T>,
    /// Upstream length; the footer starts at `header.len() + upstream_len`.
    upstream_len: usize,
    priority: i32,
}

impl<T: Item> fmt::Debug for HeaderFooter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderFooter")
            .field("header", &self.header.len())
            .field("footer", &self.footer.len())
            .field("upstream_len", &self.upstream_len)
            .finish()
    }
}

impl<T: Item> HeaderFooter<T> {
    #[must_use]
    pub fn new(header: Vec<T>, footer: Vec<T>) -> Self {
        Self {
            header,
            footer,
            upstream_len: 0,
            priority: 0,
        }
    }

    #[must_use]
    pub fn header(items: Vec<T>) -> Self {
        Self::new(items, Vec::new())
    }

    #[must_use]
    pub fn footer(items: Vec<T>) -> Self {
        Self::new(Vec::new(), items)
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Apply through `update_decorator`.
    pub fn set_header(&mut self, items: Vec<T>) {
        self.header = items;
    }

    /// Apply through `update_decorator`.
    pub fn set_footer(&mut self, items: Vec<T>) {
        self.footer = items;
    }

    #[must_use]
    pub fn footer_offset(&self) -> usize {
        self.header.len() + self.upstream_len
    }

    fn shifted(&self, index: usize) -> usize {
        self.header.len() + index
    }
}

impl<T: Item> Decorator<T> for HeaderFooter<T> {
    fn name(&self) -> &'static str {
        "header-footer"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn has_additional_items(&self) -> bool {
        true
    }

    fn decorate<'a>(&'a self, upstream: Items<'a, T>) -> Items<'a, T> {
        Box::new(
            self.header
                .iter()
                .cloned()
                .chain(upstream)
                .chain(self.footer.iter().cloned()),
        )
    }

    fn on_reset(&mut self, _cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        self.upstream_len = items.map_or(0, <[T]>::len);
        Ok(())
    }

    fn on_added(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.upstream_len += 1;
        Ok(Flow::Continue((item, self.shifted(index))))
    }

    fn on_replaced(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        Ok(Flow::Continue((old_item, new_item, self.shifted(index))))
    }

    fn on_moved(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        Ok(Flow::Continue((item, self.shifted(old_index), self.shifted(new_index))))
    }

    fn on_removed(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        self.upstream_len = self.upstream_len.saturating_sub(1);
        Ok(Flow::Continue((item, self.shifted(index))))
    }

    fn on_changed(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        Ok(Flow::Continue((item, self.shifted(index), args)))
    }

    fn lookup_indexes(&self, item: &T) -> SmallVec<[usize; 2]> {
        let footer_at = self.footer_offset();
        self.header
            .iter()
            .enumerate()
            .filter(|(_, x)| *x == item)
            .map(|(i, _)| i)
            .chain(
                self.footer
                    .iter()
                    .enumerate()
                    .filter(|(_, x)| *x == item)
                    .map(|(j, _)| footer_at + j),
            )
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
    use crate::decorators::Filter;
    use crate::testing::Probe;
    use vista_core::CollectionChange;

    #[test]
    fn wraps_upstream_and_offsets_events() {
        let c = ObservableCollection::from_vec(vec![1, 2]);
        let handle = c.attach(HeaderFooter::new(vec![0], vec![99, 100])).unwrap();
        let probe = Probe::new(&c);
        assert_eq!(probe.mirror(), vec![0, 1, 2, 99, 100]);
        c.push(3).unwrap();
        c.remove_at(0).unwrap();
        assert_eq!(
            probe.take(),
            vec![
                CollectionChange::Added { item: 3, index: 3 },
                CollectionChange::Removed { item: 1, index: 1 },
            ]
        );
        probe.check(&c);
        assert_eq!(c.with_decorator(handle, |h| h.footer_offset()).unwrap(), 3);
    }

    #[test]
    fn footer_tracks_filtered_length() {
        let c = ObservableCollection::from_vec(vec![1, 2, 3, 4]);
        c.attach(Filter::new(|x: &i32| x % 2 == 0)).unwrap();
        let handle = c.attach(HeaderFooter::footer(vec![-1])).unwrap();
        assert_eq!(c.decorated_items().unwrap(), vec![2, 4, -1]);
        c.push(6).unwrap();
        assert_eq!(c.with_decorator(handle, |h| h.footer_offset()).unwrap(), 3);
        c.update_decorator(handle, |h| h.set_header(vec![-2])).unwrap();
        assert_eq!(c.decorated_items().unwrap(), vec![-2, 2, 4, 6, -1]);
    }

    #[test]
    fn lookup_finds_injected_items() {
        let hf = HeaderFooter::new(vec![7], vec![8, 7]);
        assert_eq!(hf.lookup_indexes(&7).as_slice(), &[0, 2]);
    }
}
