#![forbid(unsafe_code)]

//! First and last item observer.
//!
//! Passes every event through and re-reads both ends of its upstream after
//! each one. The callback fires when either end changes, with the same
//! batch holding as the aggregate stages.

use std::any::Any;
use std::fmt;

use vista_core::{ChangeArgs, Item, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};
use crate::decorators::aggregate::Reporter;

type Ends<T> = (Option<T>, Option<T>);

pub struct FirstLast<T: Item> {
    ends: Ends<T>,
    reporter: Reporter<Ends<T>>,
    priority: i32,
}

impl<T: Item> fmt::Debug for FirstLast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstLast")
            .field("first", &self.ends.0)
            .field("last", &self.ends.1)
            .finish()
    }
}

impl<T: Item> FirstLast<T> {
    /// `callback` receives `(first, last)`; both are `None` when empty.
    pub fn new(callback: impl Fn(Option<&T>, Option<&T>) + 'static) -> Self {
        let mut reporter = Reporter::new();
        reporter.set_callback(move |(first, last): &Ends<T>| callback(first.as_ref(), last.as_ref()));
        Self {
            ends: (None, None),
            reporter,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.ends.0.as_ref()
    }

    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.ends.1.as_ref()
    }

    fn refresh(&mut self, cx: &mut DecoratorContext<'_, T>) -> Result<()> {
        let len = cx.upstream_len();
        self.ends = if len == 0 {
            (None, None)
        } else {
            (Some(cx.upstream_item(0)?), Some(cx.upstream_item(len - 1)?))
        };
        self.reporter.report(cx, &self.ends);
        Ok(())
    }
}

impl<T: Item> Decorator<T> for FirstLast<T> {
    fn name(&self) -> &'static str {
        "first-last"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn decorate<'a>(&'a self, upstream: Items<'a, T>) -> Items<'a, T> {
        upstream
    }

    fn on_reset(&mut self, cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        let items = items.unwrap_or_default();
        self.ends = (items.first().cloned(), items.last().cloned());
        self.reporter.report(cx, &self.ends);
        Ok(())
    }

    fn on_added(&mut self, cx: &mut DecoratorContext<'_, T>, item: T, index: usize) -> Result<Flow<(T, usize)>> {
        self.refresh(cx)?;
        Ok(Flow::Continue((item, index)))
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        self.refresh(cx)?;
        Ok(Flow::Continue((old_item, new_item, index)))
    }

    fn on_moved(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        self.refresh(cx)?;
        Ok(Flow::Continue((item, old_index, new_index)))
    }

    fn on_removed(&mut self, cx: &mut DecoratorContext<'_, T>, item: T, index: usize) -> Result<Flow<(T, usize)>> {
        self.refresh(cx)?;
        Ok(Flow::Continue((item, index)))
    }

    fn on_changed(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        Ok(Flow::Continue((item, index, args)))
    }

    fn on_batch_end(&mut self, cx: &mut DecoratorContext<'_, T>) -> Result<()> {
        self.reporter.flush(cx, &self.ends);
        Ok(())
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
    use crate::decorators::Sort;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Seen = Rc<RefCell<Vec<(Option<i32>, Option<i32>)>>>;

    fn recorder() -> (Seen, impl Fn(Option<&i32>, Option<&i32>) + 'static) {
        let seen: Seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |first: Option<&i32>, last: Option<&i32>| {
            sink.borrow_mut().push((first.copied(), last.copied()));
        })
    }

    #[test]
    fn reports_only_when_an_end_moves() {
        let (seen, callback) = recorder();
        let c = ObservableCollection::from_vec(vec![1, 2, 3]);
        let handle = c.attach(FirstLast::new(callback)).unwrap();
        c.decorated_items().unwrap();
        c.insert(1, 9).unwrap();
        c.push(4).unwrap();
        c.remove_at(0).unwrap();
        c.clear().unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![(Some(1), Some(3)), (Some(1), Some(4)), (Some(9), Some(4)), (None, None)]
        );
        assert_eq!(c.with_decorator(handle, |t| t.first().copied()).unwrap(), None);
    }

    #[test]
    fn follows_the_sorted_order_when_attached_after_sort() {
        let (seen, callback) = recorder();
        let c = ObservableCollection::from_vec(vec![5, 3]);
        c.attach(Sort::ascending()).unwrap();
        c.attach(FirstLast::new(callback)).unwrap();
        c.decorated_items().unwrap();
        c.push(1).unwrap();
        assert_eq!(*seen.borrow(), vec![(Some(3), Some(5)), (Some(1), Some(5))]);
    }
}
