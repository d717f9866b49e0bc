#![forbid(unsafe_code)]

//! Map every item through a conversion.
//!
//! Converted values are stored, so a conversion runs once per upstream
//! insert, replace or change. The optional cleanup hook receives every
//! converted value that leaves the output, after the collection has
//! released its state.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use vista_core::{ChangeArgs, Item, PipelineError, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

type ConvertFn<T> = Box<dyn Fn(&T) -> T>;
type CleanupFn<T> = Rc<dyn Fn(&T)>;

pub struct Convert<T: Item> {
    convert: ConvertFn<T>,
    cleanup: Option<CleanupFn<T>>,
    converted: Vec<T>,
    priority: i32,
}

impl<T: Item> fmt::Debug for Convert<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convert")
            .field("converted", &self.converted.len())
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

impl<T: Item> Convert<T> {
    pub fn new(convert: impl Fn(&T) -> T + 'static) -> Self {
        Self {
            convert: Box::new(convert),
            cleanup: None,
            converted: Vec::new(),
            priority: 0,
        }
    }

    /// Run `cleanup` on each converted value that is replaced or removed.
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: impl Fn(&T) + 'static) -> Self {
        self.cleanup = Some(Rc::new(cleanup));
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn retire(&self, cx: &mut DecoratorContext<'_, T>, value: T) {
        if let Some(cleanup) = &self.cleanup {
            let cleanup = Rc::clone(cleanup);
            cx.defer(move || cleanup(&value));
        }
    }

    fn missing(index: usize) -> PipelineError {
        PipelineError::ItemNotFound {
            decorator: "convert",
            index,
        }
    }
}

impl<T: Item> Decorator<T> for Convert<T> {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_lazy(&self) -> bool {
        false
    }

    fn decorate<'a>(&'a self, _upstream: Items<'a, T>) -> Items<'a, T> {
        Box::new(self.converted.iter().cloned())
    }

    fn on_reset(&mut self, cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        for value in std::mem::take(&mut self.converted) {
            self.retire(cx, value);
        }
        self.converted = items
            .unwrap_or_default()
            .iter()
            .map(|item| (self.convert)(item))
            .collect();
        Ok(())
    }

    fn on_added(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        if index > self.converted.len() {
            return Err(Self::missing(index));
        }
        let value = (self.convert)(&item);
        self.converted.insert(index, value.clone());
        Ok(Flow::Continue((value, index)))
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        _old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        let value = (self.convert)(&new_item);
        let slot = self.converted.get_mut(index).ok_or_else(|| Self::missing(index))?;
        let old = std::mem::replace(slot, value.clone());
        self.retire(cx, old.clone());
        Ok(Flow::Continue((old, value, index)))
    }

    fn on_moved(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        _item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        if old_index >= self.converted.len() || new_index >= self.converted.len() {
            return Err(Self::missing(old_index));
        }
        let value = self.converted.remove(old_index);
        self.converted.insert(new_index, value.clone());
        Ok(Flow::Continue((value, old_index, new_index)))
    }

    fn on_removed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        _item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>> {
        if index >= self.converted.len() {
            return Err(Self::missing(index));
        }
        let value = self.converted.remove(index);
        self.retire(cx, value.clone());
        Ok(Flow::Continue((value, index)))
    }

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        let value = (self.convert)(&item);
        let slot = self.converted.get_mut(index).ok_or_else(|| Self::missing(index))?;
        if *slot == value {
            return Ok(Flow::Continue((value, index, args)));
        }
        let old = std::mem::replace(slot, value.clone());
        self.retire(cx, old.clone());
        cx.replaced(old, value, index);
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
    use std::cell::RefCell;
    use vista_core::CollectionChange;

    #[test]
    fn converts_and_translates_events() {
        let c = ObservableCollection::from_vec(vec![1, 2]);
        c.attach(Convert::new(|x: &i32| x * 10)).unwrap();
        let probe = Probe::new(&c);
        assert_eq!(probe.mirror(), vec![10, 20]);
        c.insert(1, 5).unwrap();
        c.move_item(0, 2).unwrap();
        assert_eq!(
            probe.take(),
            vec![
                CollectionChange::Added { item: 50, index: 1 },
                CollectionChange::Moved {
                    item: 10,
                    old_index: 0,
                    new_index: 2
                },
            ]
        );
        probe.check(&c);
    }

    #[test]
    fn cleanup_runs_for_replaced_and_removed_values() {
        let cleaned = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&cleaned);
        let c = ObservableCollection::from_vec(vec![1, 2, 3]);
        c.attach(Convert::new(|x: &i32| -x).with_cleanup(move |v: &i32| sink.borrow_mut().push(*v)))
            .unwrap();
        c.decorated_items().unwrap();
        c.replace(0, 4).unwrap();
        c.remove_at(1).unwrap();
        assert_eq!(*cleaned.borrow(), vec![-1, -2]);
        c.clear().unwrap();
        assert_eq!(*cleaned.borrow(), vec![-1, -2, -4, -3]);
    }
}
