#![forbid(unsafe_code)]

//! Cache point.
//!
//! Passes every event through unchanged but asks the manager to keep a
//! materialized copy of its output, so later lazy stages and reads start
//! from here instead of recomposing the chain from the source.

use std::any::Any;

use vista_core::{ChangeArgs, Item, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

#[derive(Debug, Clone, Copy, Default)]
pub struct Materialize {
    priority: i32,
}

impl Materialize {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl<T: Item> Decorator<T> for Materialize {
    fn name(&self) -> &'static str {
        "materialize"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_cache_required(&self) -> bool {
        true
    }

    fn decorate<'a>(&'a self, upstream: Items<'a, T>) -> Items<'a, T> {
        upstream
    }

    fn on_reset(&mut self, _cx: &mut DecoratorContext<'_, T>, _items: Option<&[T]>) -> Result<()> {
        Ok(())
    }

    fn on_added(&mut self, _cx: &mut DecoratorContext<'_, T>, item: T, index: usize) -> Result<Flow<(T, usize)>> {
        Ok(Flow::Continue((item, index)))
    }

    fn on_replaced(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        Ok(Flow::Continue((old_item, new_item, index)))
    }

    fn on_moved(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        Ok(Flow::Continue((item, old_index, new_index)))
    }

    fn on_removed(&mut self, _cx: &mut DecoratorContext<'_, T>, item: T, index: usize) -> Result<Flow<(T, usize)>> {
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

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
