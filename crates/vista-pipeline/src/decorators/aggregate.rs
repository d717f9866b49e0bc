#![forbid(unsafe_code)]

//! Observing aggregates.
//!
//! These stages never alter the sequence: every event continues unchanged.
//! They keep a derived value up to date and report it through a callback
//! when it changes. Callbacks run after the collection has released its
//! state; inside a source batch they are held until the batch closes and
//! then fire once with the final value.

use std::any::Any;
use std::fmt;
use std::ops::{Add, Sub};
use std::rc::Rc;

use vista_core::{ChangeArgs, Item, PipelineError, Result};

use crate::decorator::{Decorator, DecoratorContext, Flow, Items};

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Change-only, batch-aware callback delivery.
pub(crate) struct Reporter<V> {
    callback: Option<Rc<dyn Fn(&V)>>,
    last: Option<V>,
    held: bool,
}

impl<V: Clone + PartialEq + 'static> Reporter<V> {
    pub(crate) fn new() -> Self {
        Self {
            callback: None,
            last: None,
            held: false,
        }
    }

    pub(crate) fn set_callback(&mut self, callback: impl Fn(&V) + 'static) {
        self.callback = Some(Rc::new(callback));
    }

    /// Report `value` unless it equals the last report.
    pub(crate) fn report<T: Item>(&mut self, cx: &mut DecoratorContext<'_, T>, value: &V) {
        if self.last.as_ref() == Some(value) {
            return;
        }
        if cx.in_batch() {
            self.held = true;
            return;
        }
        self.fire(cx, value);
    }

    /// Deliver a report held back by an open batch.
    pub(crate) fn flush<T: Item>(&mut self, cx: &mut DecoratorContext<'_, T>, value: &V) {
        if std::mem::take(&mut self.held) && self.last.as_ref() != Some(value) {
            self.fire(cx, value);
        }
    }

    fn fire<T: Item>(&mut self, cx: &mut DecoratorContext<'_, T>, value: &V) {
        self.last = Some(value.clone());
        if let Some(callback) = &self.callback {
            let callback = Rc::clone(callback);
            let value = value.clone();
            cx.defer(move || callback(&value));
        }
    }
}

fn missing(decorator: &'static str, index: usize) -> PipelineError {
    PipelineError::ItemNotFound { decorator, index }
}

/// Move the per-index record at `old_index` to `new_index`.
fn move_value<V>(values: &mut Vec<V>, decorator: &'static str, old_index: usize, new_index: usize) -> Result<()> {
    if old_index >= values.len() || new_index >= values.len() {
        return Err(missing(decorator, old_index));
    }
    let value = values.remove(old_index);
    values.insert(new_index, value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Accumulate
// ---------------------------------------------------------------------------

type Extract<T, A> = Box<dyn Fn(&T) -> A>;
type Combine<A> = Box<dyn Fn(&A, &A) -> A>;

/// Running total maintained with an add/subtract pair.
pub struct Accumulate<T: Item, A: 'static> {
    extract: Extract<T, A>,
    add: Combine<A>,
    sub: Combine<A>,
    zero: A,
    values: Vec<A>,
    total: A,
    reporter: Reporter<A>,
    priority: i32,
}

impl<T: Item, A: fmt::Debug> fmt::Debug for Accumulate<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulate")
            .field("total", &self.total)
            .field("items", &self.values.len())
            .finish()
    }
}

impl<T: Item, A: Clone + PartialEq + 'static> Accumulate<T, A> {
    /// Total of `extract` over all items, combined with `add` and retracted
    /// with `sub`, starting from `zero`.
    pub fn new(
        extract: impl Fn(&T) -> A + 'static,
        add: impl Fn(&A, &A) -> A + 'static,
        sub: impl Fn(&A, &A) -> A + 'static,
        zero: A,
    ) -> Self {
        Self {
            extract: Box::new(extract),
            add: Box::new(add),
            sub: Box::new(sub),
            total: zero.clone(),
            zero,
            values: Vec::new(),
            reporter: Reporter::new(),
            priority: 0,
        }
    }

    /// Call `callback` with the total whenever it changes.
    #[must_use]
    pub fn on_change(mut self, callback: impl Fn(&A) + 'static) -> Self {
        self.reporter.set_callback(callback);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn total(&self) -> &A {
        &self.total
    }

    fn insert(&mut self, index: usize, item: &T) -> Result<()> {
        if index > self.values.len() {
            return Err(missing("accumulate", index));
        }
        let value = (self.extract)(item);
        self.total = (self.add)(&self.total, &value);
        self.values.insert(index, value);
        Ok(())
    }

    fn remove(&mut self, index: usize) -> Result<()> {
        if index >= self.values.len() {
            return Err(missing("accumulate", index));
        }
        let value = self.values.remove(index);
        self.total = (self.sub)(&self.total, &value);
        Ok(())
    }

    fn update(&mut self, index: usize, item: &T) -> Result<()> {
        let value = (self.extract)(item);
        let slot = self.values.get_mut(index).ok_or_else(|| missing("accumulate", index))?;
        let old = std::mem::replace(slot, value.clone());
        self.total = (self.add)(&(self.sub)(&self.total, &old), &value);
        Ok(())
    }
}

impl<T: Item, A> Accumulate<T, A>
where
    A: Copy + PartialEq + Default + Add<Output = A> + Sub<Output = A> + 'static,
{
    /// Sum of `extract` over all items.
    pub fn sum(extract: impl Fn(&T) -> A + 'static) -> Self {
        Self::new(extract, |a, b| *a + *b, |a, b| *a - *b, A::default())
    }
}

impl<T: Item> Accumulate<T, usize> {
    /// Number of items.
    #[must_use]
    pub fn count() -> Self {
        Self::sum(|_| 1)
    }
}

impl<T: Item, A: Clone + PartialEq + 'static> Decorator<T> for Accumulate<T, A> {
    fn name(&self) -> &'static str {
        "accumulate"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn decorate<'a>(&'a self, upstream: Items<'a, T>) -> Items<'a, T> {
        upstream
    }

    fn on_reset(&mut self, cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        self.values = items.unwrap_or_default().iter().map(|item| (self.extract)(item)).collect();
        let mut total = self.zero.clone();
        for value in &self.values {
            total = (self.add)(&total, value);
        }
        self.total = total;
        self.reporter.report(cx, &self.total);
        Ok(())
    }

    fn on_added(&mut self, cx: &mut DecoratorContext<'_, T>, item: T, index: usize) -> Result<Flow<(T, usize)>> {
        self.insert(index, &item)?;
        self.reporter.report(cx, &self.total);
        Ok(Flow::Continue((item, index)))
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        self.update(index, &new_item)?;
        self.reporter.report(cx, &self.total);
        Ok(Flow::Continue((old_item, new_item, index)))
    }

    fn on_moved(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        move_value(&mut self.values, "accumulate", old_index, new_index)?;
        Ok(Flow::Continue((item, old_index, new_index)))
    }

    fn on_removed(&mut self, cx: &mut DecoratorContext<'_, T>, item: T, index: usize) -> Result<Flow<(T, usize)>> {
        self.remove(index)?;
        self.reporter.report(cx, &self.total);
        Ok(Flow::Continue((item, index)))
    }

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        self.update(index, &item)?;
        self.reporter.report(cx, &self.total);
        Ok(Flow::Continue((item, index, args)))
    }

    fn on_batch_end(&mut self, cx: &mut DecoratorContext<'_, T>) -> Result<()> {
        self.reporter.flush(cx, &self.total);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// MinMax
// ---------------------------------------------------------------------------

/// Smallest and largest key, `None` when empty.
pub type Extremes<V> = (Option<V>, Option<V>);

/// Tracks the minimum and maximum of a key over all items.
///
/// Removing or lowering the current extreme rescans the stored keys.
pub struct MinMax<T: Item, V: 'static> {
    key: Extract<T, V>,
    values: Vec<V>,
    extremes: Extremes<V>,
    reporter: Reporter<Extremes<V>>,
    priority: i32,
}

impl<T: Item, V: fmt::Debug> fmt::Debug for MinMax<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinMax")
            .field("min", &self.extremes.0)
            .field("max", &self.extremes.1)
            .finish()
    }
}

impl<T: Item, V: Ord + Clone + 'static> MinMax<T, V> {
    /// Track `key`; `callback` receives `(min, max)` whenever either moves.
    pub fn new(key: impl Fn(&T) -> V + 'static, callback: impl Fn(Option<&V>, Option<&V>) + 'static) -> Self {
        let mut reporter = Reporter::new();
        reporter.set_callback(move |(min, max): &Extremes<V>| callback(min.as_ref(), max.as_ref()));
        Self {
            key: Box::new(key),
            values: Vec::new(),
            extremes: (None, None),
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
    pub fn min(&self) -> Option<&V> {
        self.extremes.0.as_ref()
    }

    #[must_use]
    pub fn max(&self) -> Option<&V> {
        self.extremes.1.as_ref()
    }

    fn rescan(&mut self) {
        self.extremes = (self.values.iter().min().cloned(), self.values.iter().max().cloned());
    }

    fn widen(&mut self, value: &V) {
        let (min, max) = &mut self.extremes;
        if min.as_ref().is_none_or(|m| value < m) {
            *min = Some(value.clone());
        }
        if max.as_ref().is_none_or(|m| value > m) {
            *max = Some(value.clone());
        }
    }

    fn is_extreme(&self, value: &V) -> bool {
        self.extremes.0.as_ref() == Some(value) || self.extremes.1.as_ref() == Some(value)
    }

    fn update(&mut self, index: usize, item: &T) -> Result<()> {
        let value = (self.key)(item);
        let slot = self.values.get_mut(index).ok_or_else(|| missing("min-max", index))?;
        let old = std::mem::replace(slot, value.clone());
        if self.is_extreme(&old) {
            self.rescan();
        } else {
            self.widen(&value);
        }
        Ok(())
    }
}

impl<T: Item, V: Ord + Clone + 'static> Decorator<T> for MinMax<T, V> {
    fn name(&self) -> &'static str {
        "min-max"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn decorate<'a>(&'a self, upstream: Items<'a, T>) -> Items<'a, T> {
        upstream
    }

    fn on_reset(&mut self, cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()> {
        self.values = items.unwrap_or_default().iter().map(|item| (self.key)(item)).collect();
        self.rescan();
        self.reporter.report(cx, &self.extremes);
        Ok(())
    }

    fn on_added(&mut self, cx: &mut DecoratorContext<'_, T>, item: T, index: usize) -> Result<Flow<(T, usize)>> {
        if index > self.values.len() {
            return Err(missing("min-max", index));
        }
        let value = (self.key)(&item);
        self.widen(&value);
        self.values.insert(index, value);
        self.reporter.report(cx, &self.extremes);
        Ok(Flow::Continue((item, index)))
    }

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>> {
        self.update(index, &new_item)?;
        self.reporter.report(cx, &self.extremes);
        Ok(Flow::Continue((old_item, new_item, index)))
    }

    fn on_moved(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>> {
        move_value(&mut self.values, "min-max", old_index, new_index)?;
        Ok(Flow::Continue((item, old_index, new_index)))
    }

    fn on_removed(&mut self, cx: &mut DecoratorContext<'_, T>, item: T, index: usize) -> Result<Flow<(T, usize)>> {
        if index >= self.values.len() {
            return Err(missing("min-max", index));
        }
        let value = self.values.remove(index);
        if self.is_extreme(&value) {
            self.rescan();
        }
        self.reporter.report(cx, &self.extremes);
        Ok(Flow::Continue((item, index)))
    }

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>> {
        self.update(index, &item)?;
        self.reporter.report(cx, &self.extremes);
        Ok(Flow::Continue((item, index, args)))
    }

    fn on_batch_end(&mut self, cx: &mut DecoratorContext<'_, T>) -> Result<()> {
        self.reporter.flush(cx, &self.extremes);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
