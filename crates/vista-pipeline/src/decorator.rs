#![forbid(unsafe_code)]

//! The decorator contract.
//!
//! A [`Decorator`] is one stage of the chain. It sees every upstream event in
//! its own upstream coordinate space and answers with a [`Flow`]:
//!
//! - `Flow::Continue(..)` forwards the (possibly rewritten) event to the next
//!   stage.
//! - `Flow::Stop` ends propagation; whatever the stage wants downstream to
//!   see was emitted through the [`DecoratorContext`].
//!
//! Emitted events are replayed into the next stage in emission order, before
//! a continued event. A stage that turns one upstream event into several
//! downstream ones therefore emits all of them and returns `Stop`, or emits
//! the leading ones and continues with the last.
//!
//! # Lifecycle
//!
//! Detached, then initializing (one `on_reset` with the full upstream), then
//! active (incremental events), then detached again (`on_reset(None)` and
//! `on_detached`).

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Weak;

use smallvec::SmallVec;
use vista_core::{ChangeArgs, CollectionChange, CollectionId, DecoratorId, Item, PipelineError, Result};

use crate::collection::{ObservableCollection, Shared};
use crate::manager::{Stage, compose};

/// Lazily composed, restartable view over a sequence.
pub type Items<'a, T> = Box<dyn Iterator<Item = T> + 'a>;

/// Callback run after the collection releases its state.
pub(crate) type Deferred = Box<dyn FnOnce()>;

/// Outcome of translating one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<E> {
    /// Forward the rewritten event to the next stage.
    Continue(E),
    /// The stage absorbed the event or emitted its replacement itself.
    Stop,
}

impl<E> Flow<E> {
    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }

    pub fn map<F, U>(self, f: F) -> Flow<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Self::Continue(e) => Flow::Continue(f(e)),
            Self::Stop => Flow::Stop,
        }
    }
}

/// One transformation stage of a decorator chain.
pub trait Decorator<T: Item>: 'static {
    /// Short name used in logs and lookup errors.
    fn name(&self) -> &'static str;

    /// Chain position; lower runs first, ties keep attach order.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether the output is derived from upstream on every read rather than
    /// from state the stage keeps itself.
    ///
    /// A non-lazy stage must ignore `upstream` in [`Self::decorate`]; reads
    /// then start at the last such stage instead of at the source.
    fn is_lazy(&self) -> bool {
        true
    }

    /// Whether the output contains items upstream never produced.
    ///
    /// Only these stages are asked to [`Self::lookup_indexes`] a changed
    /// item that is not in the source.
    fn has_additional_items(&self) -> bool {
        false
    }

    /// Whether the manager should keep a materialized copy of the output.
    ///
    /// Stages that answer one upstream event with several downstream events
    /// must return true so stages below them read a sequence consistent
    /// with the events they have seen so far.
    fn is_cache_required(&self) -> bool {
        false
    }

    /// Compose this stage's output over `upstream`.
    fn decorate<'a>(&'a self, upstream: Items<'a, T>) -> Items<'a, T>;

    /// Rebuild state from `items`; `None` means cleared or detached.
    fn on_reset(&mut self, cx: &mut DecoratorContext<'_, T>, items: Option<&[T]>) -> Result<()>;

    fn on_added(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>>;

    fn on_replaced(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        old_item: T,
        new_item: T,
        index: usize,
    ) -> Result<Flow<(T, T, usize)>>;

    fn on_moved(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        old_index: usize,
        new_index: usize,
    ) -> Result<Flow<(T, usize, usize)>>;

    fn on_removed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
    ) -> Result<Flow<(T, usize)>>;

    fn on_changed(
        &mut self,
        cx: &mut DecoratorContext<'_, T>,
        item: T,
        index: usize,
        args: ChangeArgs,
    ) -> Result<Flow<(T, usize, ChangeArgs)>>;

    /// A nested collection this stage linked to changed.
    fn on_nested(
        &mut self,
        _cx: &mut DecoratorContext<'_, T>,
        _child: CollectionId,
        _change: &CollectionChange<T>,
    ) -> Result<()> {
        Ok(())
    }

    /// The outermost source batch closed.
    fn on_batch_end(&mut self, _cx: &mut DecoratorContext<'_, T>) -> Result<()> {
        Ok(())
    }

    /// Release external links; called after `on_reset(None)` on detach.
    fn on_detached(&mut self, _cx: &mut DecoratorContext<'_, T>) {}

    /// Output positions holding `item` that upstream cannot locate, such as
    /// injected headers or nested children.
    fn lookup_indexes(&self, _item: &T) -> SmallVec<[usize; 2]> {
        SmallVec::new()
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Route one event to the matching handler.
pub(crate) fn translate<T: Item>(
    decorator: &mut dyn Decorator<T>,
    cx: &mut DecoratorContext<'_, T>,
    change: CollectionChange<T>,
) -> Result<Flow<CollectionChange<T>>> {
    Ok(match change {
        CollectionChange::Added { item, index } => decorator
            .on_added(cx, item, index)?
            .map(|(item, index)| CollectionChange::Added { item, index }),
        CollectionChange::Replaced {
            old_item,
            new_item,
            index,
        } => decorator.on_replaced(cx, old_item, new_item, index)?.map(
            |(old_item, new_item, index)| CollectionChange::Replaced {
                old_item,
                new_item,
                index,
            },
        ),
        CollectionChange::Moved {
            item,
            old_index,
            new_index,
        } => decorator.on_moved(cx, item, old_index, new_index)?.map(
            |(item, old_index, new_index)| CollectionChange::Moved {
                item,
                old_index,
                new_index,
            },
        ),
        CollectionChange::Removed { item, index } => decorator
            .on_removed(cx, item, index)?
            .map(|(item, index)| CollectionChange::Removed { item, index }),
        CollectionChange::Changed { item, index, args } => decorator
            .on_changed(cx, item, index, args)?
            .map(|(item, index, args)| CollectionChange::Changed { item, index, args }),
        CollectionChange::Reset { .. } => {
            return Err(PipelineError::InvariantViolation(
                "reset events are not routed through handlers".into(),
            ));
        }
    })
}

/// What a stage did besides its return value.
pub(crate) struct Effects<T> {
    pub(crate) emitted: Vec<CollectionChange<T>>,
    pub(crate) reset: bool,
    pub(crate) deferred: Vec<Deferred>,
}

/// Per-call view a stage gets of its surroundings.
///
/// Upstream reads reflect every event the stage has been handed so far.
pub struct DecoratorContext<'a, T: Item> {
    source: &'a [T],
    before: &'a [Stage<T>],
    owner: &'a Weak<Shared<T>>,
    stage: DecoratorId,
    in_batch: bool,
    emitted: Vec<CollectionChange<T>>,
    reset: bool,
    deferred: Vec<Deferred>,
}

impl<T: Item> fmt::Debug for DecoratorContext<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorContext")
            .field("stage", &self.stage)
            .field("upstream_stages", &self.before.len())
            .field("in_batch", &self.in_batch)
            .field("emitted", &self.emitted.len())
            .field("reset", &self.reset)
            .finish()
    }
}

impl<'a, T: Item> DecoratorContext<'a, T> {
    pub(crate) fn new(
        source: &'a [T],
        before: &'a [Stage<T>],
        owner: &'a Weak<Shared<T>>,
        stage: DecoratorId,
        in_batch: bool,
    ) -> Self {
        Self {
            source,
            before,
            owner,
            stage,
            in_batch,
            emitted: Vec::new(),
            reset: false,
            deferred: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> Effects<T> {
        Effects {
            emitted: self.emitted,
            reset: self.reset,
            deferred: self.deferred,
        }
    }

    /// Id of the stage being called.
    #[must_use]
    pub fn stage(&self) -> DecoratorId {
        self.stage
    }

    /// Whether the owner has a source batch open.
    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.in_batch
    }

    /// This stage's upstream sequence.
    #[must_use]
    pub fn upstream(&self) -> Items<'_, T> {
        compose(self.source, self.before)
    }

    #[must_use]
    pub fn upstream_len(&self) -> usize {
        match self.before.last() {
            None => self.source.len(),
            Some(stage) => match &stage.cache {
                Some(cache) => cache.len(),
                None => self.upstream().count(),
            },
        }
    }

    /// Upstream item at `index`.
    pub fn upstream_item(&self, index: usize) -> Result<T> {
        let found = match self.before.last() {
            None => self.source.get(index).cloned(),
            Some(stage) => match &stage.cache {
                Some(cache) => cache.get(index).cloned(),
                None => self.upstream().nth(index),
            },
        };
        found.ok_or_else(|| PipelineError::IndexOutOfRange {
            index,
            len: self.upstream_len(),
        })
    }

    pub fn added(&mut self, item: T, index: usize) {
        self.emitted.push(CollectionChange::Added { item, index });
    }

    pub fn removed(&mut self, item: T, index: usize) {
        self.emitted.push(CollectionChange::Removed { item, index });
    }

    pub fn replaced(&mut self, old_item: T, new_item: T, index: usize) {
        self.emitted.push(CollectionChange::Replaced {
            old_item,
            new_item,
            index,
        });
    }

    pub fn moved(&mut self, item: T, old_index: usize, new_index: usize) {
        self.emitted.push(CollectionChange::Moved {
            item,
            old_index,
            new_index,
        });
    }

    pub fn changed(&mut self, item: T, index: usize, args: ChangeArgs) {
        self.emitted.push(CollectionChange::Changed { item, index, args });
    }

    /// Ask the manager to rebuild this stage and everything after it.
    pub fn reset(&mut self) {
        self.reset = true;
    }

    /// Run `f` once the collection has released its state.
    pub fn defer(&mut self, f: impl FnOnce() + 'static) {
        self.deferred.push(Box::new(f));
    }

    /// Route `child`'s decorated changes into this stage's `on_nested`.
    ///
    /// The child adopts the owner's lock while linked.
    pub fn link_nested(&self, child: &ObservableCollection<T>) -> Result<()> {
        let Some(owner) = self.owner.upgrade() else {
            return Ok(());
        };
        child.link_parent(&owner, self.stage)
    }

    /// Undo one [`Self::link_nested`].
    pub fn unlink_nested(&self, child: &ObservableCollection<T>) {
        child.unlink_parent(self.owner, self.stage);
    }
}

/// Typed handle to an attached decorator.
pub struct DecoratorHandle<D> {
    id: DecoratorId,
    _marker: PhantomData<fn() -> D>,
}

impl<D> DecoratorHandle<D> {
    pub(crate) fn new(id: DecoratorId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn id(&self) -> DecoratorId {
        self.id
    }
}

impl<D> Clone for DecoratorHandle<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for DecoratorHandle<D> {}

impl<D> fmt::Debug for DecoratorHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DecoratorHandle").field(&self.id).finish()
    }
}

impl<D> PartialEq for DecoratorHandle<D> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<D> Eq for DecoratorHandle<D> {}
