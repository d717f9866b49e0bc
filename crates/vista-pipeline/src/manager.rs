#![forbid(unsafe_code)]

//! Ordered decorator chain and its dispatcher.
//!
//! The [`DecoratorManager`] owns every stage attached to one collection,
//! keeps stages sorted by priority, and walks each source event through them.
//!
//! # Dispatch
//!
//! A walk starts at some stage (0 for source events, `s + 1` for events a
//! stage emits or an item located in stage `s`'s output) and visits stages
//! in order. For each stage, emitted events are replayed from the next
//! stage in emission order, then a continued event moves on. Cached outputs
//! are patched per outgoing event, so a stage reading its upstream always
//! sees a sequence consistent with the events it has received.
//!
//! # Reads
//!
//! A read starts at the last stage that can produce its output without its
//! upstream: one with a manager cache, or a non-lazy stage that keeps its
//! own output. Only the stages after it are composed.
//!
//! # Invariants
//!
//! 1. Stages are sorted by priority; equal priorities keep attach order.
//! 2. The version increments exactly once per structural reset.
//! 3. A walk that observes a version change abandons its remaining work;
//!    the reset that bumped the version already produced the final
//!    decorated sequence.
//! 4. Initialization happens once, before the first event or read.
//! 5. Disposal retires stages in reverse attach order.
//!
//! # Failure Modes
//!
//! - A stage error propagates out of the walk unchanged; stages already
//!   visited keep their updated state.
//! - A stage emitting changes from `on_reset` is an invariant violation.
//! - A cache patch that does not fit the cache is an invariant violation.

use std::fmt;
use std::rc::Weak;

use tracing::{debug, debug_span, trace, warn};
use vista_core::{ChangeArgs, CollectionChange, CollectionId, DecoratorId, Item, PipelineError, Result};

use crate::collection::Shared;
use crate::decorator::{Decorator, DecoratorContext, Deferred, Effects, Flow, Items, translate};

/// One attached decorator plus its materialized output.
pub(crate) struct Stage<T: Item> {
    pub(crate) id: DecoratorId,
    pub(crate) priority: i32,
    pub(crate) decorator: Box<dyn Decorator<T>>,
    pub(crate) cache: Option<Vec<T>>,
    /// Attach sequence number, for disposal order.
    attached: u64,
}

impl<T: Item> Stage<T> {
    /// Whether the output can be produced without reading upstream.
    fn is_self_contained(&self) -> bool {
        self.cache.is_some() || !self.decorator.is_lazy()
    }

    fn own_output(&self) -> Items<'_, T> {
        match &self.cache {
            Some(cache) => Box::new(cache.iter().cloned()),
            None => self.decorator.decorate(Box::new(std::iter::empty())),
        }
    }
}

/// Compose `stages` over `source`, starting from the last self-contained
/// stage.
pub(crate) fn compose<'a, T: Item>(source: &'a [T], stages: &'a [Stage<T>]) -> Items<'a, T> {
    let start = stages.iter().rposition(Stage::is_self_contained);
    let (mut items, rest): (Items<'a, T>, &'a [Stage<T>]) = match start {
        Some(k) => (stages[k].own_output(), &stages[k + 1..]),
        None => (Box::new(source.iter().cloned()), stages),
    };
    for stage in rest {
        items = stage.decorator.decorate(items);
    }
    items
}

/// Accumulates everything one public operation produces.
pub(crate) struct Dispatch<'a, T: Item> {
    pub(crate) owner: &'a Weak<Shared<T>>,
    pub(crate) in_batch: bool,
    /// Decorated-space changes in delivery order.
    pub(crate) changes: Vec<CollectionChange<T>>,
    pub(crate) deferred: Vec<Deferred>,
    /// Some stage split one event into several.
    pub(crate) split: bool,
}

impl<'a, T: Item> Dispatch<'a, T> {
    pub(crate) fn new(owner: &'a Weak<Shared<T>>, in_batch: bool) -> Self {
        Self {
            owner,
            in_batch,
            changes: Vec::new(),
            deferred: Vec::new(),
            split: false,
        }
    }
}

/// Ordered decorator chain of one collection.
pub(crate) struct DecoratorManager<T: Item> {
    stages: Vec<Stage<T>>,
    version: u64,
    initialized: bool,
    decorator_batch: bool,
    attach_seq: u64,
}

impl<T: Item> fmt::Debug for DecoratorManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.decorator.name()).collect();
        f.debug_struct("DecoratorManager")
            .field("stages", &names)
            .field("version", &self.version)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl<T: Item> Default for DecoratorManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> DecoratorManager<T> {
    pub(crate) fn new() -> Self {
        Self {
            stages: Vec::new(),
            version: 0,
            initialized: false,
            decorator_batch: false,
            attach_seq: 0,
        }
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn position(&self, id: DecoratorId) -> Option<usize> {
        self.stages.iter().position(|s| s.id == id)
    }

    pub(crate) fn decorator(&self, id: DecoratorId) -> Option<&dyn Decorator<T>> {
        self.stages
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.decorator.as_ref())
    }

    pub(crate) fn decorator_mut(&mut self, id: DecoratorId) -> Option<&mut dyn Decorator<T>> {
        self.stages
            .iter_mut()
            .find(|s| s.id == id)
            .map(|s| s.decorator.as_mut())
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.decorator.name()).collect()
    }

    /// Insert a stage after every stage of lower or equal priority.
    pub(crate) fn attach(
        &mut self,
        source: &[T],
        id: DecoratorId,
        decorator: Box<dyn Decorator<T>>,
        d: &mut Dispatch<'_, T>,
    ) -> Result<usize> {
        let priority = decorator.priority();
        let at = self.stages.partition_point(|s| s.priority <= priority);
        debug!(name = decorator.name(), %id, at, priority, "attaching decorator");
        self.attach_seq += 1;
        self.stages.insert(
            at,
            Stage {
                id,
                priority,
                decorator,
                cache: None,
                attached: self.attach_seq,
            },
        );
        if self.initialized {
            self.reset_from(source, at, d)?;
        }
        Ok(at)
    }

    /// Remove a stage, retracting whatever it contributed downstream.
    pub(crate) fn detach(
        &mut self,
        source: &[T],
        id: DecoratorId,
        d: &mut Dispatch<'_, T>,
    ) -> Result<Box<dyn Decorator<T>>> {
        let at = self
            .position(id)
            .ok_or(PipelineError::DecoratorNotFound(id))?;
        debug!(name = self.stages[at].decorator.name(), %id, at, "detaching decorator");
        self.retire(source, at, d)?;
        let stage = self.stages.remove(at);
        if self.initialized {
            self.reset_from(source, at, d)?;
        }
        Ok(stage.decorator)
    }

    /// Detach every stage in reverse attach order.
    pub(crate) fn dispose(&mut self, source: &[T], d: &mut Dispatch<'_, T>) -> Result<()> {
        let mut order: Vec<usize> = (0..self.stages.len()).collect();
        order.sort_unstable_by_key(|&at| std::cmp::Reverse(self.stages[at].attached));
        let mut first_err = None;
        for at in order {
            if let Err(err) = self.retire(source, at, d) {
                warn!(error = %err, "decorator failed to detach cleanly");
                first_err.get_or_insert(err);
            }
        }
        self.stages.clear();
        self.initialized = false;
        self.version += 1;
        first_err.map_or(Ok(()), Err)
    }

    fn retire(&mut self, source: &[T], at: usize, d: &mut Dispatch<'_, T>) -> Result<()> {
        let (before, rest) = self.stages.split_at_mut(at);
        let stage = &mut rest[0];
        let mut cx = DecoratorContext::new(source, before, d.owner, stage.id, d.in_batch);
        let cleared = if self.initialized {
            stage.decorator.on_reset(&mut cx, None)
        } else {
            Ok(())
        };
        stage.decorator.on_detached(&mut cx);
        stage.cache = None;
        d.deferred.extend(cx.finish().deferred);
        cleared
    }

    /// Run the initial reset if it has not happened yet.
    pub(crate) fn ensure_initialized(&mut self, source: &[T], d: &mut Dispatch<'_, T>) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let _span = debug_span!("vista.init", stages = self.stages.len()).entered();
        self.rebuild(source, 0, d)?;
        self.initialized = true;
        self.version += 1;
        Ok(())
    }

    /// Rebuild stage `from` onward and emit one terminal `Reset`.
    pub(crate) fn reset_from(&mut self, source: &[T], from: usize, d: &mut Dispatch<'_, T>) -> Result<()> {
        let _span = debug_span!("vista.reset", from, stages = self.stages.len()).entered();
        let items = self.rebuild(source, from, d)?;
        self.initialized = true;
        self.version += 1;
        d.changes.clear();
        d.changes.push(CollectionChange::Reset { items });
        Ok(())
    }

    /// Feed each stage from `from` on its freshly materialized upstream.
    fn rebuild(&mut self, source: &[T], from: usize, d: &mut Dispatch<'_, T>) -> Result<Vec<T>> {
        let mut upstream: Vec<T> = compose(source, &self.stages[..from]).collect();
        for k in from..self.stages.len() {
            let (before, rest) = self.stages.split_at_mut(k);
            let stage = &mut rest[0];
            let mut cx = DecoratorContext::new(source, before, d.owner, stage.id, d.in_batch);
            stage.decorator.on_reset(&mut cx, Some(&upstream))?;
            let effects = cx.finish();
            d.deferred.extend(effects.deferred);
            if !effects.emitted.is_empty() || effects.reset {
                return Err(PipelineError::InvariantViolation(format!(
                    "{} changed the sequence while resetting",
                    stage.decorator.name()
                )));
            }
            let output: Vec<T> = stage
                .decorator
                .decorate(Box::new(upstream.iter().cloned()))
                .collect();
            trace!(stage = stage.decorator.name(), len = output.len(), "stage rebuilt");
            stage.cache = stage.decorator.is_cache_required().then(|| output.clone());
            upstream = output;
        }
        Ok(upstream)
    }

    /// Walk a source-space event through the whole chain.
    pub(crate) fn dispatch(
        &mut self,
        source: &[T],
        change: CollectionChange<T>,
        d: &mut Dispatch<'_, T>,
    ) -> Result<()> {
        let _span = debug_span!("vista.dispatch", kind = %change.kind(), stages = self.stages.len())
            .entered();
        self.walk(source, 0, change, d)
    }

    fn walk(
        &mut self,
        source: &[T],
        start: usize,
        change: CollectionChange<T>,
        d: &mut Dispatch<'_, T>,
    ) -> Result<()> {
        let version = self.version;
        let mut current = change;
        let mut i = start;
        while i < self.stages.len() {
            let (flow, effects) = {
                let (before, rest) = self.stages.split_at_mut(i);
                let stage = &mut rest[0];
                let mut cx = DecoratorContext::new(source, before, d.owner, stage.id, d.in_batch);
                let flow = translate(stage.decorator.as_mut(), &mut cx, current)?;
                (flow, cx.finish())
            };
            match self.settle(source, i, effects, flow, d)? {
                Some(next) if self.version == version => {
                    current = next;
                    i += 1;
                }
                _ => return Ok(()),
            }
        }
        d.changes.push(current);
        Ok(())
    }

    /// Replay a stage's emitted events below it and hand back the continued
    /// event, if the walk should go on.
    fn settle(
        &mut self,
        source: &[T],
        i: usize,
        effects: Effects<T>,
        flow: Flow<CollectionChange<T>>,
        d: &mut Dispatch<'_, T>,
    ) -> Result<Option<CollectionChange<T>>> {
        d.deferred.extend(effects.deferred);
        if effects.reset {
            debug!(stage = self.stages[i].decorator.name(), "stage requested reset");
            self.reset_from(source, i, d)?;
            return Ok(None);
        }
        let version = self.version;
        let fan_out = effects.emitted.len() + usize::from(flow.is_continue()) > 1;
        let opened = fan_out && !self.decorator_batch;
        if opened {
            self.decorator_batch = true;
            d.split = true;
        }
        let replayed = self.replay(source, i, effects.emitted, version, d);
        if opened {
            self.decorator_batch = false;
        }
        replayed?;
        if self.version != version {
            return Ok(None);
        }
        match flow {
            Flow::Stop => Ok(None),
            Flow::Continue(next) => {
                self.patch_cache(i, &next)?;
                Ok(Some(next))
            }
        }
    }

    fn replay(
        &mut self,
        source: &[T],
        i: usize,
        emitted: Vec<CollectionChange<T>>,
        version: u64,
        d: &mut Dispatch<'_, T>,
    ) -> Result<()> {
        for change in emitted {
            self.patch_cache(i, &change)?;
            self.walk(source, i + 1, change, d)?;
            if self.version != version {
                warn!(
                    stage = self.stages.get(i).map(|s| s.decorator.name()),
                    "chain reset mid-walk; dropping remaining emitted changes"
                );
                break;
            }
        }
        Ok(())
    }

    fn patch_cache(&mut self, i: usize, change: &CollectionChange<T>) -> Result<()> {
        let stage = &mut self.stages[i];
        let name = stage.decorator.name();
        let Some(cache) = stage.cache.as_mut() else {
            return Ok(());
        };
        let patched = match change {
            CollectionChange::Changed { item, index, .. } => match cache.get_mut(*index) {
                Some(slot) => {
                    *slot = item.clone();
                    Ok(())
                }
                None => Err(PipelineError::IndexOutOfRange {
                    index: *index,
                    len: cache.len(),
                }),
            },
            other => other.apply_to(cache),
        };
        patched.map_err(|err| PipelineError::InvariantViolation(format!("{name} cache out of sync: {err}")))
    }

    /// Deliver a nested collection's change to the stage that linked it.
    pub(crate) fn on_nested(
        &mut self,
        source: &[T],
        stage_id: DecoratorId,
        child: CollectionId,
        change: &CollectionChange<T>,
        d: &mut Dispatch<'_, T>,
    ) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        let Some(i) = self.position(stage_id) else {
            trace!(%stage_id, %child, "nested change for a detached stage");
            return Ok(());
        };
        let _span = debug_span!("vista.nested", %child, kind = %change.kind()).entered();
        let effects = {
            let (before, rest) = self.stages.split_at_mut(i);
            let stage = &mut rest[0];
            let mut cx = DecoratorContext::new(source, before, d.owner, stage.id, d.in_batch);
            stage.decorator.on_nested(&mut cx, child, change)?;
            cx.finish()
        };
        self.settle(source, i, effects, Flow::Stop, d)?;
        Ok(())
    }

    /// Notify every stage that the outermost source batch closed.
    pub(crate) fn on_batch_end(&mut self, source: &[T], d: &mut Dispatch<'_, T>) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        for i in 0..self.stages.len() {
            let effects = {
                let (before, rest) = self.stages.split_at_mut(i);
                let stage = &mut rest[0];
                let mut cx = DecoratorContext::new(source, before, d.owner, stage.id, d.in_batch);
                stage.decorator.on_batch_end(&mut cx)?;
                cx.finish()
            };
            self.settle(source, i, effects, Flow::Stop, d)?;
        }
        Ok(())
    }

    /// Find where a changed item lives: `(first stage to visit, index)`.
    ///
    /// Source positions are found by linear scan; items only present in a
    /// stage's output are found through the lookup of a stage that adds
    /// items of its own.
    pub(crate) fn locate(&self, source: &[T], item: &T) -> Vec<(usize, usize)> {
        let hits: Vec<(usize, usize)> = source
            .iter()
            .enumerate()
            .filter(|(_, x)| *x == item)
            .map(|(i, _)| (0, i))
            .collect();
        if !hits.is_empty() {
            return hits;
        }
        for (s, stage) in self.stages.iter().enumerate() {
            if !stage.decorator.has_additional_items() {
                continue;
            }
            let found = stage.decorator.lookup_indexes(item);
            if !found.is_empty() {
                return found.into_iter().map(|i| (s + 1, i)).collect();
            }
        }
        Vec::new()
    }

    /// Walk a `Changed` event from the stage after the one that owns it.
    pub(crate) fn item_changed(
        &mut self,
        source: &[T],
        start: usize,
        item: T,
        index: usize,
        args: ChangeArgs,
        d: &mut Dispatch<'_, T>,
    ) -> Result<()> {
        let change = CollectionChange::Changed { item, index, args };
        if start == 0 {
            return self.dispatch(source, change, d);
        }
        self.patch_cache(start - 1, &change)?;
        self.walk(source, start, change, d)
    }

    /// Composed output of the whole chain.
    pub(crate) fn decorate<'a>(&'a self, source: &'a [T]) -> Items<'a, T> {
        compose(source, &self.stages)
    }

    /// Output of the chain up to and including stage `at`.
    pub(crate) fn stage_output(&self, source: &[T], at: usize) -> Vec<T> {
        let end = (at + 1).min(self.stages.len());
        compose(source, &self.stages[..end]).collect()
    }

    pub(crate) fn output(&self, source: &[T]) -> Vec<T> {
        match self.stages.last().and_then(|s| s.cache.as_ref()) {
            Some(cache) => cache.clone(),
            None => self.decorate(source).collect(),
        }
    }

    pub(crate) fn output_len(&self, source: &[T]) -> usize {
        match self.stages.last() {
            None => source.len(),
            Some(stage) => match &stage.cache {
                Some(cache) => cache.len(),
                None => self.decorate(source).count(),
            },
        }
    }
}
