#![forbid(unsafe_code)]

//! Observable source collection with an attached decorator chain.
//!
//! [`ObservableCollection`] is a cheap, cloneable handle (`Rc` inside). It
//! owns the source items, the [`DecoratorManager`](crate::manager) and two
//! listener sets: one for the raw source sequence and one for the decorated
//! output.
//!
//! # Operation protocol
//!
//! Every public mutation:
//!
//! 1. refuses to start while another mutation is being dispatched,
//! 2. holds the collection lock for its full duration,
//! 3. initializes the chain before touching the source,
//! 4. mutates the source and walks the event through the chain,
//! 5. releases the state, forwards decorated changes to parents that nest
//!    this collection, then queues notifications and runs deferred
//!    callbacks.
//!
//! Notifications are drained from a FIFO outbox, so a listener that mutates
//! the collection sees its own change delivered after the current one.
//!
//! # Invariants
//!
//! 1. Listeners never observe the collection mid-dispatch.
//! 2. Inside a source batch, listeners receive one begin, one `on_changes`
//!    and one end, regardless of how many mutations happened.
//! 3. Source listeners never see decorator-side batch markers.
//!
//! # Failure Modes
//!
//! | Situation | Result |
//! |---|---|
//! | Mutation from inside a dispatch (predicate, comparator, ...) | inner call gets [`PipelineError::Reentrant`]; the outer call fails with [`PipelineError::InvariantViolation`] |
//! | Decorator error mid-walk | error returned, no notifications, collection marked faulted |
//! | Any call after [`ObservableCollection::dispose`] | [`PipelineError::Disposed`] |
//! | Plain source reads (`len`, `get`, `items`) from inside a dispatch | panic: the state is mutably borrowed |
//!
//! A faulted collection keeps working; [`ObservableCollection::reset`]
//! clears the flag.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, debug_span, warn};
use vista_core::{
    BatchCounters, BatchKind, ChangeArgs, CollectionChange, CollectionId, CollectionLock,
    DecoratorId, Item, Operation, PipelineConfig, PipelineError, Result,
};
use web_time::Instant;

use crate::decorator::{Decorator, DecoratorHandle, Deferred, Items};
use crate::item_changed::{ItemChangeQueue, ItemChangeTimer};
use crate::listener::{ChangeListener, ListenerSet, Notice, Subscription};
use crate::manager::{DecoratorManager, Dispatch};

pub(crate) struct State<T: Item> {
    items: Vec<T>,
    manager: DecoratorManager<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Source,
    Decorated,
}

/// Changes held back while a source batch is open.
struct Buffered<T> {
    source: Vec<CollectionChange<T>>,
    decorated: Vec<CollectionChange<T>>,
}

impl<T> Default for Buffered<T> {
    fn default() -> Self {
        Self {
            source: Vec::new(),
            decorated: Vec::new(),
        }
    }
}

/// A stage in another collection that nests this one.
struct ParentLink<T: Item> {
    parent: Weak<Shared<T>>,
    stage: DecoratorId,
    refs: usize,
}

pub(crate) struct Shared<T: Item> {
    id: CollectionId,
    config: PipelineConfig,
    weak_self: Weak<Shared<T>>,
    state: RefCell<State<T>>,
    own_lock: CollectionLock,
    lock: RefCell<CollectionLock>,
    active: Cell<Option<Operation>>,
    reentered: Cell<bool>,
    faulted: Cell<bool>,
    disposed: Cell<bool>,
    batches: Cell<BatchCounters>,
    buffered: RefCell<Buffered<T>>,
    outbox: RefCell<VecDeque<(Target, Notice<T>)>>,
    delivering: Cell<bool>,
    listeners: ListenerSet<T>,
    source_listeners: ListenerSet<T>,
    parents: RefCell<Vec<ParentLink<T>>>,
    item_changes: RefCell<ItemChangeQueue<T>>,
}

/// Shared handle to an observable sequence and its decorated view.
pub struct ObservableCollection<T: Item> {
    shared: Rc<Shared<T>>,
}

impl<T: Item> Clone for ObservableCollection<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

/// Handles compare by identity.
impl<T: Item> PartialEq for ObservableCollection<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Item> fmt::Debug for ObservableCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ObservableCollection");
        s.field("id", &self.shared.id);
        match self.shared.state.try_borrow() {
            Ok(state) => s.field("len", &state.items.len()),
            Err(_) => s.field("len", &"<busy>"),
        };
        s.field("disposed", &self.shared.disposed.get()).finish()
    }
}

impl<T: Item> Default for ObservableCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> ObservableCollection<T> {
    /// Empty collection with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec_with_config(Vec::new(), PipelineConfig::default())
    }

    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        Self::from_vec_with_config(Vec::new(), config)
    }

    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        Self::from_vec_with_config(items, PipelineConfig::default())
    }

    #[must_use]
    pub fn from_vec_with_config(mut items: Vec<T>, config: PipelineConfig) -> Self {
        items.reserve(config.initial_capacity.saturating_sub(items.len()));
        let own_lock = CollectionLock::new();
        let shared = Rc::new_cyclic(|weak_self| Shared {
            id: CollectionId::next(),
            config,
            weak_self: Weak::clone(weak_self),
            state: RefCell::new(State {
                items,
                manager: DecoratorManager::new(),
            }),
            lock: RefCell::new(own_lock.clone()),
            own_lock,
            active: Cell::new(None),
            reentered: Cell::new(false),
            faulted: Cell::new(false),
            disposed: Cell::new(false),
            batches: Cell::new(BatchCounters::new()),
            buffered: RefCell::new(Buffered::default()),
            outbox: RefCell::new(VecDeque::new()),
            delivering: Cell::new(false),
            listeners: ListenerSet::default(),
            source_listeners: ListenerSet::default(),
            parents: RefCell::new(Vec::new()),
            item_changes: RefCell::new(ItemChangeQueue::default()),
        });
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Rc<Shared<T>>) -> Self {
        Self { shared }
    }

    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.shared.id
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// The lock mutations hold; a nested collection reports its parent's.
    #[must_use]
    pub fn lock(&self) -> CollectionLock {
        self.shared.lock.borrow().clone()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.get()
    }

    /// Whether a failed operation left the decorated view untrustworthy.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.shared.faulted.get()
    }

    /// Whether a batch of `kind` is currently open.
    #[must_use]
    pub fn is_batch_active(&self, kind: BatchKind) -> bool {
        self.shared.batches.get().is_active(kind)
    }

    // ------------------------------------------------------------------
    // Source reads
    // ------------------------------------------------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.shared.state.borrow().items.get(index).cloned()
    }

    /// Snapshot of the source sequence.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.shared.state.borrow().items.clone()
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.shared.state.borrow().items.contains(item)
    }

    // ------------------------------------------------------------------
    // Decorated reads
    // ------------------------------------------------------------------

    /// Snapshot of the decorated output.
    pub fn decorated_items(&self) -> Result<Vec<T>> {
        self.read_decorated(|items, manager| manager.output(items))
    }

    pub fn decorated_len(&self) -> Result<usize> {
        self.read_decorated(|items, manager| manager.output_len(items))
    }

    /// Run `f` over the lazily composed output without materializing it.
    pub fn with_decorated<R>(&self, f: impl FnOnce(Items<'_, T>) -> R) -> Result<R> {
        self.read_decorated(|items, manager| f(manager.decorate(items)))
    }

    /// Output of the chain up to and including `handle`'s stage.
    pub fn stage_output<D>(&self, handle: DecoratorHandle<D>) -> Result<Vec<T>> {
        let id = handle.id();
        self.read_decorated(|items, manager| {
            manager
                .position(id)
                .map(|at| manager.stage_output(items, at))
                .ok_or(PipelineError::DecoratorNotFound(id))
        })?
    }

    /// Structural version; bumps on every chain reset.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.state.borrow().manager.version()
    }

    /// Names of attached stages in chain order.
    #[must_use]
    pub fn decorator_names(&self) -> Vec<&'static str> {
        self.shared.state.borrow().manager.names()
    }

    /// Borrow an attached decorator.
    pub fn with_decorator<D, R>(&self, handle: DecoratorHandle<D>, f: impl FnOnce(&D) -> R) -> Result<R>
    where
        D: Decorator<T>,
    {
        let id = handle.id();
        self.read_decorated(|_, manager| {
            let decorator = manager
                .decorator(id)
                .ok_or(PipelineError::DecoratorNotFound(id))?;
            decorator
                .as_any()
                .downcast_ref::<D>()
                .map(f)
                .ok_or(PipelineError::DecoratorTypeMismatch(id))
        })?
    }

    fn read_decorated<R>(&self, f: impl FnOnce(&[T], &DecoratorManager<T>) -> R) -> Result<R> {
        let s = &self.shared;
        if s.disposed.get() {
            return Err(PipelineError::Disposed);
        }
        let mut deferred: Vec<Deferred> = Vec::new();
        {
            let mut state = s.state.try_borrow_mut().map_err(|_| self.busy(Operation::Read))?;
            let State { items, manager } = &mut *state;
            if !manager.is_initialized() {
                let lock = s.lock.borrow().clone();
                let _guard = lock.acquire();
                let mut d = Dispatch::new(&s.weak_self, self.is_batch_active(BatchKind::Source));
                manager.ensure_initialized(items, &mut d)?;
                deferred = d.deferred;
            }
        }
        let value = {
            let state = s.state.try_borrow().map_err(|_| self.busy(Operation::Read))?;
            f(&state.items, &state.manager)
        };
        run_deferred(deferred);
        Ok(value)
    }

    fn busy(&self, attempted: Operation) -> PipelineError {
        PipelineError::Reentrant {
            active: self.shared.active.get().unwrap_or(Operation::Read),
            attempted,
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub fn push(&self, item: T) -> Result<()> {
        self.insert_at(None, item)
    }

    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.insert_at(Some(index), item)
    }

    /// Insert at `index`, or at the end when `None`.
    fn insert_at(&self, index: Option<usize>, item: T) -> Result<()> {
        self.run(Operation::Insert, |State { items, manager }, d| {
            let index = index.unwrap_or(items.len());
            check_index(index, items.len() + 1)?;
            manager.ensure_initialized(items, d)?;
            items.insert(index, item.clone());
            let change = CollectionChange::Added { item, index };
            manager.dispatch(items, change.clone(), d)?;
            Ok(((), vec![change]))
        })
    }

    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.run(Operation::Remove, |State { items, manager }, d| {
            check_index(index, items.len())?;
            let (item, change) = Self::remove_source(items, manager, index, d)?;
            Ok((item, vec![change]))
        })
    }

    /// Remove the first occurrence of `item`; `Ok(false)` if absent.
    pub fn remove(&self, item: &T) -> Result<bool> {
        self.run(Operation::Remove, |State { items, manager }, d| {
            let Some(index) = items.iter().position(|x| x == item) else {
                return Ok((false, Vec::new()));
            };
            let (_, change) = Self::remove_source(items, manager, index, d)?;
            Ok((true, vec![change]))
        })
    }

    fn remove_source(
        items: &mut Vec<T>,
        manager: &mut DecoratorManager<T>,
        index: usize,
        d: &mut Dispatch<'_, T>,
    ) -> Result<(T, CollectionChange<T>)> {
        manager.ensure_initialized(items, d)?;
        let item = items.remove(index);
        let change = CollectionChange::Removed {
            item: item.clone(),
            index,
        };
        manager.dispatch(items, change.clone(), d)?;
        Ok((item, change))
    }

    /// Replace the item at `index`, returning the old one.
    pub fn replace(&self, index: usize, item: T) -> Result<T> {
        self.run(Operation::Replace, |State { items, manager }, d| {
            check_index(index, items.len())?;
            manager.ensure_initialized(items, d)?;
            let old_item = std::mem::replace(&mut items[index], item.clone());
            let change = CollectionChange::Replaced {
                old_item: old_item.clone(),
                new_item: item,
                index,
            };
            manager.dispatch(items, change.clone(), d)?;
            Ok((old_item, vec![change]))
        })
    }

    pub fn move_item(&self, old_index: usize, new_index: usize) -> Result<()> {
        self.run(Operation::Move, |State { items, manager }, d| {
            check_index(old_index, items.len())?;
            check_index(new_index, items.len())?;
            if old_index == new_index {
                return Ok(((), Vec::new()));
            }
            manager.ensure_initialized(items, d)?;
            let item = items.remove(old_index);
            items.insert(new_index, item.clone());
            let change = CollectionChange::Moved {
                item,
                old_index,
                new_index,
            };
            manager.dispatch(items, change.clone(), d)?;
            Ok(((), vec![change]))
        })
    }

    /// Replace the whole source and rebuild every stage. Clears the fault flag.
    pub fn reset(&self, new_items: Vec<T>) -> Result<()> {
        self.run(Operation::Reset, |State { items, manager }, d| {
            *items = new_items;
            manager.reset_from(items, 0, d)?;
            let change = CollectionChange::Reset {
                items: items.clone(),
            };
            Ok(((), vec![change]))
        })?;
        self.shared.faulted.set(false);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.reset(Vec::new())
    }

    // ------------------------------------------------------------------
    // Decorators
    // ------------------------------------------------------------------

    /// Attach `decorator` at its priority position.
    ///
    /// If the chain is already live, the new stage and everything after it
    /// are rebuilt and decorated listeners receive a `Reset`.
    pub fn attach<D: Decorator<T>>(&self, decorator: D) -> Result<DecoratorHandle<D>> {
        let id = DecoratorId::next();
        self.run(Operation::Attach, |State { items, manager }, d| {
            manager.attach(items, id, Box::new(decorator), d)?;
            Ok(((), Vec::new()))
        })?;
        Ok(DecoratorHandle::new(id))
    }

    /// Detach a stage, retracting whatever it contributed.
    pub fn detach<D>(&self, handle: DecoratorHandle<D>) -> Result<()> {
        self.run(Operation::Detach, |State { items, manager }, d| {
            manager.detach(items, handle.id(), d)?;
            Ok(((), Vec::new()))
        })
    }

    /// Mutate a stage's configuration and rebuild from that stage on.
    pub fn update_decorator<D, R>(
        &self,
        handle: DecoratorHandle<D>,
        f: impl FnOnce(&mut D) -> R,
    ) -> Result<R>
    where
        D: Decorator<T>,
    {
        let id = handle.id();
        self.run(Operation::UpdateDecorator, |State { items, manager }, d| {
            let decorator = manager
                .decorator_mut(id)
                .ok_or(PipelineError::DecoratorNotFound(id))?;
            let typed = decorator
                .as_any_mut()
                .downcast_mut::<D>()
                .ok_or(PipelineError::DecoratorTypeMismatch(id))?;
            let value = f(typed);
            if manager.is_initialized() {
                let at = manager
                    .position(id)
                    .ok_or(PipelineError::DecoratorNotFound(id))?;
                manager.reset_from(items, at, d)?;
            }
            Ok((value, Vec::new()))
        })
    }

    // ------------------------------------------------------------------
    // Listeners and batches
    // ------------------------------------------------------------------

    /// Listen to the decorated output.
    pub fn subscribe(&self, listener: impl ChangeListener<T> + 'static) -> Subscription {
        self.shared.listeners.subscribe(listener)
    }

    /// Listen to the raw source sequence.
    pub fn subscribe_source(&self, listener: impl ChangeListener<T> + 'static) -> Subscription {
        self.shared.source_listeners.subscribe(listener)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len() + self.shared.source_listeners.len()
    }

    /// Open a reentrant source batch.
    ///
    /// Listeners hear `on_batch_begin(Source)` at the outermost open and
    /// get every change made inside as one `on_changes` before
    /// `on_batch_end(Source)`.
    pub fn batch_update(&self) -> BatchUpdate<T> {
        let s = &self.shared;
        let mut counters = s.batches.get();
        if counters.begin(BatchKind::Source) {
            debug!(collection = %s.id, "source batch opened");
            let mut outbox = s.outbox.borrow_mut();
            outbox.push_back((Target::Source, Notice::Begin(BatchKind::Source)));
            outbox.push_back((Target::Decorated, Notice::Begin(BatchKind::Source)));
        }
        s.batches.set(counters);
        self.drain();
        BatchUpdate {
            collection: self.clone(),
            open: true,
        }
    }

    fn end_batch(&self) -> Result<()> {
        let s = &self.shared;
        let depth = s.batches.get().depth(BatchKind::Source);
        if depth == 0 {
            return Err(PipelineError::InvariantViolation(
                "source batch ended without a matching begin".into(),
            ));
        }
        let hook = if depth == 1 && !s.disposed.get() {
            self.run(Operation::BatchEnd, |State { items, manager }, d| {
                manager.on_batch_end(items, d)?;
                Ok(((), Vec::new()))
            })
        } else {
            Ok(())
        };
        let mut counters = s.batches.get();
        let outermost = counters.end(BatchKind::Source)?;
        s.batches.set(counters);
        if outermost {
            let buffered = std::mem::take(&mut *s.buffered.borrow_mut());
            debug!(
                collection = %s.id,
                source = buffered.source.len(),
                decorated = buffered.decorated.len(),
                "source batch closed"
            );
            let mut outbox = s.outbox.borrow_mut();
            if !buffered.source.is_empty() {
                outbox.push_back((Target::Source, Notice::Changes(buffered.source)));
            }
            outbox.push_back((Target::Source, Notice::End(BatchKind::Source)));
            if !buffered.decorated.is_empty() {
                outbox.push_back((Target::Decorated, Notice::Changes(buffered.decorated)));
            }
            outbox.push_back((Target::Decorated, Notice::End(BatchKind::Source)));
        }
        self.drain();
        hook
    }

    // ------------------------------------------------------------------
    // Item-changed notifications
    // ------------------------------------------------------------------

    /// Report that a property of `item` changed.
    ///
    /// With a zero delay the notification is applied at once unless a
    /// mutation is in flight; otherwise it waits for
    /// [`Self::poll_item_changes`], [`Self::flush_item_changes`] or an
    /// [`ItemChangeTimer`].
    pub fn raise_item_changed(&self, item: T, args: ChangeArgs) -> Result<()> {
        let s = &self.shared;
        if s.disposed.get() {
            return Err(PipelineError::Disposed);
        }
        s.item_changes
            .borrow_mut()
            .push(item, args, Instant::now(), s.config.item_changed_reset_threshold);
        if s.config.item_changed_delay_ms == 0 && s.active.get().is_none() {
            self.flush_item_changes()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn pending_item_changes(&self) -> usize {
        self.shared.item_changes.borrow().len()
    }

    /// Flush once the debounce window has elapsed; `Ok(true)` if it did.
    pub fn poll_item_changes(&self, now: Instant) -> Result<bool> {
        let due = self
            .shared
            .item_changes
            .borrow()
            .is_due(now, self.shared.config.item_changed_delay());
        if due {
            self.flush_item_changes()?;
        }
        Ok(due)
    }

    /// Apply every pending item-changed notification now.
    pub fn flush_item_changes(&self) -> Result<()> {
        let s = &self.shared;
        if s.disposed.get() {
            return Err(PipelineError::Disposed);
        }
        let (raised, pending) = {
            let mut queue = s.item_changes.borrow_mut();
            (queue.len(), queue.take())
        };
        if raised == 0 {
            return Ok(());
        }
        let threshold = s.config.item_changed_reset_threshold;
        self.run(Operation::ItemChanged, |State { items, manager }, d| {
            manager.ensure_initialized(items, d)?;
            if raised > threshold {
                debug!(pending = raised, threshold, "item-changed burst over threshold; resetting chain");
                manager.reset_from(items, 0, d)?;
                return Ok(((), Vec::new()));
            }
            let mut source_changes = Vec::new();
            for (item, args) in pending {
                let hits = manager.locate(items, &item);
                if hits.is_empty() {
                    debug!(?item, "changed item is no longer present");
                    continue;
                }
                for (start, index) in hits {
                    if start == 0 {
                        source_changes.push(CollectionChange::Changed {
                            item: item.clone(),
                            index,
                            args: args.clone(),
                        });
                    }
                    manager.item_changed(items, start, item.clone(), index, args.clone(), d)?;
                }
            }
            Ok(((), source_changes))
        })
    }

    /// Weak handle that flushes this collection's item-changed queue.
    #[must_use]
    pub fn item_change_timer(&self) -> ItemChangeTimer<T> {
        ItemChangeTimer::new(Weak::clone(&self.shared.weak_self))
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Detach every stage in reverse order, drop pending item changes and
    /// listeners, and unlink from parents. Idempotent.
    pub fn dispose(&self) -> Result<()> {
        let s = &self.shared;
        if s.disposed.get() {
            return Ok(());
        }
        let result = self.run(Operation::Dispose, |State { items, manager }, d| {
            manager.dispose(items, d)?;
            Ok(((), Vec::new()))
        });
        s.disposed.set(true);
        s.item_changes.borrow_mut().take();
        s.parents.borrow_mut().clear();
        *s.lock.borrow_mut() = s.own_lock.clone();
        s.listeners.clear();
        s.source_listeners.clear();
        s.outbox.borrow_mut().clear();
        debug!(collection = %s.id, "disposed");
        result
    }

    // ------------------------------------------------------------------
    // Nesting
    // ------------------------------------------------------------------

    pub(crate) fn link_parent(&self, owner: &Rc<Shared<T>>, stage: DecoratorId) -> Result<()> {
        let s = &self.shared;
        if Rc::ptr_eq(owner, s) {
            return Err(PipelineError::InvariantViolation(
                "a collection cannot be nested in itself".into(),
            ));
        }
        let weak = Rc::downgrade(owner);
        let mut parents = s.parents.borrow_mut();
        match parents
            .iter_mut()
            .find(|l| l.stage == stage && Weak::ptr_eq(&l.parent, &weak))
        {
            Some(link) => link.refs += 1,
            None => parents.push(ParentLink {
                parent: weak,
                stage,
                refs: 1,
            }),
        }
        *s.lock.borrow_mut() = owner.lock.borrow().clone();
        Ok(())
    }

    pub(crate) fn unlink_parent(&self, owner: &Weak<Shared<T>>, stage: DecoratorId) {
        let s = &self.shared;
        let mut parents = s.parents.borrow_mut();
        if let Some(at) = parents
            .iter()
            .position(|l| l.stage == stage && Weak::ptr_eq(&l.parent, owner))
        {
            parents[at].refs -= 1;
            if parents[at].refs == 0 {
                parents.remove(at);
            }
        }
        if parents.is_empty() {
            *s.lock.borrow_mut() = s.own_lock.clone();
        }
    }

    /// Number of parent stages this collection is nested in.
    #[must_use]
    pub fn parent_count(&self) -> usize {
        self.shared.parents.borrow().len()
    }

    fn forward_to_parents(&self, changes: &[CollectionChange<T>]) -> Result<()> {
        let s = &self.shared;
        let parents: Vec<(Rc<Shared<T>>, DecoratorId)> = s
            .parents
            .borrow()
            .iter()
            .filter_map(|l| l.parent.upgrade().map(|p| (p, l.stage)))
            .collect();
        for (parent, stage) in parents {
            Self::from_shared(parent).nested_changed(stage, s.id, changes)?;
        }
        Ok(())
    }

    fn nested_changed(
        &self,
        stage: DecoratorId,
        child: CollectionId,
        changes: &[CollectionChange<T>],
    ) -> Result<()> {
        if self.shared.disposed.get() {
            return Ok(());
        }
        self.run(Operation::NestedChange, |State { items, manager }, d| {
            for change in changes {
                manager.on_nested(items, stage, child, change, d)?;
            }
            Ok(((), Vec::new()))
        })
    }

    // ------------------------------------------------------------------
    // Operation plumbing
    // ------------------------------------------------------------------

    fn run<R>(
        &self,
        op: Operation,
        body: impl FnOnce(&mut State<T>, &mut Dispatch<'_, T>) -> Result<(R, Vec<CollectionChange<T>>)>,
    ) -> Result<R> {
        let s = &self.shared;
        if s.disposed.get() {
            return Err(PipelineError::Disposed);
        }
        if let Some(active) = s.active.get() {
            s.reentered.set(true);
            warn!(collection = %s.id, %active, attempted = %op, "reentrant mutation rejected");
            return Err(PipelineError::Reentrant {
                active,
                attempted: op,
            });
        }
        let _span = debug_span!("vista.op", collection = %s.id, %op).entered();
        let lock = s.lock.borrow().clone();
        let _guard = lock.acquire();
        s.active.set(Some(op));
        s.reentered.set(false);

        let mut d = Dispatch::new(&s.weak_self, s.batches.get().is_active(BatchKind::Source));
        let outcome = match s.state.try_borrow_mut() {
            Ok(mut state) => body(&mut state, &mut d),
            Err(_) => Err(PipelineError::Reentrant {
                active: Operation::Read,
                attempted: op,
            }),
        };
        let Dispatch {
            changes,
            deferred,
            split,
            ..
        } = d;

        let (value, source_changes) = match outcome {
            Ok(done) => done,
            Err(err) => {
                s.active.set(None);
                if err.invalidates_view() {
                    s.faulted.set(true);
                    warn!(collection = %s.id, %op, error = %err, "operation failed; decorated view needs a reset");
                } else {
                    debug!(collection = %s.id, %op, error = %err, "operation rejected");
                }
                return Err(err);
            }
        };
        let forwarded = if changes.is_empty() {
            Ok(())
        } else {
            self.forward_to_parents(&changes)
        };
        s.active.set(None);
        self.publish(source_changes, changes, split);
        run_deferred(deferred);
        self.drain();

        forwarded?;
        if s.reentered.replace(false) {
            s.faulted.set(true);
            return Err(PipelineError::InvariantViolation(format!(
                "mutation attempted while {op} was being dispatched"
            )));
        }
        Ok(value)
    }

    fn publish(
        &self,
        source: Vec<CollectionChange<T>>,
        decorated: Vec<CollectionChange<T>>,
        split: bool,
    ) {
        let s = &self.shared;
        if s.batches.get().is_active(BatchKind::Source) {
            let mut buffered = s.buffered.borrow_mut();
            buffered.source.extend(source);
            buffered.decorated.extend(decorated);
            return;
        }
        let mut outbox = s.outbox.borrow_mut();
        if !source.is_empty() {
            outbox.push_back((Target::Source, Notice::Changes(source)));
        }
        if !decorated.is_empty() {
            if split {
                outbox.push_back((Target::Decorated, Notice::Begin(BatchKind::Decorators)));
            }
            outbox.push_back((Target::Decorated, Notice::Changes(decorated)));
            if split {
                outbox.push_back((Target::Decorated, Notice::End(BatchKind::Decorators)));
            }
        }
    }

    fn drain(&self) {
        let s = &self.shared;
        if s.delivering.replace(true) {
            return;
        }
        loop {
            let next = s.outbox.borrow_mut().pop_front();
            let Some((target, notice)) = next else {
                break;
            };
            match target {
                Target::Source => s.source_listeners.deliver(&notice),
                Target::Decorated => {
                    if let Notice::Begin(BatchKind::Decorators) = notice {
                        let mut counters = s.batches.get();
                        counters.begin(BatchKind::Decorators);
                        s.batches.set(counters);
                    }
                    s.listeners.deliver(&notice);
                    if let Notice::End(BatchKind::Decorators) = notice {
                        let mut counters = s.batches.get();
                        if counters.end(BatchKind::Decorators).is_err() {
                            warn!(collection = %s.id, "unbalanced decorator batch marker");
                        }
                        s.batches.set(counters);
                    }
                }
            }
        }
        s.delivering.set(false);
    }
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(PipelineError::IndexOutOfRange { index, len })
    }
}

fn run_deferred(deferred: Vec<Deferred>) {
    for callback in deferred {
        callback();
    }
}

/// RAII source batch; closes on drop or via [`BatchUpdate::end`].
#[must_use = "the batch closes as soon as the guard is dropped"]
pub struct BatchUpdate<T: Item> {
    collection: ObservableCollection<T>,
    open: bool,
}

impl<T: Item> fmt::Debug for BatchUpdate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchUpdate")
            .field("collection", &self.collection.id())
            .field("open", &self.open)
            .finish()
    }
}

impl<T: Item> BatchUpdate<T> {
    /// Close the batch, surfacing any error from batch-end hooks.
    pub fn end(mut self) -> Result<()> {
        self.open = false;
        self.collection.end_batch()
    }
}

impl<T: Item> Drop for BatchUpdate<T> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(err) = self.collection.end_batch() {
                warn!(error = %err, "source batch closed with an error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorator::{DecoratorContext, Flow};
    use std::cell::RefCell;

    fn recorder<T: Item>(
        collection: &ObservableCollection<T>,
    ) -> (Rc<RefCell<Vec<CollectionChange<T>>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = collection.subscribe(move |changes: &[CollectionChange<T>]| {
            sink.borrow_mut().extend_from_slice(changes);
        });
        (log, sub)
    }

    #[test]
    fn plain_collection_mirrors_source() {
        let c = ObservableCollection::from_vec(vec![1, 2, 3]);
        let (log, _sub) = recorder(&c);
        c.push(4).unwrap();
        c.move_item(0, 3).unwrap();
        assert_eq!(c.remove_at(0).unwrap(), 2);
        assert_eq!(c.items(), vec![3, 4, 1]);
        assert_eq!(c.decorated_items().unwrap(), vec![3, 4, 1]);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn out_of_range_is_rejected_without_events() {
        let c = ObservableCollection::from_vec(vec![1]);
        let (log, _sub) = recorder(&c);
        assert_eq!(
            c.insert(3, 9),
            Err(PipelineError::IndexOutOfRange { index: 3, len: 2 })
        );
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn batch_delivers_once() {
        let c = ObservableCollection::<i32>::new();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let _sub = c.subscribe(move |_: &[CollectionChange<i32>]| seen.set(seen.get() + 1));
        {
            let _outer = c.batch_update();
            let inner = c.batch_update();
            c.push(1).unwrap();
            c.push(2).unwrap();
            inner.end().unwrap();
            c.push(3).unwrap();
            assert_eq!(calls.get(), 0);
        }
        assert_eq!(calls.get(), 1);
        assert!(!c.is_batch_active(BatchKind::Source));
    }

    #[test]
    fn listener_mutation_is_delivered_after() {
        let c = ObservableCollection::<i32>::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let handle = c.clone();
        let _sub = c.subscribe(move |changes: &[CollectionChange<i32>]| {
            for change in changes {
                sink.borrow_mut().push(change.clone());
                if let CollectionChange::Added { item: 1, .. } = change {
                    handle.push(2).unwrap();
                }
            }
        });
        c.push(1).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                CollectionChange::Added { item: 1, index: 0 },
                CollectionChange::Added { item: 2, index: 1 },
            ]
        );
    }

    #[test]
    fn dispose_blocks_further_mutation() {
        let c = ObservableCollection::from_vec(vec![1]);
        c.dispose().unwrap();
        c.dispose().unwrap();
        assert!(c.is_disposed());
        assert_eq!(c.push(2), Err(PipelineError::Disposed));
        assert_eq!(
            c.raise_item_changed(1, ChangeArgs::none()),
            Err(PipelineError::Disposed)
        );
    }

    #[test]
    fn dispose_retires_stages_in_reverse_attach_order() {
        use crate::decorators::Convert;

        let c = ObservableCollection::from_vec(vec![1]);
        let retired = Rc::new(RefCell::new(Vec::new()));
        let late = Rc::clone(&retired);
        let early = Rc::clone(&retired);
        c.attach(
            Convert::new(|x: &i32| x + 1)
                .with_priority(5)
                .with_cleanup(move |x| early.borrow_mut().push(*x)),
        )
        .unwrap();
        c.attach(
            Convert::new(|x: &i32| x * 10)
                .with_priority(0)
                .with_cleanup(move |x| late.borrow_mut().push(*x)),
        )
        .unwrap();
        assert_eq!(c.decorated_items().unwrap(), vec![11]);

        c.dispose().unwrap();

        assert_eq!(*retired.borrow(), vec![10, 11]);
    }

    /// Pass-through stage that counts reads and lookups.
    #[derive(Default)]
    struct Tap {
        reads: Rc<Cell<usize>>,
        lookups: Rc<Cell<usize>>,
    }

    impl Decorator<i32> for Tap {
        fn name(&self) -> &'static str {
            "tap"
        }

        fn decorate<'a>(&'a self, upstream: Items<'a, i32>) -> Items<'a, i32> {
            self.reads.set(self.reads.get() + 1);
            upstream
        }

        fn on_reset(&mut self, _: &mut DecoratorContext<'_, i32>, _: Option<&[i32]>) -> Result<()> {
            Ok(())
        }

        fn on_added(&mut self, _: &mut DecoratorContext<'_, i32>, item: i32, index: usize) -> Result<Flow<(i32, usize)>> {
            Ok(Flow::Continue((item, index)))
        }

        fn on_replaced(
            &mut self,
            _: &mut DecoratorContext<'_, i32>,
            old_item: i32,
            new_item: i32,
            index: usize,
        ) -> Result<Flow<(i32, i32, usize)>> {
            Ok(Flow::Continue((old_item, new_item, index)))
        }

        fn on_moved(
            &mut self,
            _: &mut DecoratorContext<'_, i32>,
            item: i32,
            old_index: usize,
            new_index: usize,
        ) -> Result<Flow<(i32, usize, usize)>> {
            Ok(Flow::Continue((item, old_index, new_index)))
        }

        fn on_removed(&mut self, _: &mut DecoratorContext<'_, i32>, item: i32, index: usize) -> Result<Flow<(i32, usize)>> {
            Ok(Flow::Continue((item, index)))
        }

        fn on_changed(
            &mut self,
            _: &mut DecoratorContext<'_, i32>,
            item: i32,
            index: usize,
            args: ChangeArgs,
        ) -> Result<Flow<(i32, usize, ChangeArgs)>> {
            Ok(Flow::Continue((item, index, args)))
        }

        fn lookup_indexes(&self, _: &i32) -> smallvec::SmallVec<[usize; 2]> {
            self.lookups.set(self.lookups.get() + 1);
            smallvec::smallvec![0]
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn reads_start_at_the_last_non_lazy_stage() {
        use crate::decorators::Convert;

        let c = ObservableCollection::from_vec(vec![1, 2]);
        let tap = Tap::default();
        let reads = Rc::clone(&tap.reads);
        c.attach(tap).unwrap();
        assert_eq!(c.decorated_items().unwrap(), vec![1, 2]);
        assert!(reads.get() > 0);

        c.attach(Convert::new(|x: &i32| x * 10)).unwrap();
        reads.set(0);
        assert_eq!(c.decorated_items().unwrap(), vec![10, 20]);
        c.push(3).unwrap();
        assert_eq!(c.decorated_len().unwrap(), 3);
        assert_eq!(c.decorated_items().unwrap(), vec![10, 20, 30]);
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn only_item_adding_stages_are_asked_to_locate() {
        let c = ObservableCollection::from_vec(vec![1, 2]);
        let tap = Tap::default();
        let lookups = Rc::clone(&tap.lookups);
        c.attach(tap).unwrap();
        let (log, _sub) = recorder(&c);

        c.raise_item_changed(99, ChangeArgs::none()).unwrap();

        assert_eq!(lookups.get(), 0);
        assert!(log.borrow().is_empty());
        assert_eq!(c.pending_item_changes(), 0);
    }

    #[test]
    fn lock_is_released_after_each_operation() {
        let c = ObservableCollection::from_vec(vec![1]);
        c.push(2).unwrap();
        assert!(!c.lock().is_held());
        assert!(c.lock().acquisitions() >= 1);
    }
}
