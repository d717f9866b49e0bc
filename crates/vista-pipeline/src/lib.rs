#![forbid(unsafe_code)]

//! Observable collections with an incremental decorator chain.
//!
//! - [`ObservableCollection`]: the source sequence, its stages and its
//!   listeners.
//! - [`Decorator`]: the contract every stage implements.
//! - [`decorators`]: the built-in stages.
//! - [`ChangeListener`] / [`Subscription`]: notification delivery.
//! - [`ItemChangeTimer`]: drives debounced item-changed notifications.
//!
//! # Architecture
//!
//! Everything is single-threaded (`Rc<RefCell<..>>`). A collection owns its
//! source `Vec`, a decorator manager and two listener sets. Every mutation
//! walks one event through the chain; each stage rewrites it into its own
//! output coordinates or replaces it with the events it emits. Stages that
//! need random access to their output keep a materialized cache that the
//! manager patches as events leave them.

pub mod collection;
pub mod decorator;
pub mod decorators;
pub mod item_changed;
pub mod listener;
mod manager;

#[cfg(test)]
mod testing;

pub use collection::{BatchUpdate, ObservableCollection};
pub use decorator::{Decorator, DecoratorContext, DecoratorHandle, Flow, Items};
pub use item_changed::ItemChangeTimer;
pub use listener::{ChangeListener, Subscription};
pub use vista_core::{
    BatchKind, ChangeArgs, ChangeKind, CollectionChange, CollectionId, CollectionLock, DecoratorId,
    Item, Operation, PipelineConfig, PipelineError, Result,
};
