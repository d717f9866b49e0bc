#![forbid(unsafe_code)]

//! Leaf types for the vista decorator pipeline.
//!
//! - [`IndexMap`]: sorted position-to-payload bookkeeping.
//! - [`CollectionChange`]: the event shapes every stage consumes and emits.
//! - [`BatchCounters`] / [`BatchKind`]: reentrant batch depth.
//! - [`CollectionLock`]: scoped reentrant ownership of a collection.
//! - [`PipelineError`]: the error taxonomy.
//! - [`PipelineConfig`]: tunables.

pub mod batch;
pub mod change;
pub mod config;
pub mod error;
pub mod index_map;
pub mod lock;

pub use batch::{BatchCounters, BatchKind};
pub use change::{ChangeArgs, ChangeKind, CollectionChange, Item};
pub use config::PipelineConfig;
pub use error::{CollectionId, DecoratorId, Operation, PipelineError, Result};
pub use index_map::{IndexEntry, IndexMap, MoveOutcome};
pub use lock::{CollectionLock, LockGuard};
