#![forbid(unsafe_code)]

//! Error taxonomy for collection mutations and decorator dispatch.
//!
//! | Class | Variants | Caller response |
//! |---|---|---|
//! | Invariant violation | [`PipelineError::Reentrant`], [`PipelineError::InvariantViolation`] | treat the decorated view as untrustworthy until a reset |
//! | Lookup failure | [`PipelineError::ItemNotFound`] | upstream contract broken; reset |
//! | Argument | [`PipelineError::IndexOutOfRange`], [`PipelineError::InvalidArgument`] | fix the call; state untouched |
//! | Handle misuse | [`PipelineError::DecoratorNotFound`], [`PipelineError::DecoratorTypeMismatch`], [`PipelineError::Disposed`] | fix the call |
//!
//! No rollback is attempted: a failure inside a dispatch walk leaves every
//! stage as the partial walk left it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Global counter for collection ids.
static COLLECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Global counter for decorator ids.
static DECORATOR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of an observable collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(u64);

impl CollectionId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(COLLECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collection#{}", self.0)
    }
}

/// Unique identifier of an attached decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoratorId(u64);

impl DecoratorId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(DECORATOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DecoratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decorator#{}", self.0)
    }
}

/// Public operation that can be in flight on a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Insert,
    Remove,
    Replace,
    Move,
    Reset,
    Attach,
    Detach,
    UpdateDecorator,
    ItemChanged,
    NestedChange,
    BatchEnd,
    Dispose,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Insert => "insert",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Move => "move",
            Self::Reset => "reset",
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::UpdateDecorator => "update-decorator",
            Self::ItemChanged => "item-changed",
            Self::NestedChange => "nested-change",
            Self::BatchEnd => "batch-end",
            Self::Dispose => "dispose",
        };
        f.write_str(name)
    }
}

/// Errors raised by collection mutations and decorator dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A mutation was attempted while another one was still being dispatched.
    #[error("cannot {attempted} while {active} is being dispatched")]
    Reentrant {
        active: Operation,
        attempted: Operation,
    },

    /// Bookkeeping was left inconsistent by an earlier failure or misuse.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A decorator had no record for a position an event implied it tracks.
    #[error("{decorator} has no entry for index {index}")]
    ItemNotFound {
        decorator: &'static str,
        index: usize,
    },

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not attached")]
    DecoratorNotFound(DecoratorId),

    #[error("{0} has a different concrete type")]
    DecoratorTypeMismatch(DecoratorId),

    #[error("collection has been disposed")]
    Disposed,
}

impl PipelineError {
    /// Whether the error leaves the decorated view untrustworthy.
    #[must_use]
    pub const fn invalidates_view(&self) -> bool {
        matches!(
            self,
            Self::Reentrant { .. } | Self::InvariantViolation(_) | Self::ItemNotFound { .. }
        )
    }
}

/// Result alias used throughout vista.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = DecoratorId::next();
        let b = DecoratorId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
        assert_ne!(CollectionId::next(), CollectionId::next());
    }

    #[test]
    fn display_messages() {
        let err = PipelineError::Reentrant {
            active: Operation::Reset,
            attempted: Operation::Insert,
        };
        assert_eq!(
            err.to_string(),
            "cannot insert while reset is being dispatched"
        );
        assert!(err.invalidates_view());
        assert!(!PipelineError::Disposed.invalidates_view());
        let err = PipelineError::ItemNotFound {
            decorator: "sort",
            index: 3,
        };
        assert_eq!(err.to_string(), "sort has no entry for index 3");
    }
}
