#![forbid(unsafe_code)]

//! Reentrant batch-depth bookkeeping.
//!
//! A collection keeps one depth counter per [`BatchKind`]. Nested begins only
//! bump the counter; listeners hear about a batch when the counter leaves
//! zero and when it returns to zero.
//!
//! # Invariants
//!
//! 1. `begin` reports `true` exactly when the depth goes from 0 to 1.
//! 2. `end` reports `true` exactly when the depth goes from 1 to 0.
//! 3. Ending a batch that is not open is an error, never an underflow.

use std::fmt;

use crate::error::{PipelineError, Result};

/// Which side of the pipeline opened a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    /// Opened by the owner of the source collection.
    Source,
    /// Opened by a decorator splitting one upstream event into several.
    Decorators,
}

impl BatchKind {
    const fn slot(self) -> usize {
        match self {
            Self::Source => 0,
            Self::Decorators => 1,
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Decorators => f.write_str("decorators"),
        }
    }
}

/// Nesting depth per batch kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounters {
    depth: [u32; 2],
}

impl BatchCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self { depth: [0; 2] }
    }

    /// Open a batch; `true` when this is the outermost begin.
    pub fn begin(&mut self, kind: BatchKind) -> bool {
        let depth = &mut self.depth[kind.slot()];
        *depth += 1;
        *depth == 1
    }

    /// Close a batch; `true` when this closed the outermost one.
    pub fn end(&mut self, kind: BatchKind) -> Result<bool> {
        let depth = &mut self.depth[kind.slot()];
        if *depth == 0 {
            return Err(PipelineError::InvariantViolation(format!(
                "{kind} batch ended without a matching begin"
            )));
        }
        *depth -= 1;
        Ok(*depth == 0)
    }

    #[must_use]
    pub const fn depth(&self, kind: BatchKind) -> u32 {
        self.depth[kind.slot()]
    }

    #[must_use]
    pub const fn is_active(&self, kind: BatchKind) -> bool {
        self.depth[kind.slot()] > 0
    }

    /// Force every counter back to zero, returning the kinds that were open.
    pub fn clear(&mut self) -> Vec<BatchKind> {
        let open = [BatchKind::Source, BatchKind::Decorators]
            .into_iter()
            .filter(|k| self.is_active(*k))
            .collect();
        self.depth = [0; 2];
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_outermost_transitions_report() {
        let mut counters = BatchCounters::new();
        assert!(counters.begin(BatchKind::Source));
        assert!(!counters.begin(BatchKind::Source));
        assert_eq!(counters.depth(BatchKind::Source), 2);
        assert!(!counters.is_active(BatchKind::Decorators));
        assert_eq!(counters.end(BatchKind::Source), Ok(false));
        assert_eq!(counters.end(BatchKind::Source), Ok(true));
        assert!(!counters.is_active(BatchKind::Source));
    }

    #[test]
    fn unbalanced_end_is_an_error() {
        let mut counters = BatchCounters::new();
        assert!(matches!(
            counters.end(BatchKind::Decorators),
            Err(PipelineError::InvariantViolation(_))
        ));
    }

    #[test]
    fn kinds_are_independent() {
        let mut counters = BatchCounters::new();
        counters.begin(BatchKind::Source);
        assert!(counters.begin(BatchKind::Decorators));
        assert_eq!(counters.clear(), vec![BatchKind::Source, BatchKind::Decorators]);
        assert_eq!(counters, BatchCounters::new());
    }
}
