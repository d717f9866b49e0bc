#![forbid(unsafe_code)]

//! A parent collection of `i32` whose link values stand for child
//! collections, for driving [`Flatten`] with random edits on both levels.
//!
//! `link(k)` in the parent expands to the current items of child `k`. Child
//! items are plain values and never links.

use vista_core::PipelineError;
use vista_pipeline::ObservableCollection;
use vista_pipeline::decorators::Flatten;

use crate::strategy::Op;

/// Number of children a [`Family`] built by the strategies carries.
pub const CHILD_COUNT: usize = 3;

const LINK_BASE: i32 = 50_000;

/// Parent value that expands to child `child`.
#[must_use]
pub fn link(child: usize) -> i32 {
    LINK_BASE.saturating_add(i32::try_from(child).unwrap_or(i32::MAX))
}

fn linked(value: i32) -> Option<usize> {
    value
        .checked_sub(LINK_BASE)
        .and_then(|k| usize::try_from(k).ok())
}

/// One edit to the parent or to child `k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyOp {
    Parent(Op),
    Child(usize, Op),
}

#[derive(Debug)]
pub struct Family {
    parent: ObservableCollection<i32>,
    children: Vec<ObservableCollection<i32>>,
}

impl Family {
    #[must_use]
    pub fn new(parent: Vec<i32>, children: &[Vec<i32>]) -> Self {
        Self {
            parent: ObservableCollection::from_vec(parent),
            children: children
                .iter()
                .map(|items| ObservableCollection::from_vec(items.clone()))
                .collect(),
        }
    }

    #[must_use]
    pub fn parent(&self) -> &ObservableCollection<i32> {
        &self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[ObservableCollection<i32>] {
        &self.children
    }

    fn child_of(&self, value: i32) -> Option<&ObservableCollection<i32>> {
        linked(value).and_then(|k| self.children.get(k))
    }

    /// Attach a [`Flatten`] that expands link values into their children.
    pub fn attach_flatten(&self) -> Result<(), PipelineError> {
        let children = self.children.clone();
        self.parent.attach(Flatten::new(move |value: &i32| {
            linked(*value).and_then(|k| children.get(k).cloned())
        }))?;
        Ok(())
    }

    /// The parent's items with every link expanded, computed from scratch.
    #[must_use]
    pub fn flattened(&self) -> Vec<i32> {
        self.parent
            .items()
            .into_iter()
            .flat_map(|value| match self.child_of(value) {
                Some(child) => child.items(),
                None => vec![value],
            })
            .collect()
    }

    /// Apply `op`; edits to a missing child are skipped.
    pub fn apply(&self, op: &FamilyOp) -> Result<(), PipelineError> {
        match op {
            FamilyOp::Parent(op) => op.apply(&self.parent),
            FamilyOp::Child(k, op) => match self.children.get(*k) {
                Some(child) => op.apply(child),
                None => Ok(()),
            },
        }
    }
}
