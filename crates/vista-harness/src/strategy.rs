#![forbid(unsafe_code)]

//! Proptest strategies for mutation scripts and decorator chains.
//!
//! Indices are generated as seeds and reduced modulo the live length when
//! applied, so every generated script is valid against any source.

use proptest::prelude::*;
use vista_core::PipelineError;
use vista_pipeline::ObservableCollection;

use crate::model::{ChainSpec, StageSpec};
use crate::nested::{self, CHILD_COUNT, FamilyOp};

/// One source mutation with length-independent index seeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Push(i32),
    Insert(usize, i32),
    RemoveAt(usize),
    Replace(usize, i32),
    Move(usize, usize),
    Reset(Vec<i32>),
    Clear,
    /// Mutations applied inside one source batch.
    Batch(Vec<Op>),
}

impl Op {
    /// Apply to `collection`; index-taking ops are skipped on an empty source.
    pub fn apply(&self, collection: &ObservableCollection<i32>) -> Result<(), PipelineError> {
        let len = collection.len();
        match self {
            Self::Push(x) => collection.push(*x),
            Self::Insert(at, x) => collection.insert(at % (len + 1), *x),
            Self::RemoveAt(at) if len > 0 => collection.remove_at(at % len).map(drop),
            Self::Replace(at, x) if len > 0 => collection.replace(at % len, *x).map(drop),
            Self::Move(from, to) if len > 0 => collection.move_item(from % len, to % len),
            Self::RemoveAt(_) | Self::Replace(..) | Self::Move(..) => Ok(()),
            Self::Reset(items) => collection.reset(items.clone()),
            Self::Clear => collection.clear(),
            Self::Batch(ops) => {
                let batch = collection.batch_update();
                for op in ops {
                    op.apply(collection)?;
                }
                batch.end()
            }
        }
    }

    /// Apply to a plain `Vec` the way [`Op::apply`] applies to a collection.
    pub fn apply_to_vec(&self, items: &mut Vec<i32>) {
        let len = items.len();
        match self {
            Self::Push(x) => items.push(*x),
            Self::Insert(at, x) => items.insert(at % (len + 1), *x),
            Self::RemoveAt(at) if len > 0 => {
                items.remove(at % len);
            }
            Self::Replace(at, x) if len > 0 => items[at % len] = *x,
            Self::Move(from, to) if len > 0 => {
                let item = items.remove(from % len);
                items.insert(to % len, item);
            }
            Self::RemoveAt(_) | Self::Replace(..) | Self::Move(..) => {}
            Self::Reset(new_items) => items.clone_from(new_items),
            Self::Clear => items.clear(),
            Self::Batch(ops) => {
                for op in ops {
                    op.apply_to_vec(items);
                }
            }
        }
    }
}

/// Small values so duplicates and key collisions are common.
pub fn value() -> impl Strategy<Value = i32> {
    -20i32..40
}

pub fn source(max_len: usize) -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(value(), 0..max_len)
}

fn leaf_op_over<S, F>(value: F) -> impl Strategy<Value = Op>
where
    S: Strategy<Value = i32>,
    F: Fn() -> S,
{
    prop_oneof![
        3 => value().prop_map(Op::Push),
        4 => (any::<usize>(), value()).prop_map(|(at, x)| Op::Insert(at, x)),
        3 => any::<usize>().prop_map(Op::RemoveAt),
        3 => (any::<usize>(), value()).prop_map(|(at, x)| Op::Replace(at, x)),
        3 => (any::<usize>(), any::<usize>()).prop_map(|(from, to)| Op::Move(from, to)),
        1 => prop::collection::vec(value(), 0..12).prop_map(Op::Reset),
        1 => Just(Op::Clear),
    ]
}

fn leaf_op() -> impl Strategy<Value = Op> {
    leaf_op_over(value)
}

pub fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => leaf_op(),
        1 => prop::collection::vec(leaf_op(), 1..6).prop_map(Op::Batch),
    ]
}

pub fn ops(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op(), 1..max_len)
}

/// Parent values for a [`Family`](crate::Family): mostly plain, sometimes
/// a link to one of its children.
pub fn parent_value() -> impl Strategy<Value = i32> {
    prop_oneof![
        3 => value(),
        1 => (0..CHILD_COUNT).prop_map(nested::link),
    ]
}

pub fn family_source(max_len: usize) -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(parent_value(), 0..max_len)
}

/// Initial items for each of the [`CHILD_COUNT`] children.
pub fn child_sources() -> impl Strategy<Value = Vec<Vec<i32>>> {
    prop::collection::vec(source(6), CHILD_COUNT)
}

pub fn family_op() -> impl Strategy<Value = FamilyOp> {
    prop_oneof![
        3 => leaf_op_over(parent_value).prop_map(FamilyOp::Parent),
        1 => prop::collection::vec(leaf_op_over(parent_value), 1..5)
            .prop_map(|ops| FamilyOp::Parent(Op::Batch(ops))),
        4 => (0..CHILD_COUNT, leaf_op()).prop_map(|(k, op)| FamilyOp::Child(k, op)),
    ]
}

pub fn family_ops(max_len: usize) -> impl Strategy<Value = Vec<FamilyOp>> {
    prop::collection::vec(family_op(), 1..max_len)
}

fn stage() -> impl Strategy<Value = StageSpec> {
    prop_oneof![
        Just(StageSpec::FilterEven),
        (-10i32..20).prop_map(StageSpec::FilterAbove),
        Just(StageSpec::SortAscending),
        Just(StageSpec::SortDescending),
        Just(StageSpec::DistinctSorted),
        Just(StageSpec::GroupByMod3),
        (0usize..6).prop_map(StageSpec::Limit),
        (0usize..4).prop_map(StageSpec::LimitEven),
        (
            prop::collection::vec(100i32..110, 0..3),
            prop::collection::vec(200i32..210, 0..3)
        )
            .prop_map(|(header, footer)| StageSpec::HeaderFooter(header, footer)),
        Just(StageSpec::Double),
        Just(StageSpec::Materialize),
    ]
}

/// Chains of one to four stages. A plain [`StageSpec::Distinct`] only ever
/// comes last, since its output order is not modeled.
pub fn chain() -> impl Strategy<Value = ChainSpec> {
    (prop::collection::vec(stage(), 1..4), prop::bool::weighted(0.25)).prop_map(|(mut stages, distinct)| {
        if distinct {
            stages.push(StageSpec::Distinct);
        }
        ChainSpec::new(stages)
    })
}
