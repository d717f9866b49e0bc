#![no_main]

//! Random decorator chains driven by random mutation scripts, optionally
//! behind a flatten stage whose children are edited too.
//!
//! Asserts that the source matches a plain `Vec`, the decorated output
//! matches the reference model (as a set after a plain distinct), and a
//! mirror fed only change events matches the decorated output.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vista_harness::model::{ChainSpec, StageSpec};
use vista_harness::nested::{CHILD_COUNT, link};
use vista_harness::{Family, FamilyOp, Mirror, Op};

#[derive(Debug, Arbitrary)]
enum FuzzStage {
    FilterEven,
    FilterAbove(i8),
    SortAscending,
    SortDescending,
    DistinctSorted,
    GroupByMod3,
    Limit(u8),
    LimitEven(u8),
    HeaderFooter(u8, u8),
    Double,
    Materialize,
}

impl FuzzStage {
    fn spec(&self) -> StageSpec {
        match *self {
            Self::FilterEven => StageSpec::FilterEven,
            Self::FilterAbove(min) => StageSpec::FilterAbove(i32::from(min)),
            Self::SortAscending => StageSpec::SortAscending,
            Self::SortDescending => StageSpec::SortDescending,
            Self::DistinctSorted => StageSpec::DistinctSorted,
            Self::GroupByMod3 => StageSpec::GroupByMod3,
            Self::Limit(n) => StageSpec::Limit(usize::from(n % 8)),
            Self::LimitEven(n) => StageSpec::LimitEven(usize::from(n % 8)),
            Self::HeaderFooter(h, f) => StageSpec::HeaderFooter(
                (0..i32::from(h % 3)).map(|i| 500 + i).collect(),
                (0..i32::from(f % 3)).map(|i| 600 + i).collect(),
            ),
            Self::Double => StageSpec::Double,
            Self::Materialize => StageSpec::Materialize,
        }
    }
}

#[derive(Debug, Arbitrary)]
enum FuzzOp {
    Push(i8),
    Insert(u8, i8),
    RemoveAt(u8),
    Replace(u8, i8),
    Move(u8, u8),
    Reset(Vec<i8>),
    Clear,
    Batch(Vec<(u8, i8)>),
    Link(u8, u8),
    ChildPush(u8, i8),
    ChildRemoveAt(u8, u8),
    ChildMove(u8, u8, u8),
    ChildReset(u8, Vec<i8>),
}

fn child(k: u8) -> usize {
    usize::from(k) % CHILD_COUNT
}

impl FuzzOp {
    fn op(&self) -> FamilyOp {
        let parent = FamilyOp::Parent;
        match self {
            Self::Push(x) => parent(Op::Push(i32::from(*x))),
            Self::Insert(at, x) => parent(Op::Insert(usize::from(*at), i32::from(*x))),
            Self::RemoveAt(at) => parent(Op::RemoveAt(usize::from(*at))),
            Self::Replace(at, x) => parent(Op::Replace(usize::from(*at), i32::from(*x))),
            Self::Move(from, to) => parent(Op::Move(usize::from(*from), usize::from(*to))),
            Self::Reset(items) => parent(Op::Reset(values(items, 32))),
            Self::Clear => parent(Op::Clear),
            Self::Batch(steps) => parent(Op::Batch(
                steps
                    .iter()
                    .take(8)
                    .map(|&(at, x)| {
                        if x % 2 == 0 {
                            Op::Insert(usize::from(at), i32::from(x))
                        } else {
                            Op::RemoveAt(usize::from(at))
                        }
                    })
                    .collect(),
            )),
            Self::Link(at, k) => parent(Op::Insert(usize::from(*at), link(child(*k)))),
            Self::ChildPush(k, x) => FamilyOp::Child(child(*k), Op::Push(i32::from(*x))),
            Self::ChildRemoveAt(k, at) => FamilyOp::Child(child(*k), Op::RemoveAt(usize::from(*at))),
            Self::ChildMove(k, from, to) => {
                FamilyOp::Child(child(*k), Op::Move(usize::from(*from), usize::from(*to)))
            }
            Self::ChildReset(k, items) => FamilyOp::Child(child(*k), Op::Reset(values(items, 8))),
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Input {
    source: Vec<i8>,
    children: [Vec<i8>; CHILD_COUNT],
    flatten: bool,
    stages: Vec<FuzzStage>,
    distinct_last: bool,
    ops: Vec<FuzzOp>,
}

fn values(items: &[i8], max: usize) -> Vec<i32> {
    items.iter().take(max).map(|x| i32::from(*x)).collect()
}

fuzz_target!(|input: Input| {
    let source = values(&input.source, 32);
    let children: Vec<Vec<i32>> = input.children.iter().map(|c| values(c, 8)).collect();
    let mut stages: Vec<StageSpec> = input.stages.iter().take(5).map(FuzzStage::spec).collect();
    if input.distinct_last {
        stages.push(StageSpec::Distinct);
    }
    let chain = ChainSpec::new(stages);
    let family = Family::new(source.clone(), &children);
    let collection = family.parent();
    if input.flatten && family.attach_flatten().is_err() {
        return;
    }
    if chain.attach(collection).is_err() {
        return;
    }
    let Ok(mirror) = Mirror::new(collection) else {
        return;
    };
    let mut model = source;

    for fuzz_op in input.ops.iter().take(64) {
        let op = fuzz_op.op();
        family.apply(&op).expect("generated ops are always valid");
        if let FamilyOp::Parent(op) = &op {
            op.apply_to_vec(&mut model);
        }
        assert_eq!(collection.items(), model);
        let upstream = if input.flatten {
            family.flattened()
        } else {
            collection.items()
        };
        let decorated = collection.decorated_items().expect("decorated read");
        assert!(chain.agrees(&decorated, &chain.expected(&upstream)));
        mirror.assert_matches(collection);
    }
});
