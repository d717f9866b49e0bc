#![forbid(unsafe_code)]

//! Event/state equivalence over random chains and mutation scripts.
//!
//! For every script: the source matches a plain `Vec` model, the decorated
//! output matches the from-scratch reference model (as a set after a plain
//! `Distinct`), and a mirror fed only change events matches the decorated
//! output exactly.

use proptest::prelude::*;
use vista::prelude::*;
use vista_harness::model::{ChainSpec, StageSpec};
use vista_harness::{Family, Mirror, Op, init_test_logging, strategy};

fn build(source: &[i32], chain: &ChainSpec) -> ObservableCollection<i32> {
    let collection = ObservableCollection::from_vec(source.to_vec());
    chain
        .attach(&collection)
        .unwrap_or_else(|e| panic!("attach failed: {e}"));
    collection
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 96, .. ProptestConfig::default() })]

    #[test]
    fn events_replay_to_the_decorated_output(
        source in strategy::source(16),
        chain in strategy::chain(),
        ops in strategy::ops(24),
    ) {
        let collection = build(&source, &chain);
        let mirror = Mirror::new(&collection).unwrap();
        let mut model = source.clone();

        for op in &ops {
            op.apply(&collection).unwrap();
            op.apply_to_vec(&mut model);

            prop_assert_eq!(collection.items(), model.clone());
            let decorated = collection.decorated_items().unwrap();
            let expected = chain.expected(&model);
            prop_assert!(
                chain.agrees(&decorated, &expected),
                "after {:?}: {:?} vs {:?}", op, decorated, expected
            );
            prop_assert!(mirror.errors().is_empty(), "unapplicable: {:?}", mirror.errors());
            prop_assert_eq!(mirror.items(), decorated);
        }
        prop_assert!(!collection.is_faulted());
    }

    #[test]
    fn reset_with_current_source_is_idempotent(
        source in strategy::source(16),
        chain in strategy::chain(),
        ops in strategy::ops(12),
    ) {
        let collection = build(&source, &chain);
        for op in &ops {
            op.apply(&collection).unwrap();
        }
        let before = collection.decorated_items().unwrap();
        let version = collection.version();

        collection.reset(collection.items()).unwrap();

        let after = collection.decorated_items().unwrap();
        prop_assert!(chain.agrees(&after, &before), "{:?} vs {:?}", after, before);
        prop_assert_eq!(collection.version(), version + 1);
    }

    #[test]
    fn late_attach_matches_early_attach(
        source in strategy::source(16),
        chain in strategy::chain(),
        ops in strategy::ops(12),
    ) {
        let early = build(&source, &chain);
        let late = ObservableCollection::from_vec(source.clone());
        for op in &ops {
            op.apply(&early).unwrap();
            op.apply(&late).unwrap();
        }
        chain.attach(&late).unwrap();

        let (early, late) = (early.decorated_items().unwrap(), late.decorated_items().unwrap());
        prop_assert!(chain.agrees(&early, &late), "{:?} vs {:?}", early, late);
    }

    #[test]
    fn nested_edits_replay_through_flatten(
        parent in strategy::family_source(10),
        children in strategy::child_sources(),
        chain in strategy::chain(),
        ops in strategy::family_ops(24),
    ) {
        let family = Family::new(parent, &children);
        family.attach_flatten().unwrap();
        chain.attach(family.parent()).unwrap();
        let mirror = Mirror::new(family.parent()).unwrap();

        for op in &ops {
            family.apply(op).unwrap();

            let decorated = family.parent().decorated_items().unwrap();
            let expected = chain.expected(&family.flattened());
            prop_assert!(
                chain.agrees(&decorated, &expected),
                "after {:?}: {:?} vs {:?}", op, decorated, expected
            );
            prop_assert!(mirror.errors().is_empty(), "unapplicable: {:?}", mirror.errors());
            prop_assert_eq!(mirror.items(), decorated);
        }
        prop_assert!(!family.parent().is_faulted());
    }
}

#[test]
fn every_modeled_stage_survives_a_fixed_script() {
    init_test_logging();
    let stages = [
        StageSpec::FilterEven,
        StageSpec::FilterAbove(2),
        StageSpec::SortAscending,
        StageSpec::SortDescending,
        StageSpec::Distinct,
        StageSpec::DistinctSorted,
        StageSpec::GroupByMod3,
        StageSpec::Limit(2),
        StageSpec::LimitEven(1),
        StageSpec::HeaderFooter(vec![100], vec![200]),
        StageSpec::Double,
        StageSpec::Materialize,
    ];
    let script = [
        Op::Push(4),
        Op::Insert(0, 7),
        Op::Replace(1, 3),
        Op::Move(0, 3),
        Op::RemoveAt(2),
        Op::Batch(vec![Op::Push(6), Op::Insert(1, 6), Op::RemoveAt(0)]),
        Op::Reset(vec![9, 2, 2, 5]),
        Op::Clear,
        Op::Push(1),
    ];
    for stage in stages {
        let chain = ChainSpec::new(vec![stage.clone()]);
        let collection = build(&[1, 2, 3, 4, 5], &chain);
        let mirror = Mirror::new(&collection).unwrap();
        let mut model = collection.items();
        for op in &script {
            op.apply(&collection).unwrap();
            op.apply_to_vec(&mut model);
            let decorated = collection.decorated_items().unwrap();
            let expected = chain.expected(&model);
            assert!(
                chain.agrees(&decorated, &expected),
                "{stage:?} after {op:?}: {decorated:?} vs {expected:?}"
            );
            mirror.assert_matches(&collection);
        }
    }
}
