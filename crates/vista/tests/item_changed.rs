#![forbid(unsafe_code)]

//! Debounced item-changed notifications, the reset threshold, and timers.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use proptest::prelude::*;
use tracing_test::traced_test;
use vista::prelude::*;
use vista_harness::model::{ChainSpec, StageSpec, group_header};
use vista_harness::{Mirror, Recorder, strategy};
use web_time::Instant;

#[derive(Debug, Clone, PartialEq)]
struct Score {
    name: &'static str,
    value: Rc<Cell<i32>>,
}

fn score(name: &'static str, value: i32) -> Score {
    Score {
        name,
        value: Rc::new(Cell::new(value)),
    }
}

fn names(collection: &ObservableCollection<Score>) -> Vec<&'static str> {
    collection
        .decorated_items()
        .unwrap()
        .iter()
        .map(|s| s.name)
        .collect()
}

fn ranked(items: Vec<Score>, config: PipelineConfig) -> ObservableCollection<Score> {
    let collection = ObservableCollection::from_vec_with_config(items, config);
    collection.attach(Sort::by_key(|s: &Score| s.value.get())).unwrap();
    collection.decorated_items().unwrap();
    collection
}

#[test]
fn debounced_change_waits_for_the_window() {
    let (a, b, c) = (score("a", 1), score("b", 2), score("c", 3));
    let config = PipelineConfig::default().with_item_changed_delay(Duration::from_millis(50));
    let ranking = ranked(vec![a.clone(), b, c], config);
    let recorder = Recorder::decorated(&ranking);
    let mirror = Mirror::new(&ranking).unwrap();

    a.value.set(10);
    ranking.raise_item_changed(a.clone(), ChangeArgs::property("value")).unwrap();
    ranking.raise_item_changed(a.clone(), ChangeArgs::property("value")).unwrap();
    assert_eq!(ranking.pending_item_changes(), 1);
    assert!(recorder.changes().is_empty());

    let raised = Instant::now();
    assert!(ranking.poll_item_changes(raised + Duration::from_millis(60)).unwrap());

    assert_eq!(ranking.pending_item_changes(), 0);
    assert_eq!(
        recorder.changes(),
        vec![
            CollectionChange::Moved {
                item: a.clone(),
                old_index: 0,
                new_index: 2
            },
            CollectionChange::Changed {
                item: a,
                index: 2,
                args: ChangeArgs::property("value")
            },
        ]
    );
    assert_eq!(names(&ranking), vec!["b", "c", "a"]);
    mirror.assert_matches(&ranking);
}

#[test]
fn zero_delay_applies_at_once() {
    let (a, b) = (score("a", 1), score("b", 2));
    let ranking = ranked(vec![a.clone(), b], PipelineConfig::default());

    a.value.set(5);
    ranking.raise_item_changed(a, ChangeArgs::none()).unwrap();

    assert_eq!(ranking.pending_item_changes(), 0);
    assert_eq!(names(&ranking), vec!["b", "a"]);
}

#[test]
#[traced_test]
fn burst_over_threshold_becomes_one_reset() {
    let items: Vec<Score> = (0..5).map(|i| score("s", i)).collect();
    let config = PipelineConfig::default()
        .with_item_changed_delay(Duration::from_secs(60))
        .with_reset_threshold(2);
    let ranking = ranked(items.clone(), config);
    let recorder = Recorder::decorated(&ranking);
    let version = ranking.version();

    for (i, item) in items.iter().enumerate() {
        item.value.set(100 - i32::try_from(i).unwrap());
        ranking.raise_item_changed(item.clone(), ChangeArgs::none()).unwrap();
    }
    assert_eq!(ranking.pending_item_changes(), 5);
    ranking.flush_item_changes().unwrap();

    let changes = recorder.changes();
    assert_eq!(changes.len(), 1);
    assert!(matches!(changes[0], CollectionChange::Reset { .. }));
    assert_eq!(ranking.version(), version + 1);
    let values: Vec<i32> = ranking
        .decorated_items()
        .unwrap()
        .iter()
        .map(|s| s.value.get())
        .collect();
    assert_eq!(values, vec![96, 97, 98, 99, 100]);
    assert!(logs_contain("item-changed burst over threshold"));
}

#[test]
#[traced_test]
fn vanished_item_is_dropped() {
    let ghost = score("ghost", 0);
    let config = PipelineConfig::default().with_item_changed_delay(Duration::from_secs(60));
    let ranking = ranked(vec![score("a", 1)], config);
    let recorder = Recorder::decorated(&ranking);

    ranking.raise_item_changed(ghost, ChangeArgs::none()).unwrap();
    ranking.flush_item_changes().unwrap();

    assert!(recorder.changes().is_empty());
    assert!(logs_contain("changed item is no longer present"));
}

#[test]
fn timer_drives_the_flush_and_outlives_nothing() {
    let a = score("a", 1);
    let config = PipelineConfig::default().with_item_changed_delay(Duration::from_millis(20));
    let ranking = ranked(vec![a.clone(), score("b", 2)], config);
    let timer = ranking.item_change_timer();

    a.value.set(3);
    ranking.raise_item_changed(a, ChangeArgs::none()).unwrap();
    assert!(timer.is_alive());
    assert!(timer.tick(Instant::now() + Duration::from_secs(1)).unwrap());
    assert_eq!(names(&ranking), vec!["b", "a"]);

    drop(ranking);
    assert!(!timer.is_alive());
    assert!(!timer.fire().unwrap());
}

#[test]
fn dispose_discards_pending_changes() {
    let a = score("a", 1);
    let config = PipelineConfig::default().with_item_changed_delay(Duration::from_secs(60));
    let ranking = ranked(vec![a.clone()], config);
    let timer = ranking.item_change_timer();
    ranking.raise_item_changed(a.clone(), ChangeArgs::none()).unwrap();

    ranking.dispose().unwrap();

    assert_eq!(ranking.pending_item_changes(), 0);
    assert!(!timer.is_alive());
    assert!(matches!(
        ranking.raise_item_changed(a, ChangeArgs::none()),
        Err(PipelineError::Disposed)
    ));
    ranking.dispose().unwrap();
}

/// A source item whose sort and group key lives behind a shared cell.
#[derive(Debug, Clone, PartialEq)]
struct Tracked {
    id: u32,
    value: Rc<Cell<i32>>,
}

fn tracked(id: u32, value: i32) -> Tracked {
    Tracked {
        id,
        value: Rc::new(Cell::new(value)),
    }
}

fn values(items: &[Tracked]) -> Vec<i32> {
    items.iter().map(|t| t.value.get()).collect()
}

#[derive(Debug, Clone)]
enum Step {
    /// Set one item's value and raise its change.
    Bump(usize, i32),
    /// Set several values, raise them all, then flush once.
    Burst(Vec<(usize, i32)>),
    Push(i32),
    RemoveAt(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        5 => (any::<usize>(), strategy::value()).prop_map(|(at, v)| Step::Bump(at, v)),
        2 => prop::collection::vec((any::<usize>(), strategy::value()), 1..6).prop_map(Step::Burst),
        2 => strategy::value().prop_map(Step::Push),
        1 => any::<usize>().prop_map(Step::RemoveAt),
    ]
}

fn bump(collection: &ObservableCollection<Tracked>, at: usize, value: i32) {
    let source = collection.items();
    if source.is_empty() {
        return;
    }
    let item = &source[at % source.len()];
    item.value.set(value);
    collection
        .raise_item_changed(item.clone(), ChangeArgs::property("value"))
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn raised_changes_keep_filter_sort_group_in_step(
        initial in strategy::source(12),
        min in -10i32..10,
        steps in prop::collection::vec(step(), 1..20),
    ) {
        let config = PipelineConfig::default()
            .with_item_changed_delay(Duration::from_secs(60))
            .with_reset_threshold(3);
        let mut next_id = 0;
        let items: Vec<Tracked> = initial
            .iter()
            .map(|&v| {
                next_id += 1;
                tracked(next_id, v)
            })
            .collect();
        let collection = ObservableCollection::from_vec_with_config(items, config);
        collection.attach(Filter::new(move |t: &Tracked| t.value.get() > min)).unwrap();
        collection.attach(Sort::by_key(|t: &Tracked| t.value.get())).unwrap();
        collection
            .attach(Group::new(
                |t: &Tracked| t.value.get().rem_euclid(3),
                |key: &i32, _: &Tracked| tracked(u32::MAX, group_header(*key)),
            ))
            .unwrap();
        let mirror = Mirror::new(&collection).unwrap();
        let chain = ChainSpec::new(vec![
            StageSpec::FilterAbove(min),
            StageSpec::SortAscending,
            StageSpec::GroupByMod3,
        ]);

        for step in &steps {
            match step {
                Step::Bump(at, v) => bump(&collection, *at, *v),
                Step::Burst(bumps) => {
                    for &(at, v) in bumps {
                        bump(&collection, at, v);
                    }
                }
                Step::Push(v) => {
                    next_id += 1;
                    collection.push(tracked(next_id, *v)).unwrap();
                }
                Step::RemoveAt(at) => {
                    let len = collection.len();
                    if len > 0 {
                        collection.remove_at(at % len).unwrap();
                    }
                }
            }
            collection.flush_item_changes().unwrap();
            prop_assert_eq!(collection.pending_item_changes(), 0);

            let decorated = collection.decorated_items().unwrap();
            prop_assert_eq!(
                values(&decorated),
                chain.expected(&values(&collection.items())),
                "after {:?}", step
            );
            prop_assert!(mirror.errors().is_empty(), "unapplicable: {:?}", mirror.errors());
            prop_assert_eq!(values(&mirror.items()), values(&decorated));
        }
    }
}
