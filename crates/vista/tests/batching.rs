#![forbid(unsafe_code)]

//! Batch coalescing, decorator split markers and reentrancy.

use vista::prelude::*;
use vista_harness::{Mirror, Recorded, Recorder};

#[test]
fn nested_source_batches_deliver_once() {
    let numbers = ObservableCollection::from_vec(vec![3, 1, 2]);
    numbers.attach(Sort::ascending()).unwrap();
    numbers.decorated_items().unwrap();
    let decorated = Recorder::decorated(&numbers);
    let source = Recorder::source(&numbers);

    {
        let _outer = numbers.batch_update();
        numbers.push(0).unwrap();
        {
            let _inner = numbers.batch_update();
            numbers.remove_at(0).unwrap();
            assert!(numbers.is_batch_active(BatchKind::Source));
        }
        numbers.push(5).unwrap();
        assert_eq!(decorated.notices(), vec![Recorded::Begin(BatchKind::Source)]);
    }

    assert!(!numbers.is_batch_active(BatchKind::Source));
    assert_eq!(
        decorated.notices(),
        vec![
            Recorded::Begin(BatchKind::Source),
            Recorded::Changes(vec![
                CollectionChange::Added { item: 0, index: 0 },
                CollectionChange::Removed { item: 3, index: 3 },
                CollectionChange::Added { item: 5, index: 3 },
            ]),
            Recorded::End(BatchKind::Source),
        ]
    );
    assert_eq!(source.deliveries(), 1);
    assert_eq!(numbers.decorated_items().unwrap(), vec![0, 1, 2, 5]);
}

#[test]
fn empty_batch_still_brackets() {
    let numbers = ObservableCollection::from_vec(vec![1]);
    let recorder = Recorder::decorated(&numbers);
    numbers.batch_update().end().unwrap();
    assert_eq!(
        recorder.notices(),
        vec![Recorded::Begin(BatchKind::Source), Recorded::End(BatchKind::Source)]
    );
}

#[test]
fn split_replace_is_wrapped_in_decorator_markers() {
    let numbers = ObservableCollection::from_vec(vec![1, 2, 3]);
    numbers.attach(Sort::ascending()).unwrap();
    let mirror = Mirror::new(&numbers).unwrap();
    let recorder = Recorder::decorated(&numbers);

    numbers.replace(0, 10).unwrap();

    assert_eq!(
        recorder.notices(),
        vec![
            Recorded::Begin(BatchKind::Decorators),
            Recorded::Changes(vec![
                CollectionChange::Removed { item: 1, index: 0 },
                CollectionChange::Added { item: 10, index: 2 },
            ]),
            Recorded::End(BatchKind::Decorators),
        ]
    );
    assert!(!numbers.is_batch_active(BatchKind::Decorators));
    mirror.assert_matches(&numbers);
}

#[test]
fn in_place_replace_has_no_markers() {
    let numbers = ObservableCollection::from_vec(vec![1, 5, 9]);
    numbers.attach(Sort::ascending()).unwrap();
    numbers.decorated_items().unwrap();
    let recorder = Recorder::decorated(&numbers);

    numbers.replace(1, 6).unwrap();

    assert_eq!(
        recorder.notices(),
        vec![Recorded::Changes(vec![CollectionChange::Replaced {
            old_item: 5,
            new_item: 6,
            index: 1
        }])]
    );
}

#[test]
fn mutation_from_a_predicate_is_an_invariant_violation() {
    let numbers = ObservableCollection::from_vec(vec![1, 2]);
    let handle = numbers.clone();
    numbers
        .attach(Filter::new(move |x: &i32| {
            if *x == 99 {
                let inner = handle.push(0);
                assert!(matches!(inner, Err(PipelineError::Reentrant { .. })));
            }
            x % 2 == 0
        }))
        .unwrap();
    assert_eq!(numbers.decorated_items().unwrap(), vec![2]);

    let err = numbers.push(99).unwrap_err();

    assert!(matches!(err, PipelineError::InvariantViolation(_)));
    assert!(numbers.is_faulted());
    assert_eq!(numbers.items(), vec![1, 2, 99]);
}

#[test]
fn listener_driven_mutation_lands_after_the_current_delivery() {
    let numbers = ObservableCollection::from_vec(Vec::<i32>::new());
    let recorder = Recorder::decorated(&numbers);
    let echo = numbers.clone();
    let _sub = numbers.subscribe(move |changes: &[CollectionChange<i32>]| {
        for change in changes {
            match change {
                CollectionChange::Added { item, .. } if *item < 3 => echo.push(item + 1).unwrap(),
                _ => {}
            }
        }
    });

    numbers.push(1).unwrap();

    assert_eq!(numbers.items(), vec![1, 2, 3]);
    assert_eq!(recorder.deliveries(), 3);
}
