use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::test_util::{Config, Flagged, Frozen, Label, Weight};
use crate::{Read, Runtime, Write};

#[test]
fn iterates_the_intersection_of_pools() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.add_component_init((0, 8), |e| Weight(e));
    runtime.add_component((4, 12), Label(1));
    runtime.commit_changes();

    let visited = Arc::new(Mutex::new(Vec::new()));
    let system = {
        let visited = Arc::clone(&visited);
        runtime
            .make_system_with_id::<(Read<Weight>, Read<Label>), _>(
                move |entity, (_, _): (&Weight, &Label)| {
                    visited.lock().expect("poisoned").push(entity);
                },
            )
            .manual()
            .build()
    };

    system.run();
    assert_eq!(*visited.lock().expect("poisoned"), (4..=8).collect::<Vec<_>>());
}

#[test]
fn iteration_is_ascending_across_fragmented_ranges() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.add_component((0, 2), Weight(0));
    runtime.add_component((10, 12), Weight(0));
    runtime.add_component((20, 20), Weight(0));
    runtime.commit_changes();

    let visited = Arc::new(Mutex::new(Vec::new()));
    let system = {
        let visited = Arc::clone(&visited);
        runtime
            .make_system_with_id::<(Read<Weight>,), _>(move |entity, (_,): (&Weight,)| {
                visited.lock().expect("poisoned").push(entity);
            })
            .manual()
            .not_parallel()
            .build()
    };

    system.run();
    assert_eq!(*visited.lock().expect("poisoned"), vec![0, 1, 2, 10, 11, 12, 20]);
}

#[test]
fn writes_are_visible_through_the_pool() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.add_component_init((0, 9), |e| Weight(e));
    runtime.commit_changes();

    let system = runtime
        .make_system::<(Write<Weight>,), _>(|(weight,): (&mut Weight,)| {
            weight.0 *= 10;
        })
        .manual()
        .build();
    system.run();

    for entity in 0..=9 {
        assert_eq!(runtime.get_component::<Weight>(entity).0, entity * 10);
    }
}

#[test]
fn unbound_parameters_observe_one_instance() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.add_component((0, 4), Weight(1));
    runtime.add_component((0, 4), Config(42));
    runtime.add_component((0, 4), Flagged);
    runtime.commit_changes();

    let hits = Arc::new(AtomicUsize::new(0));
    let system = {
        let hits = Arc::clone(&hits);
        runtime
            .make_system::<(Read<Weight>, Read<Config>, Read<Flagged>), _>(
                move |(_, config, _): (&Weight, &Config, &Flagged)| {
                    assert_eq!(config.0, 42);
                    hits.fetch_add(1, Ordering::Relaxed);
                },
            )
            .manual()
            .build()
    };

    system.run();
    assert_eq!(hits.load(Ordering::Relaxed), 5);
}

#[test]
fn shared_writes_iterate_sequentially_and_alias() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.add_component((0, 9), Config(0));
    runtime.commit_changes();

    // every entity bumps the same instance
    let system = runtime
        .make_system::<(Write<Config>,), _>(|(config,): (&mut Config,)| {
            config.0 += 1;
        })
        .manual()
        .build();
    system.run();

    assert_eq!(runtime.get_component::<Config>(7).0, 10);
}

#[test]
fn parallel_iteration_covers_every_entity() {
    let mut runtime = Runtime::with_concurrency(2);
    runtime.add_component((0, 99), Weight(0));
    runtime.add_component((200, 299), Weight(0));
    runtime.commit_changes();

    let hits = Arc::new(AtomicUsize::new(0));
    let system = {
        let hits = Arc::clone(&hits);
        runtime
            .make_system::<(Write<Weight>,), _>(move |(weight,): (&mut Weight,)| {
                weight.0 += 1;
                hits.fetch_add(1, Ordering::Relaxed);
            })
            .manual()
            .build()
    };

    system.run();
    assert_eq!(hits.load(Ordering::Relaxed), 200);
    assert_eq!(runtime.get_component::<Weight>(250).0, 1);
}

#[test]
fn rebuilds_argument_views_after_commit() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.add_component((0, 4), Weight(0));
    runtime.commit_changes();

    let hits = Arc::new(AtomicUsize::new(0));
    let system = {
        let hits = Arc::clone(&hits);
        runtime
            .make_system::<(Read<Weight>,), _>(move |_: (&Weight,)| {
                hits.fetch_add(1, Ordering::Relaxed);
            })
            .manual()
            .build()
    };

    system.run();
    assert_eq!(hits.swap(0, Ordering::Relaxed), 5);

    runtime.add_component((10, 14), Weight(0));
    runtime.remove_component::<Weight>((0, 1));
    runtime.commit_changes();

    system.run();
    assert_eq!(hits.swap(0, Ordering::Relaxed), 8);
}

#[test]
fn disabled_systems_skip_update_but_not_run() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.add_component((0, 0), Weight(0));
    runtime.commit_changes();

    let hits = Arc::new(AtomicUsize::new(0));
    let system = {
        let hits = Arc::clone(&hits);
        runtime
            .make_system::<(Read<Weight>,), _>(move |_: (&Weight,)| {
                hits.fetch_add(1, Ordering::Relaxed);
            })
            .manual()
            .build()
    };

    assert!(system.is_enabled());
    system.disable();
    assert!(!system.is_enabled());

    system.update();
    assert_eq!(hits.load(Ordering::Relaxed), 0);

    system.run();
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    system.enable();
    system.update();
    assert_eq!(hits.load(Ordering::Relaxed), 2);
}

#[test]
fn signature_reports_accesses() {
    let mut runtime = Runtime::with_concurrency(0);
    let system = runtime
        .make_system::<(Write<Weight>, Read<Label>), _>(|(_, _): (&mut Weight, &Label)| {})
        .group(3)
        .manual()
        .build();

    assert_eq!(system.signature(), "fn(&mut Weight, &Label)");
    assert_eq!(system.group(), 3);
    assert_eq!(system.type_hashes().len(), 2);
}

#[test]
#[should_panic = "cannot be bound mutably"]
fn mutable_tag_binding_is_rejected() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.make_system::<(Write<Flagged>,), _>(|_: (&mut Flagged,)| {}).build();
}

#[test]
#[should_panic = "cannot be bound mutably"]
fn mutable_immutable_binding_is_rejected() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime.make_system::<(Write<Frozen>,), _>(|_: (&mut Frozen,)| {}).build();
}

#[test]
#[should_panic = "more than once"]
fn duplicate_component_reference_is_rejected() {
    let mut runtime = Runtime::with_concurrency(0);
    runtime
        .make_system::<(Write<Weight>, Read<Weight>), _>(|_: (&mut Weight, &Weight)| {})
        .build();
}
