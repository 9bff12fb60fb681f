use std::sync::Arc;

use parking_lot::Condvar;

use super::planner::StealResult;
use super::topology::Topology;
use crate::system::{Read, Signature, SystemMeta, Write};
use crate::test_util::Marker;

fn meta<S: Signature>(group: i32) -> Arc<SystemMeta> {
    Arc::new(SystemMeta::new::<S>(false, group, true, true))
}

/// The six-system example: three component types, mixed readers and
/// writers.
fn example_metas() -> Vec<Arc<SystemMeta>> {
    vec![
        meta::<(Write<Marker<0>>, Read<Marker<1>>)>(0), // s1
        meta::<(Write<Marker<1>>,)>(0),                 // s2
        meta::<(Write<Marker<2>>,)>(0),                 // s3
        meta::<(Read<Marker<0>>,)>(0),                  // s4
        meta::<(Write<Marker<2>>, Read<Marker<0>>)>(0), // s5
        meta::<(Read<Marker<2>>,)>(0),                  // s6
    ]
}

#[test]
fn depends_on_matrix() {
    let metas = example_metas();
    let expects = |a: usize, b: usize| metas[a].depends_on(&metas[b]);

    // s2 writes Marker<1>, which s1 reads
    assert!(expects(1, 0));

    // s3 shares nothing with s1 or s2
    assert!(!expects(2, 0));
    assert!(!expects(2, 1));

    // s4 reads Marker<0>, which s1 writes
    assert!(expects(3, 0));
    assert!(!expects(3, 1));
    assert!(!expects(3, 2));

    // s5 reads Marker<0> (written by s1) and writes Marker<2> (written by s3)
    assert!(expects(4, 0));
    assert!(!expects(4, 1));
    assert!(expects(4, 2));
    assert!(!expects(4, 3)); // both only read Marker<0>

    // s6 reads Marker<2>, written by both s3 and s5
    assert!(!expects(5, 0));
    assert!(!expects(5, 1));
    assert!(expects(5, 2));
    assert!(!expects(5, 3));
    assert!(expects(5, 4));
}

#[test]
fn read_only_pairs_are_independent() {
    let a = meta::<(Read<Marker<0>>, Read<Marker<1>>)>(0);
    let b = meta::<(Read<Marker<0>>, Read<Marker<1>>)>(0);
    assert!(!a.depends_on(&b));
    assert!(!b.depends_on(&a));
}

#[test]
fn writer_pairs_depend_both_ways() {
    let a = meta::<(Write<Marker<0>>,)>(0);
    let b = meta::<(Write<Marker<0>>,)>(0);
    assert!(a.depends_on(&b));
    assert!(b.depends_on(&a));
}

#[test]
fn planner_releases_nodes_in_dependency_order() {
    let metas = example_metas();
    let topology = Topology::build(&metas);
    let condvar = Condvar::new();
    let mut planner = topology.initial_planner().clone();

    let mut started: Vec<usize> = Vec::new();
    let mut completions = 0;
    loop {
        match planner.steal() {
            StealResult::CycleComplete => break,
            StealResult::Ready(node) => started.push(node),
            StealResult::Pending => {
                // single-threaded drive: complete the oldest started node
                let node = started[completions];
                planner.complete(node, &topology, &condvar);
                completions += 1;
            }
        }
    }
    while completions < started.len() {
        planner.complete(started[completions], &topology, &condvar);
        completions += 1;
    }

    assert_eq!(started.len(), 6);
    let position = |node: usize| {
        started.iter().position(|&n| n == node).expect("every node starts")
    };

    // registration-order DAG: s1 and s3 are roots
    assert!(position(0) < position(1)); // s1 before s2
    assert!(position(0) < position(3)); // s1 before s4
    assert!(position(0) < position(4)); // s1 before s5
    assert!(position(2) < position(4)); // s3 before s5
    assert!(position(4) < position(5)); // s5 before s6
}

#[test]
fn empty_topology_completes_immediately() {
    let topology = Topology::build(&[]);
    let mut planner = topology.initial_planner().clone();
    assert!(matches!(planner.steal(), StealResult::CycleComplete));
}

#[test]
fn chain_topology_runs_one_at_a_time() {
    let metas = vec![
        meta::<(Write<Marker<7>>,)>(0),
        meta::<(Write<Marker<7>>,)>(0),
        meta::<(Write<Marker<7>>,)>(0),
    ];
    let topology = Topology::build(&metas);
    let condvar = Condvar::new();
    let mut planner = topology.initial_planner().clone();

    for expected in 0..3 {
        let node = match planner.steal() {
            StealResult::Ready(node) => node,
            _ => panic!("node {expected} should be runnable"),
        };
        assert_eq!(node, expected);
        assert!(
            matches!(planner.steal(), StealResult::Pending),
            "chained systems must not run concurrently",
        );
        planner.complete(node, &topology, &condvar);
    }
    assert!(matches!(planner.steal(), StealResult::CycleComplete));
}
