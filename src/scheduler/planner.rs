use std::collections::BTreeSet;

use parking_lot::Condvar;

use super::{Topology, WakeupState};

/// The cycle-local scheduling state of one group.
#[derive(Clone)]
pub(in crate::scheduler) struct Planner {
    /// Per-node state. Started nodes stay in the map until completed.
    wakeup: Vec<WakeupState>,

    /// Nodes that are ready to run. The smallest index is stolen first,
    /// which keeps otherwise-unordered execution deterministic per wave.
    runnable: BTreeSet<usize>,

    /// Nodes that have not completed yet.
    remaining: usize,

    /// Whether every node has completed.
    complete: bool,
}

pub(in crate::scheduler) enum StealResult {
    /// A node was stolen and marked started.
    Ready(usize),
    /// Nothing is runnable right now; wait for a completion.
    Pending,
    /// Every node has completed.
    CycleComplete,
}

impl Planner {
    pub(in crate::scheduler) fn new(
        wakeup: Vec<WakeupState>,
        runnable: BTreeSet<usize>,
        remaining: usize,
    ) -> Self {
        Self { wakeup, runnable, remaining, complete: remaining == 0 }
    }

    /// Steals a runnable node, marking it started.
    pub(in crate::scheduler) fn steal(&mut self) -> StealResult {
        if self.complete {
            return StealResult::CycleComplete;
        }

        let node = match self.runnable.pop_first() {
            Some(node) => node,
            None => return StealResult::Pending,
        };

        match &mut self.wakeup[node] {
            state @ WakeupState::Pending => *state = WakeupState::Started,
            state => panic!("node {node} was in the runnable pool but in state {state:?}"),
        }

        StealResult::Ready(node)
    }

    /// Marks a node completed and wakes its dependents. Returns the number
    /// of nodes still outstanding.
    pub(in crate::scheduler) fn complete(
        &mut self,
        node: usize,
        topology: &Topology,
        condvar: &Condvar,
    ) -> usize {
        match &mut self.wakeup[node] {
            state @ WakeupState::Started => *state = WakeupState::Completed,
            state => panic!("cannot complete node {node} in state {state:?}"),
        }

        for &dependent in topology.dependents_of(node) {
            self.remove_one_block(dependent);
        }

        self.remaining -= 1;
        if self.remaining == 0 {
            self.complete = true;
        }
        condvar.notify_all();

        self.remaining
    }

    fn remove_one_block(&mut self, node: usize) {
        match &mut self.wakeup[node] {
            WakeupState::Blocked { count } if count.get() > 1 => {
                *count = count
                    .get()
                    .checked_sub(1)
                    .and_then(std::num::NonZeroUsize::new)
                    .expect("count > 1");
            }
            state @ WakeupState::Blocked { .. } => {
                *state = WakeupState::Pending;
                let inserted = self.runnable.insert(node);
                assert!(inserted, "blocked node {node} was already in the runnable pool");
            }
            state => panic!("node {node} in state {state:?} should not have blockers"),
        }
    }
}
