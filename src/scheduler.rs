//! Derives the dependency graph over systems and drives the update cycle.
//!
//! Systems are partitioned by group; groups run strictly in ascending
//! order. Within a group, the pairwise [`depends_on`](
//! crate::system::SystemMeta::depends_on) relation over systems forms a
//! DAG (registration order breaks ties), and the executor runs systems as
//! soon as all of their dependencies completed, stealing runnable work
//! onto a pool of worker threads.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::system::{AnySystem, SystemMeta};
use crate::tracer::Tracer;

mod executor;
use executor::Executor;

mod planner;
use planner::Planner;

mod topology;
use topology::Topology;

#[cfg(test)]
mod tests;

/// A registered system together with its immutable metadata. The metadata
/// is read freely for dependency analysis; the system itself is locked by
/// exactly one worker at a time.
pub(crate) struct SystemCell {
    pub(crate) meta:   Arc<SystemMeta>,
    pub(crate) system: Mutex<Box<dyn AnySystem>>,
}

#[derive(Debug, Clone, Copy)]
enum WakeupState {
    /// The node becomes runnable after `count` dependencies complete.
    Blocked { count: NonZeroUsize },
    /// The node is in the runnable pool.
    Pending,
    /// The node is executing on one of the threads.
    Started,
    /// The node has completed.
    Completed,
}

/// One group's schedule: all member systems in registration order, the
/// automatically-updated subset, and the DAG over that subset.
struct Group {
    members:  Vec<usize>,
    auto:     Vec<usize>,
    topology: Topology,
}

pub(crate) struct Scheduler {
    cells:    Vec<Arc<SystemCell>>,
    groups:   BTreeMap<i32, Group>,
    stale:    bool,
    executor: Executor,
}

impl Scheduler {
    pub(crate) fn new(concurrency: usize) -> Self {
        Self {
            cells: Vec::new(),
            groups: BTreeMap::new(),
            stale: false,
            executor: Executor::new(concurrency),
        }
    }

    pub(crate) fn add(&mut self, cell: Arc<SystemCell>) {
        self.cells.push(cell);
        self.stale = true;
    }

    /// Runs one full cycle: per group, rebuild stale argument views, then
    /// execute the group's automatic systems honoring the DAG.
    pub(crate) fn run(&mut self, tracer: &dyn Tracer) {
        if self.stale {
            self.rebuild_groups();
            self.stale = false;
        }

        for group in self.groups.values() {
            for &index in &group.members {
                let cell = &self.cells[index];
                let rebuilt = cell.system.lock().refresh(false);
                if rebuilt {
                    tracer.rebuild_args(&cell.meta.name);
                }
            }

            if !group.auto.is_empty() {
                self.executor.execute(&group.topology, &group.auto, &self.cells, tracer);
            }
        }
    }

    fn rebuild_groups(&mut self) {
        let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (index, cell) in self.cells.iter().enumerate() {
            members.entry(cell.meta.group).or_default().push(index);
        }

        self.groups = members
            .into_iter()
            .map(|(group, members)| {
                let auto: Vec<usize> = members
                    .iter()
                    .copied()
                    .filter(|&index| self.cells[index].meta.automatic)
                    .collect();
                let metas: Vec<Arc<SystemMeta>> =
                    auto.iter().map(|&index| Arc::clone(&self.cells[index].meta)).collect();
                let topology = Topology::build(&metas);
                (group, Group { members, auto, topology })
            })
            .collect();
    }
}
