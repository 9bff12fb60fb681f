use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::planner::{Planner, StealResult};
use super::{SystemCell, Topology};
use crate::tracer::{Thread, Tracer};

/// Runs one group's DAG on a pool of worker threads plus the calling
/// thread. With a concurrency of 0 everything runs on the calling thread,
/// which is valid wherever threading is unavailable.
pub(in crate::scheduler) struct Executor {
    thread_pool: Option<rayon::ThreadPool>,
    concurrency: usize,
}

impl Executor {
    pub(in crate::scheduler) fn new(concurrency: usize) -> Self {
        Self {
            thread_pool: (concurrency > 0).then(|| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(concurrency)
                    .thread_name(|index| format!("runec worker #{index}"))
                    .build()
                    .expect("failed to create the worker thread pool")
            }),
            concurrency,
        }
    }

    pub(in crate::scheduler) fn execute(
        &self,
        topology: &Topology,
        members: &[usize],
        cells: &[Arc<SystemCell>],
        tracer: &dyn Tracer,
    ) {
        let planner = Mutex::new(topology.initial_planner().clone());
        let condvar = Condvar::new();

        let context = Context {
            topology,
            planner: &planner,
            condvar: &condvar,
            members,
            cells,
            tracer,
        };

        match &self.thread_pool {
            Some(pool) => pool.in_place_scope(|scope| {
                for worker in 0..self.concurrency {
                    scope.spawn(move |_| worker_loop(context, Thread::Worker(worker)));
                }
                worker_loop(context, Thread::Main);
            }),
            None => worker_loop(context, Thread::Main),
        }
    }
}

fn worker_loop(context: Context<'_>, thread: Thread) {
    let mut planner = context.planner.lock();

    loop {
        match planner.steal() {
            StealResult::CycleComplete => {
                context.tracer.steal_return_complete(thread);
                return;
            }
            StealResult::Pending => {
                context.tracer.steal_return_pending(thread);
                context.condvar.wait(&mut planner);
            }
            StealResult::Ready(node) => {
                let cell = &context.cells[context.members[node]];

                MutexGuard::unlocked(&mut planner, || {
                    let mut system = cell
                        .system
                        .try_lock()
                        .expect("a system was scheduled on two workers at once");

                    context.tracer.start_run_system(thread, &cell.meta.name);
                    system.update();
                    context.tracer.end_run_system(thread, &cell.meta.name);
                });

                let remaining = planner.complete(node, context.topology, context.condvar);
                context.tracer.complete_system(&cell.meta.name, remaining);
            }
        }
    }
}

#[derive(Clone, Copy)]
struct Context<'t> {
    topology: &'t Topology,
    planner:  &'t Mutex<Planner>,
    condvar:  &'t Condvar,
    members:  &'t [usize],
    cells:    &'t [Arc<SystemCell>],
    tracer:   &'t dyn Tracer,
}
