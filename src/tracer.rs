//! Hooks into the update cycle for testing, profiling and logging.
//!
//! A [`Tracer`] receives an event for every observable step the runtime
//! takes: the commit of each dirty pool, argument-view rebuilds, worker
//! steals, and system execution. Every hook has an empty default body, so
//! implementations override only what they care about.

use crate::store::TypeHash;

/// A handler that receives scheduling-related events.
pub trait Tracer: Sync {
    /// An update cycle starts.
    fn start_cycle(&self) {}

    /// An update cycle ends.
    fn end_cycle(&self) {}

    /// A pool applied deferred mutations during commit.
    fn commit_pool(&self, _ty: TypeHash, _added: bool, _removed: bool) {}

    /// A system rebuilt its argument views because an input pool changed.
    fn rebuild_args(&self, _system: &str) {}

    /// A thread tried to steal a task, but all tasks have started.
    fn steal_return_complete(&self, _thread: Thread) {}

    /// A thread tried to steal a task, but no tasks are runnable yet.
    fn steal_return_pending(&self, _thread: Thread) {}

    /// A system starts running on the given thread.
    fn start_run_system(&self, _thread: Thread, _system: &str) {}

    /// A system finished running on the given thread.
    fn end_run_system(&self, _thread: Thread, _system: &str) {}

    /// A system completed; `remaining` systems are left in its group.
    fn complete_system(&self, _system: &str, _remaining: usize) {}
}

/// The thread a scheduling event happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Thread {
    /// The thread that invoked the update.
    Main,
    /// A worker thread. The index is in the range `0..concurrency`.
    Worker(usize),
}

/// An empty tracer.
pub struct Noop;

impl Tracer for Noop {}

/// A tracer that logs all events through the `log` crate.
pub struct Log(
    /// The log level to log events with.
    pub log::Level,
);

impl Tracer for Log {
    fn start_cycle(&self) { log::log!(self.0, "start_cycle") }

    fn end_cycle(&self) { log::log!(self.0, "end_cycle") }

    fn commit_pool(&self, ty: TypeHash, added: bool, removed: bool) {
        log::log!(self.0, "commit_pool: {ty} (added = {added}, removed = {removed})");
    }

    fn rebuild_args(&self, system: &str) {
        log::log!(self.0, "rebuild_args: {system}");
    }

    fn steal_return_complete(&self, thread: Thread) {
        log::log!(self.0, "steal_return_complete: {thread:?}");
    }

    fn steal_return_pending(&self, thread: Thread) {
        log::log!(self.0, "steal_return_pending: {thread:?}");
    }

    fn start_run_system(&self, thread: Thread, system: &str) {
        log::log!(self.0, "start_run_system: {system} on {thread:?}");
    }

    fn end_run_system(&self, thread: Thread, system: &str) {
        log::log!(self.0, "end_run_system: {system} on {thread:?}");
    }

    fn complete_system(&self, system: &str, remaining: usize) {
        log::log!(self.0, "complete_system: {system} ({remaining} remaining in group)");
    }
}
