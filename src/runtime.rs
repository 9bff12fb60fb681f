//! The owned entry point tying pools and the scheduler together.
//!
//! A [`Runtime`] is an explicitly owned value; there is no process-wide
//! context. Mutations enqueue into per-thread buffers and become visible
//! after [`commit_changes`](Runtime::commit_changes). A full update cycle
//! is commit, then one scheduled run of every automatic system, with pool
//! dirty flags cleared at the end:
//!
//! ```text
//! enqueue (any thread) -> commit (coordinator) -> run (workers)
//! ```
//!
//! Enqueuing against a pool that a currently-executing system references
//! is a programmer error; the pool lock turns it into a block rather than
//! a data race, but the caller must not rely on that.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ops;
use std::sync::Arc;
use std::thread;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock};

use crate::comp::Component;
use crate::pool::Pool;
use crate::range::{EntityId, EntityRange};
use crate::scheduler::{Scheduler, SystemCell};
use crate::store::{Store, TypeHash};
use crate::system::{Signature, SortFn, System, SystemFn, SystemMeta, WithId, WithoutId};
use crate::tracer::{Noop, Tracer};
use crate::util;

/// The ECS runtime: owns every component pool and every system.
pub struct Runtime {
    store:     Store,
    scheduler: Scheduler,
}

impl Runtime {
    /// Creates a runtime with one worker thread per available CPU beyond
    /// the calling thread.
    pub fn new() -> Self {
        let concurrency = thread::available_parallelism().map_or(0, |n| n.get() - 1);
        Self::with_concurrency(concurrency)
    }

    /// Creates a runtime with exactly `concurrency` worker threads.
    ///
    /// The calling thread always participates in execution, so a
    /// concurrency of 0 schedules every system onto the calling thread.
    /// Systems with a parallel execution policy may still fan their inner
    /// entity loop out to the global rayon pool.
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            store:     Store::new(concurrency + 1),
            scheduler: Scheduler::new(concurrency),
        }
    }

    /// Queues `value` as the `T` component of every entity in `target`.
    /// Applied by the next [`commit_changes`](Self::commit_changes).
    ///
    /// The entities must not hold `T` already, nor be queued to receive it.
    pub fn add_component<T: Component + Clone>(
        &self,
        target: impl Into<EntityRange>,
        value: T,
    ) {
        self.store.pool::<T>().read().add(target.into(), value);
    }

    /// Queues a per-entity initializer for the `T` component of every
    /// entity in `target`. Same preconditions as
    /// [`add_component`](Self::add_component).
    pub fn add_component_init<T: Component>(
        &self,
        target: impl Into<EntityRange>,
        init: impl Fn(EntityId) -> T + Send + 'static,
    ) {
        self.store.pool::<T>().read().add_init(target.into(), init);
    }

    /// Queues the removal of the `T` component from every entity in
    /// `target`. Applied by the next [`commit_changes`](Self::commit_changes).
    ///
    /// The entities must hold `T` and must not already be queued to lose it.
    pub fn remove_component<T: Component>(&self, target: impl Into<EntityRange>) {
        self.store.pool::<T>().read().remove(target.into());
    }

    /// Returns the `T` component of entity `id`.
    ///
    /// Panics if the entity does not hold `T`. The returned guard keeps the
    /// pool readable but not committable; drop it before the next commit.
    pub fn get_component<T: Component>(&self, id: EntityId) -> ComponentRef<T> {
        let guard = self.store.pool::<T>().read_arc();
        let flat = locate::<T>(&guard, id);
        ComponentRef { guard, flat }
    }

    /// Returns the `T` component of entity `id` for modification outside of
    /// systems.
    ///
    /// Panics if the entity does not hold `T`.
    pub fn get_component_mut<T: Component>(&self, id: EntityId) -> ComponentMut<T> {
        let guard = self.store.pool::<T>().write_arc();
        let flat = locate::<T>(&guard, id);
        ComponentMut { guard, flat }
    }

    /// Returns whether every entity in `target` holds the `T` component.
    pub fn has_component<T: Component>(&self, target: impl Into<EntityRange>) -> bool {
        match self.store.try_pool::<T>() {
            Some(pool) => pool.read().has_entity(target.into()),
            None => false,
        }
    }

    /// The number of entities holding the `T` component.
    pub fn entity_count<T: Component>(&self) -> usize {
        self.store.try_pool::<T>().map_or(0, |pool| pool.read().num_entities())
    }

    /// The number of stored `T` values. Differs from
    /// [`entity_count`](Self::entity_count) for shared and tag components.
    pub fn component_count<T: Component>(&self) -> usize {
        self.store.try_pool::<T>().map_or(0, |pool| pool.read().num_components())
    }

    /// Drops every entity and value from the `T` pool, discarding queued
    /// mutations.
    pub fn clear_pool<T: Component>(&mut self) {
        if let Some(pool) = self.store.try_pool::<T>() {
            pool.write().clear();
        }
    }

    /// Declares a system over signature `S`.
    ///
    /// The user function receives one argument tuple per matching entity,
    /// shaped by the signature: `&T` for [`Read`](crate::Read) parameters
    /// and `&mut T` for [`Write`](crate::Write) parameters. Returns a
    /// builder for the remaining options; the system only exists once
    /// [`build`](SystemBuilder::build) is called.
    pub fn make_system<S, F>(&mut self, func: F) -> SystemBuilder<'_, S, WithoutId<F>>
    where
        S: Signature,
        F: for<'e> Fn(S::Args<'e>) + Send + Sync + 'static,
    {
        SystemBuilder::new(self, false, WithoutId(func))
    }

    /// Like [`make_system`](Self::make_system), but the user function also
    /// receives the entity id ahead of the argument tuple.
    pub fn make_system_with_id<S, F>(&mut self, func: F) -> SystemBuilder<'_, S, WithId<F>>
    where
        S: Signature,
        F: for<'e> Fn(EntityId, S::Args<'e>) + Send + Sync + 'static,
    {
        SystemBuilder::new(self, true, WithId(func))
    }

    /// Drains every pool's deferred buffers and applies removes, then adds.
    /// Dirty flags stay set until the end of the next
    /// [`run_systems`](Self::run_systems).
    pub fn commit_changes(&mut self) {
        self.store.commit(&Noop);
    }

    /// Runs every enabled automatic system once, honoring groups and the
    /// dependency DAG, then clears all pool dirty flags. Legal without a
    /// preceding commit; it then runs over the already-applied state.
    pub fn run_systems(&mut self) {
        self.scheduler.run(&Noop);
        self.store.clear_flags();
    }

    /// [`commit_changes`](Self::commit_changes) followed by
    /// [`run_systems`](Self::run_systems).
    pub fn update_systems(&mut self) {
        self.update(&Noop);
    }

    /// A full update cycle reporting each step to `tracer`.
    pub fn update(&mut self, tracer: &dyn Tracer) {
        tracer.start_cycle();
        self.store.commit(tracer);
        self.scheduler.run(tracer);
        self.store.clear_flags();
        tracer.end_cycle();
    }
}

impl Default for Runtime {
    fn default() -> Self { Self::new() }
}

fn locate<T: Component>(pool: &Pool<T>, id: EntityId) -> Option<usize> {
    assert!(
        pool.has_entity(id.into()),
        "entity {id} does not hold a {} component",
        util::short_type_name::<T>(),
    );
    (!T::KIND.is_unbound()).then(|| pool.find_entity_index(id))
}

/// Shared access to one component, holding the pool lock.
pub struct ComponentRef<T: Component> {
    guard: ArcRwLockReadGuard<RawRwLock, Pool<T>>,
    /// `None` for unbound kinds, which resolve to the single instance.
    flat: Option<usize>,
}

impl<T: Component> ops::Deref for ComponentRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.flat {
            Some(flat) => &self.guard.data()[flat],
            None => self.guard.single(),
        }
    }
}

/// Unique access to one component, holding the pool lock.
pub struct ComponentMut<T: Component> {
    guard: ArcRwLockWriteGuard<RawRwLock, Pool<T>>,
    flat:  Option<usize>,
}

impl<T: Component> ops::Deref for ComponentMut<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.flat {
            Some(flat) => &self.guard.data()[flat],
            None => self.guard.single(),
        }
    }
}

impl<T: Component> ops::DerefMut for ComponentMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.flat {
            Some(flat) => &mut self.guard.data_mut()[flat],
            None => self.guard.single_mut(),
        }
    }
}

/// Configures and registers a system declared with
/// [`make_system`](Runtime::make_system).
pub struct SystemBuilder<'r, S: Signature, F> {
    runtime:    &'r mut Runtime,
    entity_arg: bool,
    group:      i32,
    parallel:   bool,
    automatic:  bool,
    sort:       Option<SortFn>,
    func:       F,
    _signature: PhantomData<fn() -> S>,
}

impl<'r, S, F> SystemBuilder<'r, S, F>
where
    S: Signature,
    F: SystemFn<S>,
{
    fn new(runtime: &'r mut Runtime, entity_arg: bool, func: F) -> Self {
        Self {
            runtime,
            entity_arg,
            group: 0,
            parallel: true,
            automatic: true,
            sort: None,
            func,
            _signature: PhantomData,
        }
    }

    /// Assigns the system to `group`. Groups run in ascending order;
    /// systems in different groups never run concurrently. Defaults to 0.
    pub fn group(mut self, group: i32) -> Self {
        self.group = group;
        self
    }

    /// Iterates entities on the executing worker only, instead of fanning
    /// the inner loop out to the worker pool.
    pub fn not_parallel(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Excludes the system from automatic update cycles; it then only runs
    /// through [`SystemHandle::run`] or [`SystemHandle::update`].
    pub fn manual(mut self) -> Self {
        self.automatic = false;
        self
    }

    /// Visits entities ordered by `compare` over the current values of
    /// component `C` instead of ascending entity id.
    ///
    /// `C` must be one of the signature's component types and must not be a
    /// tag or shared component. The sort is stable: entities with equal
    /// keys keep their id order. Sorted systems always iterate
    /// sequentially.
    pub fn sorted_by<C: Component>(
        mut self,
        compare: impl Fn(&C, &C) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        let hash = TypeHash::of::<C>();
        assert!(
            S::params().iter().any(|param| param.hash == hash),
            "sort key {} is not referenced by the system signature",
            util::short_type_name::<C>(),
        );
        assert!(
            !C::KIND.is_unbound(),
            "cannot sort by the tag or shared component {}",
            util::short_type_name::<C>(),
        );

        let pool = self.runtime.store.pool::<C>();
        self.sort = Some(Box::new(move |blocks| {
            let pool = pool.read();
            let data = pool.data();
            let flats: Vec<usize> = blocks
                .iter()
                .map(|block| pool.find_entity_index(block.range.first()))
                .collect();

            let mut order: Vec<(usize, usize)> = blocks
                .iter()
                .enumerate()
                .flat_map(|(block_index, block)| {
                    (0..block.range.count()).map(move |offset| (block_index, offset))
                })
                .collect();
            order.sort_by(|&(block_a, offset_a), &(block_b, offset_b)| {
                compare(&data[flats[block_a] + offset_a], &data[flats[block_b] + offset_b])
            });
            order
        }));
        self
    }

    /// Registers the system and returns its handle.
    pub fn build(self) -> SystemHandle {
        let meta = Arc::new(SystemMeta::new::<S>(
            self.entity_arg,
            self.group,
            self.parallel,
            self.automatic,
        ));
        let system = System::<S, F>::new(&self.runtime.store, &meta, self.sort, self.func);
        let cell = Arc::new(SystemCell { meta, system: Mutex::new(Box::new(system)) });
        self.runtime.scheduler.add(Arc::clone(&cell));
        SystemHandle { cell }
    }
}

/// A handle to a registered system.
///
/// The handle stays valid for the lifetime of the runtime. Manual
/// invocations must not overlap an in-flight
/// [`run_systems`](Runtime::run_systems) cycle.
pub struct SystemHandle {
    cell: Arc<SystemCell>,
}

impl SystemHandle {
    /// Executes the system once, rebuilding its argument views first if an
    /// input pool changed.
    pub fn run(&self) {
        let mut system = self.cell.system.lock();
        system.refresh(false);
        system.run();
    }

    /// Like [`run`](Self::run), but a no-op while the system is disabled.
    pub fn update(&self) {
        let mut system = self.cell.system.lock();
        system.refresh(false);
        system.update();
    }

    /// Re-includes the system in update cycles.
    pub fn enable(&self) { self.cell.system.lock().set_enabled(true); }

    /// Skips the system in update cycles until re-enabled.
    pub fn disable(&self) { self.cell.system.lock().set_enabled(false); }

    /// Whether the system currently participates in update cycles.
    pub fn is_enabled(&self) -> bool { self.cell.system.lock().is_enabled() }

    /// Whether this system must not start before `other` has completed,
    /// per the read/write dependency analysis.
    pub fn depends_on(&self, other: &SystemHandle) -> bool {
        self.cell.meta.depends_on(&other.cell.meta)
    }

    /// A human-readable rendition of the system's signature.
    pub fn signature(&self) -> &str { &self.cell.meta.name }

    /// The group the system was assigned to.
    pub fn group(&self) -> i32 { self.cell.meta.group }

    /// The component types referenced by the system's signature.
    pub fn type_hashes(&self) -> &[TypeHash] { &self.cell.meta.hashes }
}
