//! Systems: user functions bound to a signature of component accesses.
//!
//! A signature is a tuple of [`Read`] and [`Write`] markers, one per
//! component parameter. The runtime derives everything else from it: the
//! referenced pools, the read/write sets driving the scheduler's dependency
//! analysis, and the per-range argument views iterated on each run.
//!
//! Argument views are rebuilt whenever an input pool reports a structural
//! change, by intersecting the entity sets of every referenced pool. Each
//! resulting range records the flat offset of its first entity in every
//! bound pool, so per-entity access during iteration is a single index
//! computation. Components of an unbound kind (tag or shared) skip the
//! offset arithmetic and hand every entity the same instance.

use std::marker::PhantomData;
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use rayon::prelude::*;

use crate::comp::{Component, Kind};
use crate::pool::{Pool, PoolCell};
use crate::range::{self, EntityId, EntityRange};
use crate::store::{Store, TypeHash};
use crate::util;

/// Requests read-only access to component `T`; the system receives `&T`.
pub struct Read<T: Component>(PhantomData<T>);

/// Requests read-write access to component `T`; the system receives
/// `&mut T`.
///
/// Binding a tag or [immutable](Component::IMMUTABLE) component mutably is
/// rejected when the system is declared; request those with [`Read`].
pub struct Write<T: Component>(PhantomData<T>);

/// One parameter of a system signature.
pub trait Access: 'static {
    /// The referenced component type.
    type Comp: Component;

    /// Whether the parameter binds the component mutably.
    const MUTABLE: bool;

    /// Pool lock guard held while the system executes.
    type Guard<'w>
    where
        Self: 'w;

    /// Per-range slice of pool data handed to parallel iteration.
    type Slice<'s>: Send
    where
        Self: 's;

    /// The value passed to the user function for one entity.
    type Arg<'e>
    where
        Self: 'e;

    fn lock(pool: &PoolCell<Self::Comp>) -> Self::Guard<'_>;
    fn split<'s>(guard: &'s mut Self::Guard<'_>, blocks: &[Block], param: usize)
        -> Vec<Self::Slice<'s>>;
    fn arg<'e>(slice: &'e mut Self::Slice<'_>, offset: usize) -> Self::Arg<'e>;
    fn arg_at<'e>(guard: &'e mut Self::Guard<'_>, flat: usize) -> Self::Arg<'e>;
}

/// Shared view of one range of a pool, or the unbound singleton.
pub enum ReadSlice<'s, T> {
    Bound(&'s [T]),
    Unbound(&'s T),
}

/// Unique view of one range of a pool, or the unbound singleton.
pub enum WriteSlice<'s, T> {
    Bound(&'s mut [T]),
    Unbound(&'s mut T),
}

impl<T: Component> Access for Read<T> {
    type Comp = T;

    const MUTABLE: bool = false;

    type Guard<'w> = RwLockReadGuard<'w, Pool<T>> where Self: 'w;
    type Slice<'s> = ReadSlice<'s, T> where Self: 's;
    type Arg<'e> = &'e T where Self: 'e;

    fn lock(pool: &PoolCell<T>) -> Self::Guard<'_> { pool.read() }

    fn split<'s>(guard: &'s mut Self::Guard<'_>, blocks: &[Block], param: usize)
        -> Vec<ReadSlice<'s, T>> {
        if T::KIND.is_unbound() {
            if blocks.is_empty() {
                return Vec::new();
            }
            let single = guard.single();
            return blocks.iter().map(|_| ReadSlice::Unbound(single)).collect();
        }

        let mut data: &[T] = guard.data();
        let mut consumed = 0;
        blocks
            .iter()
            .map(|block| {
                let start = block.starts[param];
                let (_, rest) = data.split_at(start - consumed);
                let (segment, rest) = rest.split_at(block.range.count());
                data = rest;
                consumed = start + block.range.count();
                ReadSlice::Bound(segment)
            })
            .collect()
    }

    fn arg<'e>(slice: &'e mut ReadSlice<'_, T>, offset: usize) -> &'e T {
        match slice {
            ReadSlice::Bound(segment) => &segment[offset],
            ReadSlice::Unbound(single) => single,
        }
    }

    fn arg_at<'e>(guard: &'e mut Self::Guard<'_>, flat: usize) -> &'e T {
        if T::KIND.is_unbound() {
            guard.single()
        } else {
            &guard.data()[flat]
        }
    }
}

impl<T: Component> Access for Write<T> {
    type Comp = T;

    const MUTABLE: bool = true;

    type Guard<'w> = RwLockWriteGuard<'w, Pool<T>> where Self: 'w;
    type Slice<'s> = WriteSlice<'s, T> where Self: 's;
    type Arg<'e> = &'e mut T where Self: 'e;

    fn lock(pool: &PoolCell<T>) -> Self::Guard<'_> { pool.write() }

    fn split<'s>(guard: &'s mut Self::Guard<'_>, blocks: &[Block], param: usize)
        -> Vec<WriteSlice<'s, T>> {
        assert!(
            !T::KIND.is_unbound(),
            "systems writing the unbound component {} iterate sequentially",
            util::short_type_name::<T>(),
        );

        let mut data: &mut [T] = guard.data_mut();
        let mut consumed = 0;
        blocks
            .iter()
            .map(|block| {
                let start = block.starts[param];
                let taken = std::mem::take(&mut data);
                let (_, rest) = taken.split_at_mut(start - consumed);
                let (segment, rest) = rest.split_at_mut(block.range.count());
                data = rest;
                consumed = start + block.range.count();
                WriteSlice::Bound(segment)
            })
            .collect()
    }

    fn arg<'e>(slice: &'e mut WriteSlice<'_, T>, offset: usize) -> &'e mut T {
        match slice {
            WriteSlice::Bound(segment) => &mut segment[offset],
            WriteSlice::Unbound(single) => single,
        }
    }

    fn arg_at<'e>(guard: &'e mut Self::Guard<'_>, flat: usize) -> &'e mut T {
        if T::KIND.is_unbound() {
            guard.single_mut()
        } else {
            &mut guard.data_mut()[flat]
        }
    }
}

/// Describes one signature parameter.
pub struct ParamInfo {
    pub(crate) hash:      TypeHash,
    pub(crate) name:      &'static str,
    pub(crate) mutable:   bool,
    pub(crate) immutable: bool,
    pub(crate) kind:      Kind,
}

impl ParamInfo {
    /// A parameter is read-only if it is bound immutably, refers to a tag
    /// component, or refers to an immutable component.
    pub(crate) fn read_only(&self) -> bool {
        !self.mutable || self.kind == Kind::Tag || self.immutable
    }
}

fn param_info<A: Access>() -> ParamInfo {
    ParamInfo {
        hash:      TypeHash::of::<A::Comp>(),
        name:      util::short_type_name::<A::Comp>(),
        mutable:   A::MUTABLE,
        immutable: <A::Comp as Component>::IMMUTABLE,
        kind:      <A::Comp as Component>::KIND,
    }
}

/// The argument view for one contiguous range of matching entities: the
/// range itself plus, per bound parameter, the flat index of the range's
/// first entity in that parameter's pool data.
pub struct Block {
    pub(crate) range:  EntityRange,
    pub(crate) starts: Vec<usize>,
}

fn flat_index(block: &Block, param: usize, offset: usize) -> usize {
    match block.starts[param] {
        // unbound parameters carry no offset
        usize::MAX => 0,
        start => start + offset,
    }
}

/// A system signature: a tuple of [`Access`] markers.
///
/// Implemented for tuples of arity 1 to 6. The trait is an implementation
/// surface for the runtime; user code only names signature types.
pub trait Signature: 'static {
    /// Tuple of pool handles referenced by this signature.
    type Pools: Send + Sync + 'static;
    /// Tuple of lock guards held while a run is in progress.
    type Guards<'w>
    where
        Self: 'w;
    /// Tuple of per-range slices used by parallel iteration.
    type Slices<'s>: Send
    where
        Self: 's;
    /// Tuple of arguments passed to the user function.
    type Args<'e>
    where
        Self: 'e;

    fn params() -> Vec<ParamInfo>;
    fn bind(store: &Store) -> Self::Pools;
    fn dirty(pools: &Self::Pools) -> bool;
    fn blocks(pools: &Self::Pools) -> Vec<Block>;
    fn lock(pools: &Self::Pools) -> Self::Guards<'_>;
    fn split<'s>(guards: &'s mut Self::Guards<'_>, blocks: &[Block])
        -> Vec<(EntityRange, Self::Slices<'s>)>;
    fn extract<'e>(slices: &'e mut Self::Slices<'_>, offset: usize) -> Self::Args<'e>;
    fn extract_at<'e>(guards: &'e mut Self::Guards<'_>, block: &Block, offset: usize)
        -> Self::Args<'e>;
}

macro_rules! impl_signature {
    ($(($A:ident, $idx:tt)),+) => {
        impl<$($A: Access),+> Signature for ($($A,)+) {
            type Pools = ($(Arc<PoolCell<$A::Comp>>,)+);
            type Guards<'w> = ($($A::Guard<'w>,)+) where Self: 'w;
            type Slices<'s> = ($($A::Slice<'s>,)+) where Self: 's;
            type Args<'e> = ($($A::Arg<'e>,)+) where Self: 'e;

            fn params() -> Vec<ParamInfo> { vec![$(param_info::<$A>()),+] }

            fn bind(store: &Store) -> Self::Pools { ($(store.pool::<$A::Comp>(),)+) }

            fn dirty(pools: &Self::Pools) -> bool {
                false $(|| pools.$idx.read().is_data_modified())+
            }

            fn blocks(pools: &Self::Pools) -> Vec<Block> {
                let guards = ($(pools.$idx.read(),)+);

                let mut matched: Option<Vec<EntityRange>> = None;
                $(
                    matched = Some(match matched {
                        None => guards.$idx.entities().to_vec(),
                        Some(set) => range::intersect_ranges(&set, guards.$idx.entities()),
                    });
                )+
                let matched = matched.expect("signatures have at least one parameter");

                matched
                    .into_iter()
                    .map(|range| {
                        let starts = vec![$(
                            if <$A::Comp as Component>::KIND.is_unbound() {
                                usize::MAX
                            } else {
                                guards.$idx.find_entity_index(range.first())
                            }
                        ),+];
                        Block { range, starts }
                    })
                    .collect()
            }

            fn lock(pools: &Self::Pools) -> Self::Guards<'_> {
                ($($A::lock(&pools.$idx),)+)
            }

            fn split<'s>(guards: &'s mut Self::Guards<'_>, blocks: &[Block])
                -> Vec<(EntityRange, Self::Slices<'s>)> {
                $(
                    #[allow(non_snake_case)]
                    let mut $A = $A::split(&mut guards.$idx, blocks, $idx).into_iter();
                )+
                blocks
                    .iter()
                    .map(|block| (block.range, ($($A.next().expect("split covers every block"),)+)))
                    .collect()
            }

            fn extract<'e>(slices: &'e mut Self::Slices<'_>, offset: usize) -> Self::Args<'e> {
                ($($A::arg(&mut slices.$idx, offset),)+)
            }

            fn extract_at<'e>(guards: &'e mut Self::Guards<'_>, block: &Block, offset: usize)
                -> Self::Args<'e> {
                ($($A::arg_at(&mut guards.$idx, flat_index(block, $idx, offset)),)+)
            }
        }
    };
}

impl_signature!((A0, 0));
impl_signature!((A0, 0), (A1, 1));
impl_signature!((A0, 0), (A1, 1), (A2, 2));
impl_signature!((A0, 0), (A1, 1), (A2, 2), (A3, 3));
impl_signature!((A0, 0), (A1, 1), (A2, 2), (A3, 3), (A4, 4));
impl_signature!((A0, 0), (A1, 1), (A2, 2), (A3, 3), (A4, 4), (A5, 5));

/// Metadata derived from a system's signature and options at construction.
pub(crate) struct SystemMeta {
    pub(crate) name:      String,
    pub(crate) group:     i32,
    pub(crate) parallel:  bool,
    pub(crate) automatic: bool,
    pub(crate) hashes:    Vec<TypeHash>,
    pub(crate) read_only: Vec<bool>,
}

impl SystemMeta {
    pub(crate) fn new<S: Signature>(
        entity_arg: bool,
        group: i32,
        parallel: bool,
        automatic: bool,
    ) -> Self {
        let params = S::params();

        for (index, param) in params.iter().enumerate() {
            assert!(
                !params[..index].iter().any(|other| other.hash == param.hash),
                "signature references component {} more than once",
                param.name,
            );
            assert!(
                !(param.mutable && param.kind == Kind::Tag),
                "tag component {} cannot be bound mutably; request it with Read",
                param.name,
            );
            assert!(
                !(param.mutable && param.immutable),
                "immutable component {} cannot be bound mutably; request it with Read",
                param.name,
            );
        }

        let name = format!(
            "fn({}{})",
            if entity_arg { "EntityId, " } else { "" },
            params
                .iter()
                .map(|param| {
                    if param.mutable {
                        format!("&mut {}", param.name)
                    } else {
                        format!("&{}", param.name)
                    }
                })
                .join(", "),
        );

        Self {
            name,
            group,
            parallel,
            automatic,
            hashes: params.iter().map(|param| param.hash).collect(),
            read_only: params.iter().map(|param| param.read_only()).collect(),
        }
    }

    pub(crate) fn references(&self, hash: TypeHash) -> bool { self.hashes.contains(&hash) }

    pub(crate) fn writes_to(&self, hash: TypeHash) -> bool {
        self.hashes
            .iter()
            .position(|&h| h == hash)
            .is_some_and(|index| !self.read_only[index])
    }

    pub(crate) fn writes_any(&self) -> bool { self.read_only.iter().any(|&read_only| !read_only) }

    /// Whether this system must not start before `other` has completed.
    ///
    /// True exactly when the two signatures share a component type that at
    /// least one of them writes to.
    pub(crate) fn depends_on(&self, other: &SystemMeta) -> bool {
        self.hashes.iter().enumerate().any(|(index, &hash)| {
            if !other.references(hash) {
                return false;
            }
            other.writes_to(hash) || !self.read_only[index]
        })
    }
}

/// Sort specification: a comparator-driven iteration order over the current
/// values of one referenced component.
pub(crate) type SortFn = Box<dyn Fn(&[Block]) -> Vec<(usize, usize)> + Send + Sync>;

/// A user function invocable once per matching entity of signature `S`.
///
/// Implemented by the adapters over the two accepted closure shapes: with
/// and without a leading entity id parameter.
pub trait SystemFn<S: Signature>: Send + Sync + 'static {
    fn call(&self, entity: EntityId, args: S::Args<'_>);
}

/// Adapter for user functions that do not take the entity id.
pub struct WithoutId<F>(pub(crate) F);

impl<S, F> SystemFn<S> for WithoutId<F>
where
    S: Signature,
    F: for<'e> Fn(S::Args<'e>) + Send + Sync + 'static,
{
    fn call(&self, _entity: EntityId, args: S::Args<'_>) { (self.0)(args) }
}

/// Adapter for user functions that take the entity id first.
pub struct WithId<F>(pub(crate) F);

impl<S, F> SystemFn<S> for WithId<F>
where
    S: Signature,
    F: for<'e> Fn(EntityId, S::Args<'e>) + Send + Sync + 'static,
{
    fn call(&self, entity: EntityId, args: S::Args<'_>) { (self.0)(entity, args) }
}

/// Type-erased system stored by the scheduler.
pub(crate) trait AnySystem: Send {
    /// Rebuilds the argument views if an input pool changed (or always, when
    /// forced). Returns whether a rebuild happened.
    fn refresh(&mut self, force: bool) -> bool;

    /// Executes the user function once per matching entity.
    fn run(&mut self);

    fn set_enabled(&mut self, enabled: bool);
    fn is_enabled(&self) -> bool;

    /// Like [`run`](Self::run), but a no-op while the system is disabled.
    fn update(&mut self) {
        if self.is_enabled() {
            self.run();
        }
    }
}

pub(crate) struct System<S: Signature, F> {
    pools:  S::Pools,
    blocks: Vec<Block>,
    sort:   Option<SortFn>,
    func:   F,

    /// Resolved at construction: inner iteration may fan out to workers.
    run_parallel: bool,
    enabled:      bool,
}

impl<S, F> System<S, F>
where
    S: Signature,
    F: SystemFn<S>,
{
    pub(crate) fn new(store: &Store, meta: &SystemMeta, sort: Option<SortFn>, func: F) -> Self {
        let pools = S::bind(store);
        let blocks = S::blocks(&pools);

        // writes to an unbound component alias its single instance, so such
        // systems never fan out
        let writes_unbound = S::params()
            .iter()
            .any(|param| param.kind.is_unbound() && !param.read_only());
        let run_parallel = meta.parallel && !writes_unbound && sort.is_none();

        Self { pools, blocks, sort, func, run_parallel, enabled: true }
    }

    fn run_sorted(&self, sort: &SortFn) {
        let order = sort(&self.blocks);
        let mut guards = S::lock(&self.pools);
        for (block_index, offset) in order {
            let block = &self.blocks[block_index];
            let entity = block.range.first() + offset as EntityId;
            self.func.call(entity, S::extract_at(&mut guards, block, offset));
        }
    }

    fn run_split(&self) {
        let mut guards = S::lock(&self.pools);
        let items = S::split(&mut guards, &self.blocks);
        let func = &self.func;
        items.into_par_iter().for_each(|(range, mut slices)| {
            for entity in range.iter() {
                let offset = range.offset(entity);
                func.call(entity, S::extract(&mut slices, offset));
            }
        });
    }

    fn run_sequential(&self) {
        let mut guards = S::lock(&self.pools);
        for block in &self.blocks {
            for entity in block.range.iter() {
                let offset = block.range.offset(entity);
                self.func.call(entity, S::extract_at(&mut guards, block, offset));
            }
        }
    }
}

impl<S, F> AnySystem for System<S, F>
where
    S: Signature,
    F: SystemFn<S>,
{
    fn refresh(&mut self, force: bool) -> bool {
        if !force && !S::dirty(&self.pools) {
            return false;
        }
        self.blocks = S::blocks(&self.pools);
        true
    }

    fn run(&mut self) {
        if let Some(sort) = &self.sort {
            self.run_sorted(sort);
        } else if self.run_parallel {
            self.run_split();
        } else {
            self.run_sequential();
        }
    }

    fn set_enabled(&mut self, enabled: bool) { self.enabled = enabled; }

    fn is_enabled(&self) -> bool { self.enabled }
}

#[cfg(test)]
mod tests;
