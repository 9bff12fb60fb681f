//! An ECS runtime built around range-compressed component storage.
//!
//! # Storage model
//! Entities are plain integer ids. Each component type gets one
//! [`pool`](crate::pool::Pool) that tracks its holders as a sorted list of
//! closed id intervals and packs the values densely in interval order.
//! Populations that arrive in batches compress extremely well under this
//! scheme: a million entities created as one span cost one range entry,
//! and iteration is a handful of contiguous slice walks.
//!
//! Mutation is deferred. Adds and removes enqueue into per-thread buffers
//! from any thread; [`Runtime::commit_changes`] drains them on the calling
//! thread and applies removes, then adds, in two batched passes. Between
//! commits the pools are structurally immutable, which is what lets
//! systems iterate them concurrently without per-entity synchronization.
//!
//! # Systems and scheduling
//! A system binds a user function to a signature of component accesses:
//!
//! ```
//! use runec::{Read, Runtime, Write};
//!
//! #[derive(Clone)]
//! struct Position(f32);
//! impl runec::Component for Position {}
//!
//! #[derive(Clone)]
//! struct Velocity(f32);
//! impl runec::Component for Velocity {}
//!
//! let mut runtime = Runtime::with_concurrency(0);
//! runtime.add_component(0..=9, Position(0.0));
//! runtime.add_component(0..=9, Velocity(1.0));
//!
//! let _mover = runtime
//!     .make_system::<(Write<Position>, Read<Velocity>), _>(
//!         |(position, velocity): (&mut Position, &Velocity)| {
//!             position.0 += velocity.0;
//!         },
//!     )
//!     .build();
//!
//! runtime.update_systems();
//! assert_eq!(runtime.get_component::<Position>(3).0, 1.0);
//! ```
//!
//! The declared accesses drive the scheduler: two systems conflict exactly
//! when they share a component type that at least one writes. Within a
//! [group](crate::runtime::SystemBuilder::group), non-conflicting systems
//! run concurrently on a worker pool, conflicting ones run in registration
//! order, and a system may additionally fan its own entity loop out to the
//! workers unless it opted out. Pool data races cannot be expressed: the
//! run phase hands out `&T` and `&mut T` strictly along the declared
//! accesses.
//!
//! # Component kinds
//! Component types can opt out of per-entity storage: tag components mark
//! entities without storing data, shared components keep one instance for
//! all holders, and transient components clear themselves on every commit.
//! See [`comp`] for the kind system.

#![cfg_attr(doc, warn(missing_docs))]

mod bag;
pub mod comp;
pub use comp::{Component, Kind};
pub mod pool;
pub use pool::Pool;
pub mod range;
pub use range::{EntityId, EntityRange};
pub mod runtime;
pub use runtime::{Runtime, SystemHandle};
mod scheduler;
pub mod store;
pub use store::TypeHash;
pub mod system;
pub use system::{Read, Write};
pub mod tracer;
mod util;

#[cfg(test)]
mod test_util;
