//! A component is a typed value attached to an entity.
//!
//! The component type itself declares how its pool stores and retires it,
//! through the associated constants on [`Component`]. Most types are
//! *ordinary*: one value per holding entity, removed only on request.
//! The other kinds cover the common special cases:
//!
//! - [`Kind::Tag`] marks zero-sized label components. The pool keeps a
//!   single sentinel instead of one value per entity, and tags are always
//!   read-only when bound by a system.
//! - [`Kind::Shared`] components store exactly one instance that every
//!   holder observes. Writing a shared component still serializes with all
//!   of its readers in the scheduler.
//! - [`Kind::Transient`] components behave like ordinary ones but are wiped
//!   at the start of every commit, so they live for exactly one cycle.
//!
//! `IMMUTABLE` marks a type as read-only regardless of how a system asks
//! for it; binding such a type mutably is rejected when the system is
//! declared.

/// A value that can be stored in a component pool and attached to entities.
///
/// The default associated constants describe an ordinary mutable component;
/// override them to opt into one of the special [`Kind`]s.
pub trait Component: Send + Sync + 'static {
    /// Storage and lifetime rule for this component type.
    const KIND: Kind = Kind::Ordinary;

    /// Treat the component as read-only even when a system binds it mutably.
    const IMMUTABLE: bool = false;
}

/// The storage kinds a component type can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// One value per entity, removed only on explicit request.
    Ordinary,
    /// Zero-sized marker; the pool holds a single shared sentinel.
    Tag,
    /// A single instance returned for every holding entity.
    Shared,
    /// Like [`Kind::Ordinary`], but cleared at the start of every commit.
    Transient,
}

impl Kind {
    /// Whether values are not addressed per entity: the pool keeps a single
    /// instance and iteration hands out the same reference for every entity.
    pub const fn is_unbound(self) -> bool { matches!(self, Kind::Tag | Kind::Shared) }

    /// Whether the pool is wiped on every commit.
    pub const fn is_transient(self) -> bool { matches!(self, Kind::Transient) }
}
