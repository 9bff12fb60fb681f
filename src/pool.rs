//! Per-component-type storage: a canonical range list plus packed values.
//!
//! A pool never mutates its ranges or data outside of
//! [`process_changes`](Pool::process_changes). All other mutators enqueue
//! into per-thread buffers, which the coordinator drains between update
//! cycles. Removes are applied before adds, each in a single batched pass,
//! so the cost of compacting the packed data is paid once per cycle no
//! matter how many callers queued mutations.

use std::any::Any;
use std::mem;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bag::Bag;
use crate::comp::{Component, Kind};
use crate::range::{self, EntityId, EntityRange};
use crate::store::TypeHash;
use crate::util;

/// How a queued add produces the values for its range.
pub(crate) enum AddSource<T> {
    /// One value replicated across the whole range.
    Value {
        value: T,
        clone: fn(&T) -> T,
    },
    /// A per-entity initializer.
    Init(Box<dyn Fn(EntityId) -> T + Send>),
}

pub(crate) struct AddRecord<T> {
    range:  EntityRange,
    source: AddSource<T>,
}

/// Storage for all components of type `T`.
pub struct Pool<T: Component> {
    /// The entities that hold this component, in canonical form.
    ranges: Vec<EntityRange>,
    /// Packed values. For unbound kinds this holds at most one instance.
    data: Vec<T>,

    deferred_adds:    Bag<AddRecord<T>>,
    deferred_removes: Bag<EntityRange>,

    data_added:   bool,
    data_removed: bool,
}

impl<T: Component> Pool<T> {
    pub(crate) fn new(shards: usize) -> Self {
        assert!(
            T::KIND != Kind::Tag || mem::size_of::<T>() == 0,
            "tag component {} must not carry data",
            util::short_type_name::<T>(),
        );

        Self {
            ranges: Vec::new(),
            data: Vec::new(),
            deferred_adds: Bag::new(shards),
            deferred_removes: Bag::new(shards),
            data_added: false,
            data_removed: false,
        }
    }

    /// Queues `value` for every entity in `range`.
    ///
    /// The entities must not hold the component already, nor be queued on
    /// the calling thread to receive it.
    pub fn add(&self, range: EntityRange, value: T)
    where
        T: Clone,
    {
        self.assert_addable(range);
        self.deferred_adds.push(AddRecord { range, source: AddSource::Value { value, clone: T::clone } });
    }

    /// Queues a per-entity initializer for every entity in `range`.
    ///
    /// Same preconditions as [`add`](Self::add).
    pub fn add_init(&self, range: EntityRange, init: impl Fn(EntityId) -> T + Send + 'static) {
        self.assert_addable(range);
        self.deferred_adds.push(AddRecord { range, source: AddSource::Init(Box::new(init)) });
    }

    fn assert_addable(&self, range: EntityRange) {
        assert!(
            !self.ranges.iter().any(|r| r.overlaps(range)),
            "entities {range:?} already hold a {} component",
            util::short_type_name::<T>(),
        );
        assert!(
            !self.is_queued_add(range),
            "entities {range:?} are already queued to receive a {} component",
            util::short_type_name::<T>(),
        );
    }

    /// Queues the removal of the component from every entity in `range`.
    ///
    /// The entities must currently hold the component and must not already
    /// be queued for removal on the calling thread.
    pub fn remove(&self, range: EntityRange) {
        assert!(
            !T::KIND.is_transient(),
            "transient component {} is cleared on every commit and cannot be removed by hand",
            util::short_type_name::<T>(),
        );
        assert!(
            self.has_entity(range),
            "entities {range:?} do not hold a {} component",
            util::short_type_name::<T>(),
        );
        assert!(
            !self.is_queued_remove(range),
            "entities {range:?} are already queued to lose their {} component",
            util::short_type_name::<T>(),
        );
        self.deferred_removes.push(range);
    }

    /// Returns the component of entity `id`.
    ///
    /// Panics if the entity does not hold the component. For unbound kinds
    /// this returns the single shared instance.
    pub fn get(&self, id: EntityId) -> &T {
        assert!(
            self.has_entity(id.into()),
            "entity {id} does not hold a {} component",
            util::short_type_name::<T>(),
        );
        if T::KIND.is_unbound() {
            self.single()
        } else {
            &self.data[self.find_entity_index(id)]
        }
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, id: EntityId) -> &mut T {
        assert!(
            self.has_entity(id.into()),
            "entity {id} does not hold a {} component",
            util::short_type_name::<T>(),
        );
        if T::KIND.is_unbound() {
            self.single_mut()
        } else {
            let index = self.find_entity_index(id);
            &mut self.data[index]
        }
    }

    /// The entities holding this component, in canonical form.
    pub fn entities(&self) -> &[EntityRange] { &self.ranges }

    /// Returns whether every entity in `range` holds the component.
    pub fn has_entity(&self, range: EntityRange) -> bool {
        self.ranges.iter().any(|r| r.contains_range(range))
    }

    /// Whether the calling thread has queued an add overlapping `range`.
    pub fn is_queued_add(&self, range: EntityRange) -> bool {
        self.deferred_adds.local_any(|record| record.range.overlaps(range))
    }

    /// Whether the calling thread has queued a remove overlapping `range`.
    pub fn is_queued_remove(&self, range: EntityRange) -> bool {
        self.deferred_removes.local_any(|queued| queued.overlaps(range))
    }

    /// The number of entities holding the component.
    pub fn num_entities(&self) -> usize { range::count_entities(&self.ranges) }

    /// The number of stored values. Differs from
    /// [`num_entities`](Self::num_entities) for unbound kinds.
    pub fn num_components(&self) -> usize { self.data.len() }

    /// Whether a commit added entities since the last flag clear.
    pub fn is_data_added(&self) -> bool { self.data_added }

    /// Whether a commit removed entities since the last flag clear.
    pub fn is_data_removed(&self) -> bool { self.data_removed }

    /// Whether the pool changed shape since the last flag clear.
    pub fn is_data_modified(&self) -> bool { self.data_added || self.data_removed }

    /// Resets the dirty flags. The scheduler does this at the end of every
    /// run phase.
    pub fn clear_flags(&mut self) {
        self.data_added = false;
        self.data_removed = false;
    }

    /// Drops every entity and value, remembering whether anything was
    /// removed. Queued mutations are discarded.
    pub fn clear(&mut self) {
        let removed = !self.data.is_empty() || !self.ranges.is_empty();

        self.ranges.clear();
        self.data.clear();
        self.deferred_adds.clear();
        self.deferred_removes.clear();
        self.clear_flags();

        self.data_removed = removed;
    }

    /// Drains the deferred buffers and applies removes, then adds.
    pub fn process_changes(&mut self) {
        self.process_removes();
        self.process_adds();
    }

    /// Flat index of `id` into the packed data.
    ///
    /// Panics if the entity is absent.
    // TODO: binary search over the range list once pools routinely hold many ranges
    pub(crate) fn find_entity_index(&self, id: EntityId) -> usize {
        let mut index = 0;
        for &range in &self.ranges {
            if range.contains(id) {
                return index + range.offset(id);
            }
            index += range.count();
        }
        panic!("entity {id} not found in the {} pool", util::short_type_name::<T>())
    }

    /// The single instance of an unbound pool.
    pub(crate) fn single(&self) -> &T {
        match self.data.first() {
            Some(value) => value,
            None => panic!(
                "the {} pool holds no instance; add the component to an entity first",
                util::short_type_name::<T>(),
            ),
        }
    }

    pub(crate) fn single_mut(&mut self) -> &mut T {
        assert!(
            !self.data.is_empty(),
            "the {} pool holds no instance; add the component to an entity first",
            util::short_type_name::<T>(),
        );
        &mut self.data[0]
    }

    pub(crate) fn data(&self) -> &[T] { &self.data }

    pub(crate) fn data_mut(&mut self) -> &mut [T] { &mut self.data }

    fn process_removes(&mut self) {
        if T::KIND.is_transient() {
            // transient pools retire their whole population every cycle
            if !self.ranges.is_empty() {
                self.ranges.clear();
                self.data.clear();
                self.data_removed = true;
            }
            return;
        }

        let mut removes = self.deferred_removes.drain();
        if removes.is_empty() {
            return;
        }
        removes.sort_unstable();
        assert!(
            removes.windows(2).all(|pair| !pair[0].overlaps(pair[1])),
            "entities were queued twice for removal from the {} pool",
            util::short_type_name::<T>(),
        );

        if !T::KIND.is_unbound() {
            // resolve flat segments against the current layout, then erase
            // back-to-front so earlier indices stay valid
            let segments: Vec<(usize, usize)> = removes
                .iter()
                .map(|r| (self.find_entity_index(r.first()), r.count()))
                .collect();
            for &(start, len) in segments.iter().rev() {
                self.data.drain(start..start + len);
            }
        }

        let mut index = 0;
        for &rem in &removes {
            while index < self.ranges.len() && !self.ranges[index].contains_range(rem) {
                index += 1;
            }
            assert!(
                index < self.ranges.len(),
                "entities {rem:?} queued for removal are not in the {} pool",
                util::short_type_name::<T>(),
            );

            if self.ranges[index] == rem {
                self.ranges.remove(index);
            } else {
                match EntityRange::remove(self.ranges[index], rem) {
                    (Some(left), Some(right)) => {
                        self.ranges[index] = left;
                        self.ranges.insert(index + 1, right);
                    }
                    (Some(left), None) => self.ranges[index] = left,
                    (None, Some(right)) => self.ranges[index] = right,
                    (None, None) => unreachable!("equal ranges are erased above"),
                }
            }
        }

        self.data_removed = true;
    }

    fn process_adds(&mut self) {
        let mut adds = self.deferred_adds.drain();
        if adds.is_empty() {
            return;
        }
        adds.sort_by_key(|record| record.range);
        assert!(
            adds.windows(2).all(|pair| !pair[0].range.overlaps(pair[1].range)),
            "entities were queued twice to receive a {} component",
            util::short_type_name::<T>(),
        );

        if T::KIND.is_unbound() {
            if self.data.is_empty() {
                let first = adds.first().expect("adds checked non-empty above");
                let value = match &first.source {
                    AddSource::Value { value, clone } => clone(value),
                    AddSource::Init(init) => init(first.range.first()),
                };
                self.data.push(value);
            }

            let mut merged = Vec::with_capacity(self.ranges.len() + adds.len());
            let mut existing = self.ranges.iter().copied().peekable();
            for record in adds {
                while let Some(&head) = existing.peek() {
                    if head.last() >= record.range.first() {
                        break;
                    }
                    range::push_merged(&mut merged, head);
                    existing.next();
                }
                if let Some(&head) = existing.peek() {
                    assert!(
                        !head.overlaps(record.range),
                        "added entities {:?} already hold a {} component",
                        record.range,
                        util::short_type_name::<T>(),
                    );
                }
                range::push_merged(&mut merged, record.range);
            }
            for head in existing {
                range::push_merged(&mut merged, head);
            }
            self.ranges = merged;
        } else {
            let mut merged = Vec::with_capacity(self.ranges.len() + adds.len());
            let mut existing = mem::take(&mut self.ranges).into_iter().peekable();
            let mut flat = 0;

            for record in adds {
                // copy existing ranges up to the insertion point, tracking
                // the flat index their values occupy
                while let Some(&head) = existing.peek() {
                    if head.last() >= record.range.first() {
                        break;
                    }
                    flat += head.count();
                    range::push_merged(&mut merged, head);
                    existing.next();
                }
                if let Some(&head) = existing.peek() {
                    assert!(
                        !head.overlaps(record.range),
                        "added entities {:?} already hold a {} component",
                        record.range,
                        util::short_type_name::<T>(),
                    );
                }

                let count = record.range.count();
                match record.source {
                    AddSource::Value { value, clone } => {
                        self.data.splice(flat..flat, (0..count).map(|_| clone(&value)));
                    }
                    AddSource::Init(init) => {
                        self.data.splice(flat..flat, record.range.iter().map(&init));
                    }
                }
                flat += count;
                range::push_merged(&mut merged, record.range);
            }
            for head in existing {
                range::push_merged(&mut merged, head);
            }
            self.ranges = merged;
        }

        self.data_added = true;
    }
}

/// A pool behind its access lock. Systems take the lock shared or unique
/// according to their declared access; the coordinator takes it uniquely to
/// commit. The scheduler's dependency graph keeps run-phase acquisitions
/// uncontended.
pub type PoolCell<T> = RwLock<Pool<T>>;

/// Type-erased pool handle stored by the registry.
pub(crate) trait AnyPool: Send + Sync {
    fn type_hash(&self) -> TypeHash;
    fn process_changes(&self);
    fn clear_flags(&self);
    fn is_data_modified(&self) -> bool;
    fn flags(&self) -> (bool, bool);
    fn clear(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Component> AnyPool for PoolCell<T> {
    fn type_hash(&self) -> TypeHash { TypeHash::of::<T>() }

    fn process_changes(&self) { self.write().process_changes() }

    fn clear_flags(&self) { self.write().clear_flags() }

    fn is_data_modified(&self) -> bool { self.read().is_data_modified() }

    fn flags(&self) -> (bool, bool) {
        let pool = self.read();
        (pool.is_data_added(), pool.is_data_removed())
    }

    fn clear(&self) { self.write().clear() }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> { self }
}
