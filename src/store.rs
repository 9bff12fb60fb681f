//! The registry mapping component types to their pools.
//!
//! Pools are created lazily on the first reference to a component type and
//! live for the lifetime of the runtime. Lookup is keyed by [`TypeHash`],
//! a process-stable identifier derived from the type name.

use std::any;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::comp::Component;
use crate::pool::{AnyPool, Pool, PoolCell};
use crate::tracer::Tracer;

/// A process-stable identifier for a component type.
///
/// The hash is derived from the fully qualified type name, so it is stable
/// within one process invocation and distinct for distinct types, but not
/// portable across builds.
#[derive(Clone, Copy)]
pub struct TypeHash {
    hash: u64,
    name: &'static str,
}

impl TypeHash {
    /// The identifier of type `T`.
    pub fn of<T: 'static>() -> Self {
        let name = any::type_name::<T>();
        Self { hash: fnv1a(name.as_bytes()), name }
    }

    /// The fully qualified name the hash was derived from.
    pub fn name(self) -> &'static str { self.name }
}

impl PartialEq for TypeHash {
    fn eq(&self, other: &Self) -> bool { self.hash == other.hash }
}
impl Eq for TypeHash {}

impl PartialOrd for TypeHash {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}
impl Ord for TypeHash {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.hash.cmp(&other.hash) }
}

impl Hash for TypeHash {
    fn hash<H: Hasher>(&self, state: &mut H) { self.hash.hash(state) }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TypeHash({:#018x}, {})", self.hash, self.name)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { f.write_str(self.name) }
}

const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

/// A lazily-populated shared map. Reads take the shared lock; the slow path
/// initializing a missing entry upgrades to the unique lock.
struct SyncMap<K: Eq + Ord, V: ?Sized> {
    map: RwLock<BTreeMap<K, Arc<V>>>,
}

impl<K: Eq + Ord, V: ?Sized> Default for SyncMap<K, V> {
    fn default() -> Self { Self { map: RwLock::new(BTreeMap::new()) } }
}

impl<K: Eq + Ord, V: ?Sized> SyncMap<K, V> {
    /// Gets a cloned arc of the value for the given key, or initializes it.
    fn get_or_init(&self, key: K, create: impl FnOnce() -> Arc<V>) -> Arc<V> {
        {
            let map = self.map.read();
            if let Some(value) = map.get(&key) {
                return Arc::clone(value);
            }
        }

        let mut map = self.map.write();
        let value = map.entry(key).or_insert_with(create);
        Arc::clone(value)
    }

    /// Gets a cloned arc of the value for the given key.
    fn get(&self, key: K) -> Option<Arc<V>> {
        let map = self.map.read();
        map.get(&key).cloned()
    }

    /// Returns the underlying map under unique access.
    fn map(&mut self) -> &mut BTreeMap<K, Arc<V>> { self.map.get_mut() }
}

/// Owns every component pool, keyed by component type identity.
///
/// The store is driven through [`Runtime`](crate::Runtime); it appears in
/// public signatures only so that [`Signature`](crate::system::Signature)
/// implementations can bind their pools.
pub struct Store {
    pools:  SyncMap<TypeHash, dyn AnyPool>,
    shards: usize,
}

impl Store {
    pub(crate) fn new(shards: usize) -> Self {
        Self { pools: SyncMap::default(), shards }
    }

    /// The pool for `T`, instantiated on first use.
    pub(crate) fn pool<T: Component>(&self) -> Arc<PoolCell<T>> {
        let hash = TypeHash::of::<T>();
        let shards = self.shards;
        let entry = self.pools.get_or_init(hash, || {
            let pool: Arc<dyn AnyPool> = Arc::new(PoolCell::new(Pool::<T>::new(shards)));
            pool
        });
        assert!(
            entry.type_hash().name() == hash.name(),
            "type hash collision between {} and {}",
            entry.type_hash().name(),
            hash.name(),
        );
        entry
            .as_any()
            .downcast::<PoolCell<T>>()
            .unwrap_or_else(|_| panic!("pool entry for {hash} has the wrong type"))
    }

    /// The pool for `T` if it was ever referenced.
    pub(crate) fn try_pool<T: Component>(&self) -> Option<Arc<PoolCell<T>>> {
        let entry = self.pools.get(TypeHash::of::<T>())?;
        Some(
            entry
                .as_any()
                .downcast::<PoolCell<T>>()
                .unwrap_or_else(|_| panic!("pool entry for {} has the wrong type", TypeHash::of::<T>())),
        )
    }

    /// Applies the deferred mutations of every pool, in key order.
    pub(crate) fn commit(&mut self, tracer: &dyn Tracer) {
        for (&hash, pool) in self.pools.map() {
            pool.process_changes();
            let (added, removed) = pool.flags();
            if added || removed {
                tracer.commit_pool(hash, added, removed);
            }
        }
    }

    /// Clears the dirty flags of every pool.
    pub(crate) fn clear_flags(&mut self) {
        for pool in self.pools.map().values() {
            pool.clear_flags();
        }
    }
}
