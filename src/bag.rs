//! Sharded per-thread buffers for deferred pool mutations.
//!
//! Producers append to the shard owned by their thread, so enqueueing from
//! many threads at once never contends. The coordinator drains every shard
//! between update cycles with exclusive access, which also provides the
//! fence that makes producer writes visible to the commit phase.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use parking_lot::Mutex;

/// A collection of per-thread buffers that is drained on one thread.
pub(crate) struct Bag<T> {
    shards: Box<[Mutex<Vec<T>>]>,
}

impl<T> Bag<T> {
    pub(crate) fn new(shards: usize) -> Self {
        assert!(shards > 0, "a bag needs at least one shard");
        Self { shards: (0..shards).map(|_| Mutex::new(Vec::new())).collect() }
    }

    /// The shard assigned to the calling thread. Two threads may share a
    /// shard; the shard mutex covers that case and is otherwise uncontended.
    fn local_index(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Appends to the calling thread's buffer.
    pub(crate) fn push(&self, item: T) {
        self.shards[self.local_index()].lock().push(item);
    }

    /// Returns whether any item queued by the calling thread matches.
    pub(crate) fn local_any(&self, predicate: impl FnMut(&T) -> bool) -> bool {
        self.shards[self.local_index()].lock().iter().any(predicate)
    }

    /// Moves the contents of every shard into one list, in shard order.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.shards.iter_mut().flat_map(|shard| shard.get_mut().drain(..)).collect()
    }

    /// Discards the contents of every shard.
    pub(crate) fn clear(&mut self) {
        for shard in self.shards.iter_mut() {
            shard.get_mut().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Bag;

    #[test]
    fn push_then_drain() {
        let mut bag = Bag::new(4);
        for value in 0..10 {
            bag.push(value);
        }
        let mut drained = bag.drain();
        drained.sort_unstable();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
        assert!(bag.drain().is_empty());
    }

    #[test]
    fn local_any_sees_only_this_thread() {
        let bag = Bag::new(2);
        bag.push(7);
        assert!(bag.local_any(|&v| v == 7));
        assert!(!bag.local_any(|&v| v == 8));
    }

    #[test]
    fn concurrent_producers_do_not_lose_items() {
        let bag = std::sync::Arc::new(Bag::new(4));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let bag = std::sync::Arc::clone(&bag);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        bag.push(worker * 100 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer thread panicked");
        }

        let mut bag = std::sync::Arc::try_unwrap(bag).ok().expect("all producers joined");
        let mut drained = bag.drain();
        drained.sort_unstable();
        assert_eq!(drained, (0..400).collect::<Vec<_>>());
    }
}
