//! A [BoundedLru] is an Lru cache which holds at most a fixed number of entries.
//!
//! This is implemented as a vec-backed linked list where the items are allocated on the heap behind `Arc`, plus an
//! auxiliary hash-based index.  Promotion, insertion, and eviction are all O(1).
//!
//! Unlike most Lru caches, eviction hands the displaced entries back to the caller rather than dropping them, so that
//! callers holding expensive resources can release them properly.
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;

struct OccupiedSlot<K, V> {
    key: K,
    item: Arc<V>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct EmptySlot {
    next_empty: Option<usize>,
}

enum Slot<K, V> {
    /// This slot is empty, possibly with a pointer at the next empty slot.
    Empty(EmptySlot),
    /// This slot is occupied, and doubly linked to the previous and next slot.
    Occupied(OccupiedSlot<K, V>),
}

impl<K, V> Slot<K, V> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedSlot<K, V> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("Slot should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedSlot<K, V> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("Slot should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptySlot {
        match self {
            Slot::Empty(ref mut x) => x,
            _ => panic!("Slot should be empty"),
        }
    }
}

/// Entries pushed out of a [BoundedLru] by an insertion.
#[derive(Debug)]
pub struct Displaced<K, V> {
    /// The previous value for the inserted key, if the key was already present.
    pub replaced: Option<Arc<V>>,
    /// Entries evicted to get back under capacity, least recently used first.
    pub evicted: Vec<(K, Arc<V>)>,
}

impl<K, V> Displaced<K, V> {
    fn none() -> Displaced<K, V> {
        Displaced {
            replaced: None,
            evicted: vec![],
        }
    }
}

pub struct BoundedLru<K, V> {
    slots: Vec<Slot<K, V>>,
    /// Points at the slot of the key.
    index: HashMap<K, usize, RandomState>,
    capacity: usize,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used; the next eviction candidate.
    tail: Option<usize>,
    empty_head: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> BoundedLru<K, V> {
    /// Build an empty cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> BoundedLru<K, V> {
        assert!(capacity > 0, "A BoundedLru must be able to hold one entry");
        BoundedLru {
            slots: Default::default(),
            index: Default::default(),
            capacity,
            head: None,
            tail: None,
            empty_head: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entirely unlink an occupied slot from the list.
    /// Used as a precursor step to lots of things such as patching up the head.
    fn unlink_slot(&mut self, slot: usize) {
        let (prev, next) = {
            let occupied = self.slots[slot].as_occupied();
            (occupied.prev, occupied.next)
        };

        match prev {
            Some(p) => self.slots[p].as_occupied_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_occupied_mut().prev = prev,
            None => self.tail = prev,
        }

        let occupied = self.slots[slot].as_occupied_mut();
        occupied.prev = None;
        occupied.next = None;
    }

    /// Link an occupied, currently unlinked slot in at the head.
    fn link_at_head(&mut self, slot: usize) {
        let old_head = self.head;
        self.slots[slot].as_occupied_mut().next = old_head;
        if let Some(h) = old_head {
            self.slots[h].as_occupied_mut().prev = Some(slot);
        }
        self.head = Some(slot);

        // If the list was empty, this is also the tail.
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Given an occupied slot, make it the most recent item.
    fn make_most_recent(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink_slot(slot);
        self.link_at_head(slot);
    }

    /// Get an item, marking it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = *self.index.get(key)?;
        self.make_most_recent(slot);
        Some(self.slots[slot].as_occupied().item.clone())
    }

    /// Is this key present?  Doesn't change recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Make a specific slot of the map become empty, returning what was there.
    fn become_empty(&mut self, slot: usize) -> (K, Arc<V>) {
        self.unlink_slot(slot);
        let mut old = Slot::Empty(EmptySlot {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut old, &mut self.slots[slot]);
        self.empty_head = Some(slot);
        match old {
            Slot::Occupied(OccupiedSlot { key, item, .. }) => {
                self.index.remove(&key);
                (key, item)
            }
            _ => panic!("Should have been occupied"),
        }
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = *self.index.get(key)?;
        Some(self.become_empty(slot).1)
    }

    /// Find an available empty slot, or make one if necessary.
    fn find_empty(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.slots[e].as_empty_mut().next_empty;
            return e;
        }

        self.slots.push(Slot::Empty(EmptySlot { next_empty: None }));
        self.slots.len() - 1
    }

    /// Add an entry as the most recently used one, then evict down to capacity.
    ///
    /// Everything pushed out is returned so that the caller decides what happens to it.
    pub fn insert(&mut self, key: K, value: Arc<V>) -> Displaced<K, V> {
        let mut displaced = Displaced::none();
        displaced.replaced = self.remove(&key);

        let slot = self.find_empty();
        self.slots[slot] = Slot::Occupied(OccupiedSlot {
            key: key.clone(),
            item: value,
            prev: None,
            next: None,
        });
        self.index.insert(key, slot);
        self.link_at_head(slot);

        displaced.evicted = self.evict_to_capacity();
        displaced
    }

    /// Evict least recently used entries until we are at capacity.
    fn evict_to_capacity(&mut self) -> Vec<(K, Arc<V>)> {
        let mut evicted = vec![];
        while self.len() > self.capacity {
            let tail = match self.tail {
                Some(t) => t,
                None => panic!("Not enough entries to explain length"),
            };
            evicted.push(self.become_empty(tail));
        }
        evicted
    }

    /// Iterator visiting entries in most-recently-used order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Arc<V>)> {
        let mut slot = self.head;
        std::iter::from_fn(move || {
            let next = slot?;
            let ret = self.slots[next].as_occupied();
            slot = ret.next;
            Some((&ret.key, &ret.item))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lru::LruCache;
    use proptest::prelude::*;

    /// Simple helper to build proptest strategies so that we can test against [LruCache].
    #[derive(Copy, Clone, Debug, Ord, Eq, PartialOrd, PartialEq)]
    enum CacheCommand {
        Put(u64, u64),
        Get(u64),
        Delete(u64),
    }

    fn cache_command_strat(
        max_key: std::ops::Range<u64>,
        max_value: std::ops::Range<u64>,
    ) -> prop::strategy::BoxedStrategy<CacheCommand> {
        proptest::prop_oneof![
            max_key.clone().prop_map(CacheCommand::Get),
            (max_key.clone(), max_value).prop_map(|(x, y)| CacheCommand::Put(x, y)),
            max_key.prop_map(CacheCommand::Delete),
        ]
        .boxed()
    }

    fn keys(cache: &BoundedLru<u64, u64>) -> Vec<u64> {
        cache.iter().map(|(k, _)| *k).collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 500,
            max_shrink_iters: 10000,
            ..Default::default()
        })]
        #[test]
        fn test_against_lru_cache(
            bound in 1..50usize,
            commands in prop::collection::vec(cache_command_strat(0..100, 0..10000), 0..2000)
        ) {
            let mut known_good = LruCache::<u64, u64>::new(bound);
            let mut ours = BoundedLru::<u64, u64>::new(bound);

            for c in commands {
                use CacheCommand::*;

                match c {
                    Get(k) => {
                        let left: Option<u64> = known_good.get(&k).cloned();
                        let right: Option<u64> = ours.get(&k).as_deref().cloned();
                        prop_assert_eq!(left, right);
                    },
                    Put(k, v) => {
                        let displaced = ours.insert(k, Arc::new(v));
                        let replaced = displaced.replaced.as_deref().cloned();
                        prop_assert_eq!(known_good.put(k, v), replaced);
                    },
                    Delete(k) => {
                        let removed = ours.remove(&k).as_deref().cloned();
                        prop_assert_eq!(known_good.pop(&k), removed);
                    },
                }

                let good_state = known_good.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>();
                let our_state = ours.iter().map(|(k, v)| (*k, **v)).collect::<Vec<_>>();
                prop_assert_eq!(&good_state, &our_state);
                prop_assert!(ours.len() <= bound);
            }
        }
    }

    #[test]
    fn test_eviction_returns_least_recent() {
        let mut cache = BoundedLru::<u64, u64>::new(2);
        assert!(cache.insert(1, Arc::new(10)).evicted.is_empty());
        assert!(cache.insert(2, Arc::new(20)).evicted.is_empty());

        let displaced = cache.insert(3, Arc::new(30));
        assert!(displaced.replaced.is_none());
        assert_eq!(displaced.evicted.len(), 1);
        assert_eq!(displaced.evicted[0].0, 1);
        assert_eq!(*displaced.evicted[0].1, 10);
        assert_eq!(keys(&cache), vec![3, 2]);
    }

    #[test]
    fn test_get_promotes() {
        let mut cache = BoundedLru::<u64, u64>::new(3);
        for i in 1..=3 {
            cache.insert(i, Arc::new(i));
        }
        assert_eq!(keys(&cache), vec![3, 2, 1]);

        assert_eq!(cache.get(&1).as_deref(), Some(&1));
        assert_eq!(keys(&cache), vec![1, 3, 2]);

        // 2 is now the oldest.
        let displaced = cache.insert(4, Arc::new(4));
        assert_eq!(displaced.evicted[0].0, 2);
        assert_eq!(keys(&cache), vec![4, 1, 3]);
    }

    #[test]
    fn test_contains_does_not_promote() {
        let mut cache = BoundedLru::<u64, u64>::new(2);
        cache.insert(1, Arc::new(1));
        cache.insert(2, Arc::new(2));
        assert!(cache.contains(&1));
        assert_eq!(keys(&cache), vec![2, 1]);
    }

    #[test]
    fn test_reinsert_replaces_without_growing() {
        let mut cache = BoundedLru::<u64, u64>::new(2);
        cache.insert(1, Arc::new(1));
        cache.insert(2, Arc::new(2));
        let displaced = cache.insert(1, Arc::new(100));
        assert_eq!(displaced.replaced.as_deref(), Some(&1));
        assert!(displaced.evicted.is_empty());
        assert_eq!(cache.len(), 2);
        assert_eq!(keys(&cache), vec![1, 2]);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut cache = BoundedLru::<u64, u64>::new(1);
        for i in 0..10 {
            cache.insert(i, Arc::new(i));
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.slots.len() <= 2);
        assert_eq!(keys(&cache), vec![9]);
    }

    #[test]
    fn test_borrowed_lookup() {
        let mut cache = BoundedLru::<Arc<str>, u64>::new(2);
        cache.insert(Arc::from("u2net"), Arc::new(1));
        assert!(cache.contains("u2net"));
        assert_eq!(cache.get("u2net").as_deref(), Some(&1));
        assert!(cache.remove("u2net").is_some());
        assert!(cache.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _ = BoundedLru::<u64, u64>::new(0);
    }
}
