// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::max;
use std::sync::Mutex;

use crate::core::search::query::{Weight, MATCH_ALL, PHRASE, PREFIX, TERM};

use crate::error::Result;

/// A policy defining which filters should be cached.
///
/// Implementations of this class must be thread-safe.
pub trait QueryCachingPolicy: Send + Sync {
    /// Callback that is called every time that a cached filter is used.
    /// This is typically useful if the policy wants to track usage statistics
    /// in order to make decisions.
    fn on_use(&self, weight: &dyn Weight);

    /// Whether the given weight is worth caching.
    ///
    /// The cache asks this once it missed, a `true` answer builds and keeps
    /// the doc set of the current leaf.
    fn should_cache(&self, weight: &dyn Weight) -> Result<bool>;
}

#[derive(Default)]
pub struct AlwaysCacheQueryCachingPolicy;

impl QueryCachingPolicy for AlwaysCacheQueryCachingPolicy {
    fn on_use(&self, _weight: &dyn Weight) {}

    fn should_cache(&self, _weight: &dyn Weight) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Default)]
pub struct NeverCacheQueryCachingPolicy;

impl QueryCachingPolicy for NeverCacheQueryCachingPolicy {
    fn on_use(&self, _weight: &dyn Weight) {}

    fn should_cache(&self, _weight: &dyn Weight) -> Result<bool> {
        Ok(false)
    }
}

const SENTINEL: u32 = u32::max_value();

/// A `QueryCachingPolicy` that tracks usage statistics of recently-used
/// filters in order to decide on which filters are worth caching.
///
/// Queries whose doc sets are expensive to build (phrases, prefixes) are
/// cached after 2 uses, single terms after 20 and anything else after 5.
/// Match all queries are never cached.
pub struct UsageTrackingQueryCachingPolicy {
    recently_used_filters: Mutex<FrequencyTrackingRingBuffer>,
}

impl UsageTrackingQueryCachingPolicy {
    pub fn new(history_size: usize) -> UsageTrackingQueryCachingPolicy {
        let recently_used_filters =
            Mutex::new(FrequencyTrackingRingBuffer::new(history_size, SENTINEL));
        UsageTrackingQueryCachingPolicy {
            recently_used_filters,
        }
    }

    fn is_costly(w: &dyn Weight) -> bool {
        let query_type = w.actual_query_type();
        query_type == PHRASE || query_type == PREFIX
    }

    fn is_cheap(w: &dyn Weight) -> bool {
        w.actual_query_type() == TERM
    }

    fn cache_min_frequency(&self, w: &dyn Weight) -> u32 {
        if Self::is_costly(w) {
            2
        } else if Self::is_cheap(w) {
            20
        } else {
            5
        }
    }

    /// How many times `w` was used among the recent history.
    pub fn frequency(&self, w: &dyn Weight) -> u32 {
        let hash_code = w.hash_code();
        match self.recently_used_filters.lock() {
            Ok(recently_used_filters) => recently_used_filters.frequency(hash_code),
            Err(_) => 0,
        }
    }
}

impl QueryCachingPolicy for UsageTrackingQueryCachingPolicy {
    fn on_use(&self, weight: &dyn Weight) {
        let hash_code = weight.hash_code();
        if let Ok(mut recently_used_filters) = self.recently_used_filters.lock() {
            recently_used_filters.add(hash_code);
        }
    }

    fn should_cache(&self, weight: &dyn Weight) -> Result<bool> {
        if weight.actual_query_type() == MATCH_ALL {
            return Ok(false);
        }
        Ok(self.frequency(weight) >= self.cache_min_frequency(weight))
    }
}

impl Default for UsageTrackingQueryCachingPolicy {
    fn default() -> Self {
        UsageTrackingQueryCachingPolicy::new(256)
    }
}

/// A ring buffer that tracks the frequency of the integers that it contains.
/// This is typically useful to track the hash codes of popular recently-used
/// items.
pub struct FrequencyTrackingRingBuffer {
    max_size: usize,
    buffer: Vec<u32>,
    position: usize,
    frequencies: IntBag,
}

impl FrequencyTrackingRingBuffer {
    /// Creates a buffer holding at most `max_size` items, initially filled
    /// with `sentinel`.
    pub fn new(max_size: usize, sentinel: u32) -> FrequencyTrackingRingBuffer {
        assert!(max_size >= 2, "max_size must be at least 2");
        let mut frequencies = IntBag::new(max_size);
        for _ in 0..max_size {
            frequencies.add(sentinel);
        }
        FrequencyTrackingRingBuffer {
            max_size,
            buffer: vec![sentinel; max_size],
            position: 0,
            frequencies,
        }
    }

    /// Adds `i`, evicting the oldest entry.
    pub fn add(&mut self, i: u32) {
        let evicted = self.buffer[self.position];
        let removed = self.frequencies.remove(evicted);
        debug_assert!(removed);
        self.buffer[self.position] = i;
        self.frequencies.add(i);
        self.position = (self.position + 1) % self.max_size;
    }

    pub fn frequency(&self, key: u32) -> u32 {
        self.frequencies.frequency(key)
    }
}

/// Open addressing multiset of integers, sized once since the ring buffer
/// never holds more than `max_size` keys.
struct IntBag {
    keys: Vec<u32>,
    freqs: Vec<u32>,
    mask: usize,
}

impl IntBag {
    fn new(max_size: usize) -> IntBag {
        // load factor of 2/3
        let capacity = max(2, max_size * 3 / 2).next_power_of_two();
        IntBag {
            keys: vec![0u32; capacity],
            freqs: vec![0u32; capacity],
            mask: capacity - 1,
        }
    }

    fn slot_of(&self, key: u32) -> usize {
        let mut slot = key as usize & self.mask;
        while self.freqs[slot] != 0 && self.keys[slot] != key {
            slot = (slot + 1) & self.mask;
        }
        slot
    }

    fn frequency(&self, key: u32) -> u32 {
        self.freqs[self.slot_of(key)]
    }

    fn add(&mut self, key: u32) -> u32 {
        let slot = self.slot_of(key);
        self.keys[slot] = key;
        self.freqs[slot] += 1;
        self.freqs[slot]
    }

    /// Decrements the frequency of `key`, false if it was absent.
    fn remove(&mut self, key: u32) -> bool {
        let slot = self.slot_of(key);
        if self.freqs[slot] == 0 {
            return false;
        }
        self.freqs[slot] -= 1;
        if self.freqs[slot] == 0 {
            self.relocate_adjacent_keys(slot);
        }
        true
    }

    /// Closes the hole left at `free_slot` so that probing chains stay
    /// unbroken.
    fn relocate_adjacent_keys(&mut self, mut free_slot: usize) {
        let mut slot = (free_slot + 1) & self.mask;
        while self.freqs[slot] != 0 {
            let key = self.keys[slot];
            let expected_slot = key as usize & self.mask;
            if Self::between(expected_slot, slot, free_slot) {
                self.keys[free_slot] = key;
                self.freqs[free_slot] = self.freqs[slot];
                self.freqs[slot] = 0;
                free_slot = slot;
            }
            slot = (slot + 1) & self.mask;
        }
    }

    fn between(chain_start: usize, chain_end: usize, slot: usize) -> bool {
        if chain_start <= chain_end {
            chain_start <= slot && slot <= chain_end
        } else {
            // the chain wraps around the end of the array
            slot >= chain_start || slot <= chain_end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::reader::LeafReaderContext;
    use crate::core::search::explanation::Explanation;
    use crate::core::search::scorer::Scorer;
    use crate::core::util::DocId;
    use std::fmt;

    struct TypedWeight(&'static str);

    impl Weight for TypedWeight {
        fn create_scorer(&self, _leaf: &LeafReaderContext) -> Result<Option<Box<dyn Scorer>>> {
            Ok(None)
        }

        fn query_type(&self) -> &'static str {
            self.0
        }

        fn normalize(&mut self, _norm: f32, _boost: f32) {}

        fn value_for_normalization(&self) -> f32 {
            1.0
        }

        fn needs_scores(&self) -> bool {
            false
        }

        fn explain(&self, _leaf: &LeafReaderContext, _doc: DocId) -> Result<Explanation> {
            Ok(Explanation::no_match("typed".into()))
        }
    }

    impl fmt::Display for TypedWeight {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "TypedWeight({})", self.0)
        }
    }

    fn uses_before_caching(policy: &UsageTrackingQueryCachingPolicy, w: &dyn Weight) -> u32 {
        for used in 0..100 {
            if policy.should_cache(w).unwrap() {
                return used;
            }
            policy.on_use(w);
        }
        panic!("{} never cached", w);
    }

    #[test]
    fn test_usage_tracking_thresholds() {
        let policy = UsageTrackingQueryCachingPolicy::default();
        assert_eq!(uses_before_caching(&policy, &TypedWeight(PHRASE)), 2);
        assert_eq!(uses_before_caching(&policy, &TypedWeight(PREFIX)), 2);
        assert_eq!(uses_before_caching(&policy, &TypedWeight(TERM)), 20);
        assert_eq!(uses_before_caching(&policy, &TypedWeight("boolean")), 5);

        let all = TypedWeight(MATCH_ALL);
        for _ in 0..50 {
            policy.on_use(&all);
        }
        assert!(!policy.should_cache(&all).unwrap());
    }

    #[test]
    fn test_history_forgets_old_uses() {
        let policy = UsageTrackingQueryCachingPolicy::new(4);
        let phrase = TypedWeight(PHRASE);
        policy.on_use(&phrase);
        policy.on_use(&phrase);
        assert!(policy.should_cache(&phrase).unwrap());
        for i in 0..4 {
            policy.on_use(&TypedWeight(["a", "b", "c", "d"][i]));
        }
        assert_eq!(policy.frequency(&phrase), 0);
        assert!(!policy.should_cache(&phrase).unwrap());
    }

    #[test]
    fn test_fixed_policies() {
        let w = TypedWeight(TERM);
        assert!(AlwaysCacheQueryCachingPolicy.should_cache(&w).unwrap());
        assert!(!NeverCacheQueryCachingPolicy.should_cache(&w).unwrap());
    }

    #[test]
    fn test_ring_buffer_frequencies() {
        let mut buffer = FrequencyTrackingRingBuffer::new(3, SENTINEL);
        assert_eq!(buffer.frequency(SENTINEL), 3);
        buffer.add(7);
        buffer.add(7);
        buffer.add(9);
        assert_eq!(buffer.frequency(7), 2);
        assert_eq!(buffer.frequency(SENTINEL), 0);
        buffer.add(9);
        assert_eq!(buffer.frequency(7), 1);
        assert_eq!(buffer.frequency(9), 2);
    }
}
