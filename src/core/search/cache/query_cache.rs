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

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::index::reader::LeafReaderContext;
use crate::core::search::cache::QueryCachingPolicy;
use crate::core::search::explanation::Explanation;
use crate::core::search::query::Weight;
use crate::core::search::scorer::{ConstantScoreScorer, Scorer};
use crate::core::search::{DocIdSet, DocIterator};
use crate::core::util::{Accountable, BitDocIdSet, DocId};

use crate::error::Result;

pub const CACHING: &str = "caching";

struct CachedSet {
    set: Arc<BitDocIdSet>,
    /// Deletions of the reader the set was computed on.
    num_deleted: i32,
}

#[derive(Default)]
struct LeafCache {
    entries: HashMap<String, CachedSet>,
}

impl LeafCache {
    fn ram_bytes_used(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| k.len() + v.set.ram_bytes_used())
            .sum()
    }
}

struct CacheData {
    // query key -> last access stamp, and the reverse mapping kept ordered so
    // the least recently used query is the first entry
    unique_queries: HashMap<String, u64>,
    recently_used: BTreeMap<u64, String>,
    clock: u64,
    // core cache key -> cached sets of that segment core
    cache: HashMap<String, LeafCache>,
    max_size: usize,
    hit_count: u64,
    miss_count: u64,
}

impl CacheData {
    fn new(max_size: usize) -> CacheData {
        CacheData {
            unique_queries: HashMap::new(),
            recently_used: BTreeMap::new(),
            clock: 0,
            cache: HashMap::new(),
            max_size,
            hit_count: 0,
            miss_count: 0,
        }
    }

    fn touch(&mut self, query_key: &str) {
        self.clock += 1;
        let stamp = self.clock;
        if let Some(old) = self.unique_queries.insert(query_key.to_string(), stamp) {
            self.recently_used.remove(&old);
        }
        self.recently_used.insert(stamp, query_key.to_string());
    }

    fn get(
        &mut self,
        query_key: &str,
        core_key: &str,
        num_deleted: i32,
    ) -> Option<Arc<BitDocIdSet>> {
        let found = self
            .cache
            .get(core_key)
            .and_then(|leaf| leaf.entries.get(query_key))
            .filter(|cached| cached.num_deleted == num_deleted)
            .map(|cached| Arc::clone(&cached.set));
        if found.is_some() {
            self.hit_count += 1;
            self.touch(query_key);
        } else {
            self.miss_count += 1;
        }
        found
    }

    /// Returns true if this is the first set cached for `core_key`.
    fn put(
        &mut self,
        query_key: &str,
        core_key: &str,
        set: Arc<BitDocIdSet>,
        num_deleted: i32,
    ) -> bool {
        self.touch(query_key);
        let new_core = !self.cache.contains_key(core_key);
        self.cache
            .entry(core_key.to_string())
            .or_insert_with(LeafCache::default)
            .entries
            .insert(query_key.to_string(), CachedSet { set, num_deleted });
        self.evict_if_necessary();
        new_core
    }

    fn evict_if_necessary(&mut self) {
        while self.unique_queries.len() > self.max_size {
            let oldest = match self.recently_used.keys().next() {
                Some(stamp) => *stamp,
                None => break,
            };
            if let Some(query_key) = self.recently_used.remove(&oldest) {
                self.unique_queries.remove(&query_key);
                self.on_eviction(&query_key);
            }
        }
    }

    fn on_eviction(&mut self, query_key: &str) {
        debug!("evicting query '{}' from the query cache", query_key);
        for leaf_cache in self.cache.values_mut() {
            leaf_cache.entries.remove(query_key);
        }
    }

    fn clear_core_cache_key(&mut self, core_key: &str) {
        if self.cache.remove(core_key).is_some() {
            debug!("segment core {} closed, dropping its cached sets", core_key);
        }
    }

    fn size(&self) -> usize {
        self.cache.values().map(|leaf| leaf.entries.len()).sum()
    }
}

/// A query cache that evicts queries using a LRU (least-recently-used)
/// eviction policy in order to remain under a given maximum number of
/// queries.
///
/// Doc sets are cached per segment core, and the sets of a core are dropped
/// once the core is released. A cached set is only reused by readers having
/// the same number of deletions as the reader it was computed on.
///
/// This class is thread-safe.
pub struct LRUQueryCache {
    data: Arc<Mutex<CacheData>>,
}

impl LRUQueryCache {
    pub fn new(max_size: usize) -> LRUQueryCache {
        LRUQueryCache {
            data: Arc::new(Mutex::new(CacheData::new(max_size))),
        }
    }

    /// Wraps `weight` so that the doc sets of the query identified by
    /// `query_key` are cached per segment as decided by `policy`.
    ///
    /// NOTE: The returned weight only matches the same docs, scores are
    /// lost, so only non scoring weights should be cached.
    pub fn do_cache(
        &self,
        weight: Box<dyn Weight>,
        query_key: String,
        policy: Arc<dyn QueryCachingPolicy>,
    ) -> Box<dyn Weight> {
        if weight.query_type() == CACHING {
            return weight;
        }
        Box::new(CachingWrapperWeight {
            data: Arc::clone(&self.data),
            weight,
            policy,
            query_key,
            used: AtomicBool::new(false),
        })
    }

    /// The cached set of `query_key` for the segment of `leaf`, if any.
    pub fn get(
        &self,
        query_key: &str,
        leaf: &LeafReaderContext,
    ) -> Result<Option<Arc<BitDocIdSet>>> {
        let num_deleted = leaf.reader.max_doc() - leaf.reader.num_docs();
        Ok(self
            .data
            .lock()?
            .get(query_key, leaf.reader.core_cache_key(), num_deleted))
    }

    /// Caches `set` for the segment of `leaf`, replacing a set computed
    /// with other deletions.
    pub fn put_if_absent(
        &self,
        query_key: &str,
        leaf: &LeafReaderContext,
        set: Arc<BitDocIdSet>,
    ) -> Result<()> {
        put(&self.data, query_key, leaf, set)
    }

    /// Drops every set cached for a segment core.
    pub fn clear_core_cache_key(&self, core_key: &str) -> Result<()> {
        self.data.lock()?.clear_core_cache_key(core_key);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let mut data = self.data.lock()?;
        data.cache.clear();
        data.unique_queries.clear();
        data.recently_used.clear();
        Ok(())
    }

    pub fn hit_count(&self) -> u64 {
        self.data.lock().map(|d| d.hit_count).unwrap_or(0)
    }

    pub fn miss_count(&self) -> u64 {
        self.data.lock().map(|d| d.miss_count).unwrap_or(0)
    }

    /// Number of cached doc sets, over all segments.
    pub fn cache_size(&self) -> usize {
        self.data.lock().map(|d| d.size()).unwrap_or(0)
    }

    /// Number of distinct queries tracked for eviction.
    pub fn cached_query_count(&self) -> usize {
        self.data.lock().map(|d| d.unique_queries.len()).unwrap_or(0)
    }
}

impl Accountable for LRUQueryCache {
    fn ram_bytes_used(&self) -> usize {
        self.data
            .lock()
            .map(|d| d.cache.values().map(LeafCache::ram_bytes_used).sum())
            .unwrap_or(0)
    }
}

fn put(
    data: &Arc<Mutex<CacheData>>,
    query_key: &str,
    leaf: &LeafReaderContext,
    set: Arc<BitDocIdSet>,
) -> Result<()> {
    let core_key = leaf.reader.core_cache_key();
    let num_deleted = leaf.reader.max_doc() - leaf.reader.num_docs();
    let new_core = data.lock()?.put(query_key, core_key, set, num_deleted);
    if new_core {
        // registered outside of the lock, the listener takes it
        let data = Arc::downgrade(data);
        leaf.reader
            .add_core_close_listener(Box::new(move |core_key: &str| {
                if let Some(data) = data.upgrade() {
                    data.lock()?.clear_core_cache_key(core_key);
                }
                Ok(())
            }))?;
    }
    Ok(())
}

struct CachingWrapperWeight {
    data: Arc<Mutex<CacheData>>,
    weight: Box<dyn Weight>,
    policy: Arc<dyn QueryCachingPolicy>,
    query_key: String,
    used: AtomicBool,
}

impl CachingWrapperWeight {
    fn cached_scorer(set: &BitDocIdSet) -> Result<Option<Box<dyn Scorer>>> {
        match set.iterator()? {
            Some(iterator) => {
                let cost = iterator.cost();
                Ok(Some(Box::new(ConstantScoreScorer::new(0.0, iterator, cost))))
            }
            None => Ok(None),
        }
    }
}

impl Weight for CachingWrapperWeight {
    fn create_scorer(&self, leaf: &LeafReaderContext) -> Result<Option<Box<dyn Scorer>>> {
        if !self.used.swap(true, Ordering::AcqRel) {
            self.policy.on_use(self.weight.as_ref());
        }

        let num_deleted = leaf.reader.max_doc() - leaf.reader.num_docs();
        let core_key = leaf.reader.core_cache_key();
        let cached = self.data.lock()?.get(&self.query_key, core_key, num_deleted);
        if let Some(set) = cached {
            return Self::cached_scorer(&set);
        }

        if !self.policy.should_cache(self.weight.as_ref())? {
            return self.weight.create_scorer(leaf);
        }

        let mut scorer = match self.weight.create_scorer(leaf)? {
            Some(scorer) => scorer,
            None => return Ok(None),
        };
        let set = Arc::new(BitDocIdSet::from_iterator(
            &mut scorer,
            leaf.reader.max_doc() as usize,
        )?);
        if set.is_cacheable() {
            put(&self.data, &self.query_key, leaf, Arc::clone(&set))?;
        }
        Self::cached_scorer(&set)
    }

    fn hash_code(&self) -> u32 {
        self.weight.hash_code()
    }

    fn query_type(&self) -> &'static str {
        CACHING
    }

    fn actual_query_type(&self) -> &'static str {
        self.weight.actual_query_type()
    }

    fn normalize(&mut self, norm: f32, boost: f32) {
        self.weight.normalize(norm, boost)
    }

    fn value_for_normalization(&self) -> f32 {
        self.weight.value_for_normalization()
    }

    fn needs_scores(&self) -> bool {
        false
    }

    fn explain(&self, leaf: &LeafReaderContext, doc: DocId) -> Result<Explanation> {
        self.weight.explain(leaf, doc)
    }
}

impl fmt::Display for CachingWrapperWeight {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CachingWrapperWeight({})", self.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::Term;
    use crate::core::search::cache::{
        AlwaysCacheQueryCachingPolicy, NeverCacheQueryCachingPolicy,
    };
    use crate::core::search::query::{Query, TermQuery};
    use crate::core::search::tests::open_reader;
    use crate::core::search::IndexSearcher;
    use crate::core::util::FixedBitSet;

    fn term(text: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(Term::from_str("body", text), 1.0))
    }

    fn cached_searcher(
        bodies: &[&str],
        cache: &Arc<LRUQueryCache>,
        policy: Arc<dyn QueryCachingPolicy>,
    ) -> IndexSearcher {
        IndexSearcher::new(Arc::new(open_reader(bodies, 2)))
            .with_query_cache(Arc::clone(cache), policy)
    }

    fn hits(searcher: &IndexSearcher, query: &dyn Query, filter: &dyn Query) -> Vec<DocId> {
        let top = searcher.search_with_filter(query, filter, 10).unwrap();
        let mut docs: Vec<DocId> = top.score_docs().iter().map(|d| d.doc_id()).collect();
        docs.sort();
        docs
    }

    #[test]
    fn test_filter_sets_are_reused() {
        let cache = Arc::new(LRUQueryCache::new(10));
        let searcher = cached_searcher(
            &["a b", "a", "b", "a b"],
            &cache,
            Arc::new(AlwaysCacheQueryCachingPolicy),
        );
        let (a, b) = (term("a"), term("b"));

        assert_eq!(hits(&searcher, a.as_ref(), b.as_ref()), vec![0, 3]);
        assert_eq!(cache.cache_size(), 2);
        assert_eq!(cache.cached_query_count(), 1);
        assert_eq!(cache.miss_count(), 2);
        assert_eq!(cache.hit_count(), 0);

        assert_eq!(hits(&searcher, a.as_ref(), b.as_ref()), vec![0, 3]);
        assert_eq!(cache.hit_count(), 2);
        assert!(cache.ram_bytes_used() > 0);
    }

    #[test]
    fn test_never_cache_policy() {
        let cache = Arc::new(LRUQueryCache::new(10));
        let searcher = cached_searcher(
            &["a b", "a", "b", "a b"],
            &cache,
            Arc::new(NeverCacheQueryCachingPolicy),
        );
        assert_eq!(hits(&searcher, term("a").as_ref(), term("b").as_ref()), vec![0, 3]);
        assert_eq!(cache.cache_size(), 0);
        assert_eq!(cache.miss_count(), 2);
    }

    #[test]
    fn test_least_recently_used_query_is_evicted() {
        let cache = Arc::new(LRUQueryCache::new(1));
        let searcher = cached_searcher(
            &["a b", "a", "b", "a b"],
            &cache,
            Arc::new(AlwaysCacheQueryCachingPolicy),
        );
        hits(&searcher, term("a").as_ref(), term("b").as_ref());
        hits(&searcher, term("b").as_ref(), term("a").as_ref());
        assert_eq!(cache.cached_query_count(), 1);
        assert_eq!(cache.cache_size(), 2);

        // "body:b" was evicted, so it misses again
        let misses = cache.miss_count();
        hits(&searcher, term("a").as_ref(), term("b").as_ref());
        assert_eq!(cache.miss_count(), misses + 2);
    }

    #[test]
    fn test_closed_core_drops_its_sets() {
        let cache = Arc::new(LRUQueryCache::new(10));
        {
            let searcher = cached_searcher(
                &["a b", "a", "b", "a b"],
                &cache,
                Arc::new(AlwaysCacheQueryCachingPolicy),
            );
            hits(&searcher, term("a").as_ref(), term("b").as_ref());
            assert_eq!(cache.cache_size(), 2);
        }
        assert_eq!(cache.cache_size(), 0);
    }

    #[test]
    fn test_sets_are_keyed_by_deletions() {
        let mut data = CacheData::new(4);
        let mut bits = FixedBitSet::new(4);
        bits.set(1);
        let set = Arc::new(BitDocIdSet::new(bits));
        assert!(data.put("body:a", "_0@1", Arc::clone(&set), 0));
        assert!(!data.put("body:b", "_0@1", set, 0));

        assert!(data.get("body:a", "_0@1", 0).is_some());
        assert!(data.get("body:a", "_0@1", 1).is_none());
        assert!(data.get("body:a", "_1@2", 0).is_none());
        assert_eq!(data.hit_count, 1);
        assert_eq!(data.miss_count, 2);

        data.clear_core_cache_key("_0@1");
        assert_eq!(data.size(), 0);
        assert!(data.get("body:a", "_0@1", 0).is_none());
    }
}
