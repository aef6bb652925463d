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

use crate::core::index::reader::{IndexReaderRef, StandardDirectoryReader};
use crate::core::index::writer::IndexWriter;
use crate::core::search::cache::{LRUQueryCache, QueryCachingPolicy};
use crate::core::search::searcher::IndexSearcher;
use crate::core::store::directory::DirectoryRc;
use crate::core::util::{ReferenceManager, ReferenceManagerBase};

use crate::error::Result;

use std::sync::Arc;

/// Creates the `IndexSearcher` of every reader a `SearcherManager` opens.
pub trait SearcherFactory: Send + Sync {
    fn new_searcher(&self, reader: IndexReaderRef) -> Result<IndexSearcher>;
}

#[derive(Default)]
pub struct DefaultSearcherFactory;

impl SearcherFactory for DefaultSearcherFactory {
    fn new_searcher(&self, reader: IndexReaderRef) -> Result<IndexSearcher> {
        Ok(IndexSearcher::new(reader))
    }
}

/// Gives every searcher the same query cache, so cached sets of segments
/// surviving a refresh are reused.
pub struct CachingSearcherFactory {
    cache: Arc<LRUQueryCache>,
    policy: Arc<dyn QueryCachingPolicy>,
}

impl CachingSearcherFactory {
    pub fn new(cache: Arc<LRUQueryCache>, policy: Arc<dyn QueryCachingPolicy>) -> Self {
        CachingSearcherFactory { cache, policy }
    }
}

impl SearcherFactory for CachingSearcherFactory {
    fn new_searcher(&self, reader: IndexReaderRef) -> Result<IndexSearcher> {
        Ok(IndexSearcher::new(reader)
            .with_query_cache(Arc::clone(&self.cache), Arc::clone(&self.policy)))
    }
}

/// Utility to safely share `IndexSearcher` instances across multiple
/// threads, while periodically reopening. This class ensures each searcher's
/// reader is closed only once all threads have finished using it.
///
/// Use `acquire` to obtain the current searcher, and `release` to release
/// it once done:
///
/// ```ignore
/// let searcher = manager.acquire()?;
/// let hits = searcher.search_top(&query, 10);
/// manager.release(searcher)?;
/// ```
///
/// In addition you should periodically call `maybe_refresh`. While it's
/// possible to call this just before running each query, this is discouraged
/// since it penalizes the unlucky queries that need to refresh. It's better
/// to use a separate background thread that periodically calls
/// `maybe_refresh`. Finally, be sure to call `close` once you are done.
pub struct SearcherManager<SF: SearcherFactory> {
    searcher_factory: SF,
    base: ReferenceManagerBase<IndexSearcher>,
}

impl<SF: SearcherFactory> SearcherManager<SF> {
    /// Manages searchers over `reader` and its refreshed versions. The
    /// manager takes over the caller's reference on `reader`.
    pub fn new(reader: IndexReaderRef, searcher_factory: SF) -> Result<Self> {
        let current = match searcher_factory.new_searcher(Arc::clone(&reader)) {
            Ok(searcher) => searcher,
            Err(e) => {
                reader.dec_ref()?;
                return Err(e);
            }
        };
        Ok(SearcherManager {
            searcher_factory,
            base: ReferenceManagerBase::new(Arc::new(current)),
        })
    }

    /// Searches the latest commit of `directory`, refreshes pick up new
    /// commits.
    pub fn open(directory: DirectoryRc, searcher_factory: SF) -> Result<Self> {
        let reader = StandardDirectoryReader::open(directory)?;
        Self::new(Arc::new(reader), searcher_factory)
    }

    /// Searches near real time readers of `writer`, refreshes pick up its
    /// uncommitted changes.
    pub fn from_writer(
        writer: &IndexWriter,
        apply_all_deletes: bool,
        searcher_factory: SF,
    ) -> Result<Self> {
        let reader = writer.get_reader(apply_all_deletes)?;
        Self::new(Arc::new(reader), searcher_factory)
    }
}

impl<SF: SearcherFactory> ReferenceManager<IndexSearcher> for SearcherManager<SF> {
    fn base(&self) -> &ReferenceManagerBase<IndexSearcher> {
        &self.base
    }

    fn dec_ref(&self, searcher: &IndexSearcher) -> Result<()> {
        searcher.reader().dec_ref()
    }

    fn refresh_if_needed(
        &self,
        searcher: &Arc<IndexSearcher>,
    ) -> Result<Option<Arc<IndexSearcher>>> {
        let reader = match searcher.reader().refresh()? {
            Some(reader) => reader,
            None => return Ok(None),
        };
        debug!(
            "refreshed reader {} to {}",
            searcher.reader().cache_key(),
            reader.cache_key()
        );
        match self.searcher_factory.new_searcher(Arc::clone(&reader)) {
            Ok(searcher) => Ok(Some(Arc::new(searcher))),
            Err(e) => {
                reader.dec_ref()?;
                Err(e)
            }
        }
    }

    fn try_inc_ref(&self, searcher: &IndexSearcher) -> Result<bool> {
        Ok(searcher.reader().try_inc_ref())
    }

    fn ref_count(&self, searcher: &IndexSearcher) -> usize {
        searcher.reader().ref_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::tests::{build_index, new_directory, text_doc};
    use crate::core::index::Term;
    use crate::core::search::cache::AlwaysCacheQueryCachingPolicy;
    use crate::core::search::query::{Query, TermQuery};

    use std::thread;

    fn term(text: &str) -> TermQuery {
        TermQuery::new(Term::from_str("body", text), 1.0)
    }

    fn count(searcher: &IndexSearcher, query: &dyn Query) -> usize {
        searcher.search_top(query, 10).unwrap().total_hits()
    }

    #[test]
    fn test_refresh_on_commit() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b"], 2);
        let manager = SearcherManager::open(Arc::clone(&dir), DefaultSearcherFactory).unwrap();

        let first = manager.acquire().unwrap();
        assert_eq!(first.reader().num_docs(), 2);
        assert!(manager.maybe_refresh().unwrap());
        let same = manager.acquire().unwrap();
        assert!(Arc::ptr_eq(&first, &same));
        manager.release(same).unwrap();

        writer.add_document(text_doc("2", "a c")).unwrap();
        writer.commit().unwrap();
        assert!(manager.maybe_refresh().unwrap());

        let second = manager.acquire().unwrap();
        assert_eq!(second.reader().num_docs(), 3);
        assert_eq!(count(&second, &term("a")), 2);

        // the old searcher stays usable until released
        assert_eq!(count(&first, &term("a")), 1);
        let old_reader = Arc::clone(first.reader());
        assert_eq!(old_reader.ref_count(), 1);
        manager.release(first).unwrap();
        assert!(old_reader.ensure_open().is_err());

        manager.release(second).unwrap();
        manager.close().unwrap();
        assert!(manager.acquire().is_err());
        writer.close().unwrap();
    }

    #[test]
    fn test_near_real_time_refresh() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a"], 1);
        let manager = SearcherManager::from_writer(&writer, true, DefaultSearcherFactory).unwrap();

        writer.add_document(text_doc("1", "a")).unwrap();
        writer
            .delete_documents(&[Term::from_str("id", "0")])
            .unwrap();
        manager.maybe_refresh_blocking().unwrap();

        let searcher = manager.acquire().unwrap();
        assert_eq!(searcher.reader().num_docs(), 1);
        assert_eq!(count(&searcher, &term("a")), 1);
        manager.release(searcher).unwrap();
        manager.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_query_cache_survives_refresh() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a b", "b"], 2);
        let cache = Arc::new(LRUQueryCache::new(16));
        let policy = Arc::new(AlwaysCacheQueryCachingPolicy);
        let factory = CachingSearcherFactory::new(Arc::clone(&cache), policy);
        let manager = SearcherManager::open(Arc::clone(&dir), factory).unwrap();

        let searcher = manager.acquire().unwrap();
        let hits = searcher.search_with_filter(&term("a"), &term("b"), 10).unwrap();
        assert_eq!(hits.total_hits(), 1);
        manager.release(searcher).unwrap();
        assert_eq!(cache.cache_size(), 1);

        writer.add_document(text_doc("2", "a b")).unwrap();
        writer.commit().unwrap();
        manager.maybe_refresh().unwrap();

        let searcher = manager.acquire().unwrap();
        let hits = searcher.search_with_filter(&term("a"), &term("b"), 10).unwrap();
        assert_eq!(hits.total_hits(), 2);
        // the unchanged segment is answered from the cache
        assert_eq!(cache.hit_count(), 1);
        manager.release(searcher).unwrap();
        manager.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_concurrent_acquire_and_refresh() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a"], 1);
        let manager =
            Arc::new(SearcherManager::open(Arc::clone(&dir), DefaultSearcherFactory).unwrap());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let searcher = manager.acquire().unwrap();
                        assert!(count(&searcher, &term("a")) >= 1);
                        manager.release(searcher).unwrap();
                    }
                })
            })
            .collect();

        for i in 1..5 {
            writer.add_document(text_doc(&i.to_string(), "a")).unwrap();
            writer.commit().unwrap();
            manager.maybe_refresh_blocking().unwrap();
        }
        for handle in readers {
            handle.join().unwrap();
        }

        let searcher = manager.acquire().unwrap();
        assert_eq!(count(&searcher, &term("a")), 5);
        manager.release(searcher).unwrap();
        manager.close().unwrap();
        writer.close().unwrap();
    }
}
