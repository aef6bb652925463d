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

//! Query execution: rewriting, weighting, scoring and collecting hits.

pub mod cache;
pub mod collector;
pub mod posting_iterator;
pub mod query;
pub mod scorer;
pub mod similarity;
pub mod sort_field;

mod searcher;

pub use self::searcher::*;

mod explanation;

pub use self::explanation::*;

mod statistics;

pub use self::statistics::*;

mod top_docs;

pub use self::top_docs::*;

mod search_manager;

pub use self::search_manager::*;

use std::i32;

use crate::core::util::DocId;

use crate::error::Result;

error_chain! {
    types {
        Error, ErrorKind, ResultExt;
    }

    errors {
        SearchFailed {
            description("Search failed")
        }

        TooManyClauses(max: usize) {
            description("too many boolean clauses")
            display("maxClauseCount is set to {}", max)
        }
    }
}

pub type Payload = Vec<u8>;

/// When returned by `next()`, `advance(DocId)` and
/// `doc_id()` it means there are no more docs in the iterator.
pub const NO_MORE_DOCS: DocId = i32::MAX;

/// This trait defines methods to iterate over a set of non-decreasing
/// doc ids. Note that this class assumes it iterates on doc Ids, and therefore
/// `NO_MORE_DOCS` is set to `i32::MAX` in order to be used as
/// a sentinel object. Implementations of this class are expected to consider
/// `std:i32:MAX` as an invalid value.
pub trait DocIterator: Send {
    /// Returns the following:
    ///
    /// * `-1` if `next()` or `advance(DocId)` were not called yet.
    /// * `NO_MORE_DOCS` if the iterator has exhausted.
    /// * Otherwise it should return the doc ID it is currently on.
    fn doc_id(&self) -> DocId;

    /// Advances to the next document in the set and returns the doc it is
    /// currently on, or `NO_MORE_DOCS` if there are no more docs in the
    /// set.
    ///
    /// *NOTE:* after the iterator has exhausted you should not call this
    /// method, as it may result in unpredicted behavior.
    fn next(&mut self) -> Result<DocId>;

    /// Advances to the first beyond the current whose document number is greater
    /// than or equal to _target_, and returns the document number itself.
    /// Exhausts the iterator and returns `NO_MORE_DOCS` if _target_
    /// is greater than the highest document number in the set.
    ///
    /// The behavior of this method is *undefined* when called with
    /// `target <= current`, or after the iterator has exhausted.
    ///
    /// *NOTE:* this method may be called with `NO_MORE_DOCS` for
    /// efficiency by some Scorers.
    fn advance(&mut self, target: DocId) -> Result<DocId>;

    /// Slow (linear) implementation of `advance` relying on
    /// `next()` to advance beyond the target position.
    fn slow_advance(&mut self, target: DocId) -> Result<DocId> {
        debug_assert!(self.doc_id() < target);
        let mut doc = self.doc_id();
        while doc < target {
            doc = self.next()?;
        }
        Ok(doc)
    }

    /// Returns the estimated cost of this `DocIterator`.
    ///
    /// This is generally an upper bound of the number of documents this iterator
    /// might match, but may be a rough heuristic, hardcoded value, or otherwise
    /// completely inaccurate.
    fn cost(&self) -> usize;
}

impl DocIterator for Box<dyn DocIterator> {
    fn doc_id(&self) -> DocId {
        (**self).doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        (**self).next()
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        (**self).advance(target)
    }

    fn cost(&self) -> usize {
        (**self).cost()
    }
}

/// a `DocIterator` that means no matching doc is available
#[derive(Clone)]
pub struct EmptyDocIterator {
    doc_id: DocId,
}

impl Default for EmptyDocIterator {
    fn default() -> Self {
        EmptyDocIterator { doc_id: -1 }
    }
}

impl DocIterator for EmptyDocIterator {
    fn doc_id(&self) -> DocId {
        self.doc_id
    }

    fn next(&mut self) -> Result<DocId> {
        self.doc_id = NO_MORE_DOCS;
        Ok(NO_MORE_DOCS)
    }

    fn advance(&mut self, _target: DocId) -> Result<DocId> {
        self.doc_id = NO_MORE_DOCS;
        Ok(NO_MORE_DOCS)
    }

    fn cost(&self) -> usize {
        0usize
    }
}

/// Iterates every doc in `[0, max_doc)`.
pub struct AllDocsIterator {
    doc: DocId,
    max_doc: DocId,
}

impl AllDocsIterator {
    pub fn new(max_doc: DocId) -> AllDocsIterator {
        AllDocsIterator { doc: -1, max_doc }
    }
}

impl DocIterator for AllDocsIterator {
    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn next(&mut self) -> Result<DocId> {
        let target = self.doc + 1;
        self.advance(target)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        self.doc = if target >= self.max_doc {
            NO_MORE_DOCS
        } else {
            target
        };
        Ok(self.doc)
    }

    fn cost(&self) -> usize {
        self.max_doc.max(0) as usize
    }
}

/// A DocIdSet contains a set of doc ids. Implementing classes must
/// only implement `iterator` to provide access to the set.
pub trait DocIdSet: Send + Sync {
    /// Provides a `DocIterator` to access the set.
    /// This implementation can return None if there
    /// are no docs that match.
    fn iterator(&self) -> Result<Option<Box<dyn DocIterator>>>;

    /// Whether the set is cheap to replay, so that a query cache may keep it.
    ///
    /// This is only a hint: the `QueryCachingPolicy` decides whether a query
    /// is cached, and the cache only refuses sets that answer `false`.
    fn is_cacheable(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub mod tests {
    use super::query::Weight;
    use super::scorer::Scorer;
    use super::*;
    use crate::core::index::reader::{LeafReaderContext, StandardDirectoryReader};
    use crate::core::index::tests::{build_index, new_directory};
    use std::fmt;

    pub struct MockDocIterator {
        doc_ids: Vec<DocId>,
        current_doc_id: DocId,
        offset: i32,
    }

    impl MockDocIterator {
        pub fn new(ids: Vec<DocId>) -> MockDocIterator {
            MockDocIterator {
                doc_ids: ids,
                current_doc_id: -1,
                offset: -1,
            }
        }
    }

    impl DocIterator for MockDocIterator {
        fn doc_id(&self) -> DocId {
            self.current_doc_id
        }

        fn next(&mut self) -> Result<DocId> {
            self.offset += 1;

            if (self.offset as usize) >= self.doc_ids.len() {
                self.current_doc_id = NO_MORE_DOCS;
            } else {
                self.current_doc_id = self.doc_ids[self.offset as usize];
            }

            Ok(self.doc_id())
        }

        fn advance(&mut self, target: DocId) -> Result<DocId> {
            loop {
                let doc_id = self.next()?;
                if doc_id >= target {
                    return Ok(doc_id);
                }
            }
        }

        fn cost(&self) -> usize {
            self.doc_ids.len()
        }
    }

    /// Scores every doc with its own id.
    pub struct MockSimpleScorer<T: DocIterator> {
        iterator: T,
    }

    impl<T: DocIterator> MockSimpleScorer<T> {
        pub fn new(iterator: T) -> Self {
            MockSimpleScorer { iterator }
        }
    }

    impl<T: DocIterator> Scorer for MockSimpleScorer<T> {
        fn score(&mut self) -> Result<f32> {
            Ok(self.doc_id() as f32)
        }
    }

    impl<T: DocIterator> DocIterator for MockSimpleScorer<T> {
        fn doc_id(&self) -> DocId {
            self.iterator.doc_id()
        }

        fn next(&mut self) -> Result<DocId> {
            self.iterator.next()
        }

        fn advance(&mut self, target: DocId) -> Result<DocId> {
            self.iterator.advance(target)
        }

        fn cost(&self) -> usize {
            self.iterator.cost()
        }
    }

    /// Matches the same docs in every leaf.
    pub struct MockSimpleWeight {
        docs: Vec<DocId>,
    }

    impl MockSimpleWeight {
        pub fn new(docs: Vec<DocId>) -> MockSimpleWeight {
            MockSimpleWeight { docs }
        }
    }

    impl Weight for MockSimpleWeight {
        fn create_scorer(&self, _leaf: &LeafReaderContext) -> Result<Option<Box<dyn Scorer>>> {
            Ok(Some(Box::new(create_mock_scorer(self.docs.clone()))))
        }

        fn query_type(&self) -> &'static str {
            "mock"
        }

        fn normalize(&mut self, _norm: f32, _boost: f32) {}

        fn value_for_normalization(&self) -> f32 {
            0.0
        }

        fn needs_scores(&self) -> bool {
            false
        }

        fn explain(&self, _leaf: &LeafReaderContext, doc: DocId) -> Result<Explanation> {
            let is_match = self.docs.contains(&doc);
            Ok(Explanation::new(
                is_match,
                doc as f32,
                "mock".to_string(),
                vec![],
            ))
        }
    }

    impl fmt::Display for MockSimpleWeight {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "MockSimpleWeight({:?})", self.docs)
        }
    }

    pub fn create_mock_scorer(docs: Vec<DocId>) -> MockSimpleScorer<MockDocIterator> {
        MockSimpleScorer::new(MockDocIterator::new(docs))
    }

    pub fn create_mock_weight(docs: Vec<DocId>) -> MockSimpleWeight {
        MockSimpleWeight::new(docs)
    }

    pub fn create_mock_doc_iterator(docs: Vec<DocId>) -> MockDocIterator {
        MockDocIterator::new(docs)
    }

    /// Opens a committed index of `bodies`, `docs_per_segment` docs per
    /// leaf. Doc `i` has the id `i`.
    pub fn open_reader(bodies: &[&str], docs_per_segment: usize) -> StandardDirectoryReader {
        let dir = new_directory();
        let writer = build_index(&dir, bodies, docs_per_segment);
        writer.close().unwrap();
        StandardDirectoryReader::open(dir).unwrap()
    }

    #[test]
    fn test_all_docs_iterator() {
        let mut iter = AllDocsIterator::new(3);
        assert_eq!(iter.doc_id(), -1);
        assert_eq!(iter.next().unwrap(), 0);
        assert_eq!(iter.advance(2).unwrap(), 2);
        assert_eq!(iter.next().unwrap(), NO_MORE_DOCS);
        assert_eq!(iter.cost(), 3);

        let mut empty = EmptyDocIterator::default();
        assert_eq!(empty.next().unwrap(), NO_MORE_DOCS);
    }
}
