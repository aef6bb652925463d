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

mod boolean_query;

pub use self::boolean_query::*;

mod match_all_query;

pub use self::match_all_query::*;

mod phrase_query;

pub use self::phrase_query::*;

mod prefix_query;

pub use self::prefix_query::*;

mod term_query;

pub use self::term_query::*;

use crate::core::index::reader::{IndexReader, LeafReaderContext};
use crate::core::index::Term;
use crate::core::search::explanation::Explanation;
use crate::core::search::scorer::Scorer;
use crate::core::search::searcher::IndexSearcher;
use crate::core::util::DocId;

use crate::error::Result;
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::fmt::Display;
use std::hash::{Hash, Hasher};

/// The abstract base of queries.
///
/// A query is the user facing, boost bearing expression. It is rewritten
/// into primitive queries by `IndexSearcher::rewrite`, then bound to a
/// searcher with `create_weight`. Queries are boxed freely, composite
/// queries such as [`BooleanQuery`] own their children as `Box<dyn Query>`.
///
/// here is the list of [`Query`]s that we already implemented:
/// * [`TermQuery`]
/// * [`BooleanQuery`]
/// * [`PrefixQuery`]
/// * [`PhraseQuery`]
/// * [`MatchAllDocsQuery`]
///
/// The `Display` output doubles as the query's identity in the query cache,
/// so it must render every parameter that changes the matches or the scores.
pub trait Query: Display + Send + Sync {
    /// Create new `Weight` based on query.
    fn create_weight(
        &self,
        searcher: &IndexSearcher,
        needs_scores: bool,
    ) -> Result<Box<dyn Weight>>;

    /// Expands this query into more primitive ones. Returns `None` once the
    /// query is primitive.
    fn rewrite(&self, _reader: &dyn IndexReader) -> Result<Option<Box<dyn Query>>> {
        Ok(None)
    }

    /// The terms this query reads, for highlight and statistics use.
    fn extract_terms(&self) -> Vec<Term>;

    fn boost(&self) -> f32;

    fn set_boost(&mut self, boost: f32);

    fn query_type(&self) -> &'static str;

    fn clone_box(&self) -> Box<dyn Query>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Query> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Expert: Calculate query weights and build query scorers.
///
/// The purpose of [`Weight`] is to ensure searching does not modify a
/// [`Query`], so that a [`Query`] instance can be reused.
/// [`IndexSearcher`] dependent state of the query should reside in the [`Weight`]
///
/// `LeafReader` dependent state should reside in the [`Scorer`].
///
/// Since [`Weight`] creates [`Scorer`] instances for a given `LeafReaderContext`
/// callers must maintain the relationship between the searcher's `IndexReader`
/// and the context used to create a [`Scorer`].
///
/// A `Weight` is used in the following way:
/// - A `Weight` is constructed by a top-level query, given a `IndexSearcher`
/// `Query#create_weight()`.
/// - The `value_for_normalization()` method is called on the `Weight`
/// to compute the query normalization factor `Similarity#query_norm()` of the
/// query clauses contained in the query.
/// - The query normalization factor is passed to `normalize()`. At this point the weighting is
///   complete.
/// - A `Scorer` is constructed by `create_scorer()`
pub trait Weight: Display + Send + Sync {
    /// Returns `None` when no document of the leaf can match.
    fn create_scorer(&self, leaf: &LeafReaderContext) -> Result<Option<Box<dyn Scorer>>>;

    fn hash_code(&self) -> u32 {
        let key = format!("{}", self);
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    fn query_type(&self) -> &'static str;

    /// return the actual query type for the weight
    /// it is useful when self is a wrapped weight such as `CachingWrapperWeight`
    fn actual_query_type(&self) -> &'static str {
        self.query_type()
    }

    /// Assigns the query normalization factor and boost to this.
    fn normalize(&mut self, norm: f32, boost: f32);

    /// The value for normalization of contained query clauses (e.g. sum of squared weights).
    fn value_for_normalization(&self) -> f32;

    fn needs_scores(&self) -> bool;

    /// An explanation of the score computation for the named document.
    ///
    /// `doc` is local to `leaf`.
    fn explain(&self, leaf: &LeafReaderContext, doc: DocId) -> Result<Explanation>;
}

/// Renders a boost suffix the way every query of this crate does.
pub(crate) fn boost_suffix(boost: f32) -> String {
    if (boost - 1.0).abs() > ::std::f32::EPSILON {
        format!("^{}", boost)
    } else {
        String::new()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::core::search::tests::open_reader;
    use crate::core::search::NO_MORE_DOCS;
    use std::sync::Arc;

    /// Collects the matching docs of `query` as (doc, score), in doc order.
    pub fn matches(searcher: &IndexSearcher, query: &dyn Query) -> Vec<(DocId, f32)> {
        let weight = searcher.create_normalized_weight(query, true).unwrap();
        let mut hits = vec![];
        for leaf in searcher.leaves() {
            if let Some(mut scorer) = weight.create_scorer(leaf).unwrap() {
                loop {
                    let doc = scorer.next().unwrap();
                    if doc == NO_MORE_DOCS {
                        break;
                    }
                    hits.push((doc + leaf.doc_base, scorer.score().unwrap()));
                }
            }
        }
        hits
    }

    #[test]
    fn test_boxed_query_clone() {
        let query: Box<dyn Query> = Box::new(TermQuery::new(Term::from_str("body", "a"), 2.0));
        let copy = query.clone();
        assert_eq!(query.to_string(), copy.to_string());
        assert_eq!(copy.query_type(), TERM);
        assert!((copy.boost() - 2.0).abs() < ::std::f32::EPSILON);
        assert_eq!(copy.extract_terms(), vec![Term::from_str("body", "a")]);
    }

    #[test]
    fn test_weight_hash_code_is_stable() {
        let reader = open_reader(&["a b", "a"], 2);
        let searcher = IndexSearcher::new(Arc::new(reader));
        let query = TermQuery::new(Term::from_str("body", "a"), 1.0);
        let w1 = searcher.create_weight(&query, false).unwrap();
        let w2 = searcher.create_weight(&query, false).unwrap();
        assert_eq!(w1.hash_code(), w2.hash_code());
        assert_eq!(matches(&searcher, &query).len(), 2);
    }
}
