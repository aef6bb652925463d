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

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;

use crate::core::index::reader::IndexReader;
use crate::core::index::{SeekStatus, Term};
use crate::core::search;
use crate::core::search::query::{
    boost_suffix, BooleanQuery, Occur, Query, TermQuery, Weight, DEFAULT_MAX_CLAUSE_COUNT,
};
use crate::core::search::searcher::IndexSearcher;
use crate::error::{ErrorKind, Result};

pub const PREFIX: &str = "prefix";

/// Matches documents containing a term starting with a prefix.
///
/// The query is never scored directly: `rewrite` expands it into a
/// disjunction of `TermQuery`s over every matching term of the index.
#[derive(Clone, Debug)]
pub struct PrefixQuery {
    prefix: Term,
    max_expansions: usize,
    boost: f32,
}

impl PrefixQuery {
    pub fn new(prefix: Term) -> PrefixQuery {
        PrefixQuery {
            prefix,
            max_expansions: DEFAULT_MAX_CLAUSE_COUNT,
            boost: 1.0,
        }
    }

    /// Bounds the number of terms the prefix may expand to.
    pub fn with_max_expansions(prefix: Term, max_expansions: usize) -> PrefixQuery {
        PrefixQuery {
            prefix,
            max_expansions,
            boost: 1.0,
        }
    }

    pub fn prefix(&self) -> &Term {
        &self.prefix
    }

    /// Unique terms of the field starting with the prefix, across every leaf.
    fn expand(&self, reader: &dyn IndexReader) -> Result<BTreeSet<Vec<u8>>> {
        let prefix = &self.prefix.bytes;
        let mut matched = BTreeSet::new();
        for leaf in reader.leaves() {
            let terms = match leaf.reader.terms(&self.prefix.field)? {
                Some(terms) => terms,
                None => continue,
            };
            let mut iter = terms.iterator()?;
            if iter.seek_ceil(prefix)? == SeekStatus::End {
                continue;
            }
            loop {
                let term = iter.term()?;
                if !term.starts_with(prefix) {
                    break;
                }
                if matched.insert(term.to_vec()) && matched.len() > self.max_expansions {
                    bail!(ErrorKind::Search(search::ErrorKind::TooManyClauses(
                        self.max_expansions
                    )));
                }
                if iter.next()?.is_none() {
                    break;
                }
            }
        }
        Ok(matched)
    }
}

impl Query for PrefixQuery {
    fn create_weight(
        &self,
        searcher: &IndexSearcher,
        needs_scores: bool,
    ) -> Result<Box<dyn Weight>> {
        let rewritten = searcher.rewrite(self)?;
        rewritten.create_weight(searcher, needs_scores)
    }

    fn rewrite(&self, reader: &dyn IndexReader) -> Result<Option<Box<dyn Query>>> {
        let terms = self.expand(reader)?;
        debug!(
            "prefix query {} expanded to {} terms",
            self.prefix,
            terms.len()
        );
        let mut query = BooleanQuery::with_max_clause_count(self.max_expansions);
        for bytes in terms {
            let term = Term::new(self.prefix.field.clone(), bytes);
            query.add(Box::new(TermQuery::new(term, 1.0)), Occur::Should)?;
        }
        query.set_boost(self.boost);
        Ok(Some(Box::new(query)))
    }

    fn extract_terms(&self) -> Vec<Term> {
        vec![]
    }

    fn boost(&self) -> f32 {
        self.boost
    }

    fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    fn query_type(&self) -> &'static str {
        PREFIX
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for PrefixQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}*{}", self.prefix, boost_suffix(self.boost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::query::tests::matches;
    use crate::core::search::tests::open_reader;
    use crate::core::util::DocId;
    use std::sync::Arc;

    #[test]
    fn test_prefix_expansion() {
        let reader = open_reader(&["apple pie", "apricot", "banana", "app"], 2);
        let searcher = IndexSearcher::new(Arc::new(reader));

        let query = PrefixQuery::new(Term::from_str("body", "ap"));
        assert_eq!(query.to_string(), "body:ap*");
        let docs: Vec<DocId> = matches(&searcher, &query).iter().map(|h| h.0).collect();
        assert_eq!(docs, vec![0, 1, 3]);

        let rewritten = query.rewrite(searcher.reader().as_ref()).unwrap().unwrap();
        let boolean = rewritten.as_any().downcast_ref::<BooleanQuery>().unwrap();
        // app, apple and apricot, collected across both segments
        assert_eq!(boolean.clauses().len(), 3);

        let query = PrefixQuery::new(Term::from_str("body", "zz"));
        assert!(matches(&searcher, &query).is_empty());
        let query = PrefixQuery::new(Term::from_str("title", "a"));
        assert!(matches(&searcher, &query).is_empty());
    }

    #[test]
    fn test_prefix_too_many_clauses() {
        let reader = open_reader(&["aa ab", "ac ad", "b"], 1);
        let searcher = IndexSearcher::new(Arc::new(reader));

        let query = PrefixQuery::with_max_expansions(Term::from_str("body", "a"), 3);
        let err = searcher.search_top(&query, 10).unwrap_err();
        match err.kind() {
            ErrorKind::Search(search::ErrorKind::TooManyClauses(max)) => assert_eq!(*max, 3),
            e => panic!("unexpected error {:?}", e),
        }

        let query = PrefixQuery::with_max_expansions(Term::from_str("body", "a"), 4);
        assert_eq!(searcher.search_top(&query, 10).unwrap().total_hits(), 2);
    }
}
