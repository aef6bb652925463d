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

use crate::error::Result;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::index::reader::LeafReaderContext;
use crate::core::index::{Term, TermContext};
use crate::core::search::explanation::Explanation;
use crate::core::search::posting_iterator::{PostingIterator, PostingIteratorFlags};
use crate::core::search::query::{boost_suffix, Query, Weight};
use crate::core::search::scorer::{Scorer, TermScorer};
use crate::core::search::searcher::IndexSearcher;
use crate::core::search::similarity::{SimWeight, Similarity};
use crate::core::search::DocIterator;
use crate::core::util::DocId;

pub const TERM: &str = "term";

/// A Query that matches documents containing a term.
///
/// This may be combined with other terms with a
/// [`BooleanQuery`](struct.BooleanQuery.html)
#[derive(Clone, Debug, PartialEq)]
pub struct TermQuery {
    pub term: Term,
    pub boost: f32,
}

impl TermQuery {
    pub fn new(term: Term, boost: f32) -> TermQuery {
        TermQuery { term, boost }
    }

    #[inline]
    pub fn term(&self) -> &Term {
        &self.term
    }
}

impl Query for TermQuery {
    fn create_weight(
        &self,
        searcher: &IndexSearcher,
        needs_scores: bool,
    ) -> Result<Box<dyn Weight>> {
        let term_context = searcher.term_context(&self.term)?;
        let term_stats = searcher.term_statistics(&self.term, &term_context);
        let collection_stats = searcher.collection_statistics(&self.term.field)?;

        let similarity = Arc::clone(searcher.similarity());
        let sim_weight = similarity.compute_weight(&collection_stats, &[term_stats], self.boost);
        Ok(Box::new(TermWeight {
            term: self.term.clone(),
            boost: self.boost,
            similarity,
            sim_weight,
            term_context,
            needs_scores,
        }))
    }

    fn extract_terms(&self) -> Vec<Term> {
        vec![self.term.clone()]
    }

    fn boost(&self) -> f32 {
        self.boost
    }

    fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    fn query_type(&self) -> &'static str {
        TERM
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for TermQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.term, boost_suffix(self.boost))
    }
}

struct TermWeight {
    term: Term,
    boost: f32,
    similarity: Arc<dyn Similarity>,
    sim_weight: Box<dyn SimWeight>,
    term_context: TermContext,
    needs_scores: bool,
}

impl TermWeight {
    /// Postings of the term in `leaf`, positioned from the term context so the
    /// dictionary is not searched again.
    fn postings(&self, leaf: &LeafReaderContext) -> Result<Option<Box<dyn PostingIterator>>> {
        let state = match self.term_context.get(leaf.ord) {
            Some(state) => state,
            None => return Ok(None),
        };
        let terms = match leaf.reader.terms(&self.term.field)? {
            Some(terms) => terms,
            None => return Ok(None),
        };
        let flags = if self.needs_scores {
            PostingIteratorFlags::FREQS
        } else {
            PostingIteratorFlags::NONE
        };
        let mut iter = terms.iterator()?;
        iter.seek_exact_state(&self.term.bytes, state)?;
        Ok(Some(
            iter.postings_with_live_docs(leaf.reader.live_docs(), flags)?,
        ))
    }
}

impl Weight for TermWeight {
    fn create_scorer(&self, leaf: &LeafReaderContext) -> Result<Option<Box<dyn Scorer>>> {
        if let Some(postings_iterator) = self.postings(leaf)? {
            let sim_scorer = self.sim_weight.sim_scorer(leaf.reader.as_ref())?;
            Ok(Some(Box::new(TermScorer::new(
                sim_scorer,
                postings_iterator,
                self.needs_scores,
            ))))
        } else {
            Ok(None)
        }
    }

    fn query_type(&self) -> &'static str {
        TERM
    }

    fn normalize(&mut self, norm: f32, boost: f32) {
        self.sim_weight.normalize(norm, boost * self.boost)
    }

    fn value_for_normalization(&self) -> f32 {
        self.sim_weight.value_for_normalization()
    }

    fn needs_scores(&self) -> bool {
        self.needs_scores
    }

    fn explain(&self, leaf: &LeafReaderContext, doc: DocId) -> Result<Explanation> {
        let state = match self.term_context.get(leaf.ord) {
            Some(state) => state,
            None => return Ok(Explanation::no_match("no matching term".to_string())),
        };
        if let Some(terms) = leaf.reader.terms(&self.term.field)? {
            let mut iter = terms.iterator()?;
            iter.seek_exact_state(&self.term.bytes, state)?;
            let mut postings_iterator =
                iter.postings_with_live_docs(leaf.reader.live_docs(), PostingIteratorFlags::FREQS)?;
            if postings_iterator.advance(doc)? == doc {
                let freq = postings_iterator.freq()? as f32;

                let freq_expl = Explanation::new(true, freq, format!("termFreq={}", freq), vec![]);
                let score_expl = self
                    .sim_weight
                    .explain(leaf.reader.as_ref(), doc, freq_expl)?;

                return Ok(Explanation::new(
                    true,
                    score_expl.value(),
                    format!(
                        "weight({} in {}) [{}], result of:",
                        self.term, doc, self.similarity
                    ),
                    vec![score_expl],
                ));
            }
        }
        Ok(Explanation::no_match("no matching term".to_string()))
    }
}

impl fmt::Display for TermWeight {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TermWeight(term: {}, boost: {}, similarity: {}, needs_scores: {})",
            self.term, self.boost, self.similarity, self.needs_scores
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::query::tests::matches;
    use crate::core::search::tests::open_reader;

    #[test]
    fn test_term_query() {
        let reader = open_reader(&["a b", "b c", "a a a d", "c"], 2);
        let searcher = IndexSearcher::new(Arc::new(reader));

        let hits = matches(&searcher, &TermQuery::new(Term::from_str("body", "a"), 1.0));
        let docs: Vec<DocId> = hits.iter().map(|h| h.0).collect();
        assert_eq!(docs, vec![0, 2]);
        // more occurrences score higher
        assert!(hits[1].1 > hits[0].1);
        assert!(hits[0].1 > 0.0);

        let boosted = matches(&searcher, &TermQuery::new(Term::from_str("body", "a"), 2.0));
        assert!((boosted[0].1 - 2.0 * hits[0].1).abs() < 1e-5);

        let missing = matches(&searcher, &TermQuery::new(Term::from_str("body", "z"), 1.0));
        assert!(missing.is_empty());
        let other_field = matches(&searcher, &TermQuery::new(Term::from_str("nope", "a"), 1.0));
        assert!(other_field.is_empty());
    }

    #[test]
    fn test_term_explain() {
        let reader = open_reader(&["a b", "b c"], 1);
        let searcher = IndexSearcher::new(Arc::new(reader));
        let query = TermQuery::new(Term::from_str("body", "b"), 1.0);
        let hits = matches(&searcher, &query);

        let expl = searcher.explain(&query, 1).unwrap();
        assert!(expl.is_match());
        assert!((expl.value() - hits[1].1).abs() < 1e-5);
        assert!(expl.description().starts_with("weight(body:b in 0)"));

        let query = TermQuery::new(Term::from_str("body", "a"), 1.0);
        assert!(!searcher.explain(&query, 1).unwrap().is_match());
    }

    #[test]
    fn test_display() {
        let query = TermQuery::new(Term::from_str("body", "a"), 1.0);
        assert_eq!(query.to_string(), "body:a");
        let query = TermQuery::new(Term::from_str("body", "a"), 2.5);
        assert_eq!(query.to_string(), "body:a^2.5");
    }
}
