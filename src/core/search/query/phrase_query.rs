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
use std::fmt;
use std::sync::Arc;

use crate::core::index::reader::{IndexReader, LeafReaderContext};
use crate::core::index::{Term, TermContext};
use crate::core::search::explanation::Explanation;
use crate::core::search::posting_iterator::PostingIteratorFlags;
use crate::core::search::query::{boost_suffix, BooleanQuery, Query, TermQuery, Weight};
use crate::core::search::scorer::{ExactPhraseScorer, PostingsAndFreq, Scorer, SloppyPhraseScorer};
use crate::core::search::searcher::IndexSearcher;
use crate::core::search::similarity::{SimWeight, Similarity};
use crate::core::search::statistics::TermStatistics;
use crate::core::search::DocIterator;
use crate::core::util::DocId;
use crate::error::{ErrorKind::IllegalArgument, ErrorKind::IllegalState, Result};

pub const PHRASE: &str = "phrase";

/// A Query that matches documents containing a particular sequence of terms.
///
/// With a slop of 0 the terms must appear at exactly their relative
/// positions. A positive slop allows that many position moves in total,
/// matches nearer to the exact phrase score higher.
#[derive(Clone, Debug)]
pub struct PhraseQuery {
    field: String,
    terms: Vec<Term>,
    positions: Vec<i32>,
    slop: i32,
    boost: f32,
}

impl PhraseQuery {
    /// Builds a phrase of `terms` at explicit `positions`.
    pub fn new(terms: Vec<Term>, positions: Vec<i32>, slop: i32) -> Result<PhraseQuery> {
        if terms.len() != positions.len() {
            bail!(IllegalArgument(format!(
                "must have as many terms ({}) as positions ({})",
                terms.len(),
                positions.len()
            )));
        }
        if slop < 0 {
            bail!(IllegalArgument(format!("slop must be >= 0, got {}", slop)));
        }
        let field = terms.first().map(|t| t.field.clone()).unwrap_or_default();
        for t in &terms {
            if t.field != field {
                bail!(IllegalArgument(format!(
                    "all terms should have the same field, got {} and {}",
                    field, t.field
                )));
            }
        }
        for w in positions.windows(2) {
            if w[1] < w[0] {
                bail!(IllegalArgument(format!(
                    "positions should not go backwards, got {} before {}",
                    w[0], w[1]
                )));
            }
        }
        if positions.first().map_or(false, |&p| p < 0) {
            bail!(IllegalArgument("positions must be >= 0".into()));
        }
        Ok(PhraseQuery {
            field,
            terms,
            positions,
            slop,
            boost: 1.0,
        })
    }

    /// Builds a phrase of consecutive terms.
    pub fn build(field: &str, texts: &[&str], slop: i32) -> Result<PhraseQuery> {
        let terms = texts.iter().map(|t| Term::from_str(field, t)).collect();
        let positions = (0..texts.len() as i32).collect();
        PhraseQuery::new(terms, positions, slop)
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn positions(&self) -> &[i32] {
        &self.positions
    }

    pub fn slop(&self) -> i32 {
        self.slop
    }
}

impl Query for PhraseQuery {
    fn create_weight(
        &self,
        searcher: &IndexSearcher,
        needs_scores: bool,
    ) -> Result<Box<dyn Weight>> {
        if self.terms.len() < 2 {
            bail!(IllegalState(
                "phrase queries of less than 2 terms must be rewritten first".into()
            ));
        }
        let mut term_contexts = Vec::with_capacity(self.terms.len());
        let mut term_stats: Vec<TermStatistics> = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            let context = searcher.term_context(term)?;
            term_stats.push(searcher.term_statistics(term, &context));
            term_contexts.push(context);
        }
        let collection_stats = searcher.collection_statistics(&self.field)?;
        let similarity = Arc::clone(searcher.similarity());
        let sim_weight = similarity.compute_weight(&collection_stats, &term_stats, self.boost);

        Ok(Box::new(PhraseWeight {
            query: self.clone(),
            similarity,
            sim_weight,
            term_contexts,
            needs_scores,
        }))
    }

    fn rewrite(&self, _reader: &dyn IndexReader) -> Result<Option<Box<dyn Query>>> {
        match self.terms.len() {
            0 => {
                let mut query = BooleanQuery::new();
                query.set_boost(self.boost);
                Ok(Some(Box::new(query)))
            }
            1 => Ok(Some(Box::new(TermQuery::new(
                self.terms[0].clone(),
                self.boost,
            )))),
            _ => Ok(None),
        }
    }

    fn extract_terms(&self) -> Vec<Term> {
        self.terms.clone()
    }

    fn boost(&self) -> f32 {
        self.boost
    }

    fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    fn query_type(&self) -> &'static str {
        PHRASE
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for PhraseQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // gaps between positions render as "?"
        let mut words: Vec<String> = vec![];
        let mut last: Option<i32> = None;
        for (term, &pos) in self.terms.iter().zip(&self.positions) {
            match last {
                Some(l) if l == pos => {
                    if let Some(w) = words.last_mut() {
                        w.push('|');
                        w.push_str(&term.text());
                    }
                }
                Some(l) => {
                    for _ in (l + 1)..pos {
                        words.push("?".to_string());
                    }
                    words.push(term.text());
                }
                None => words.push(term.text()),
            }
            last = Some(pos);
        }
        write!(f, "{}:\"{}\"", self.field, words.join(" "))?;
        if self.slop != 0 {
            write!(f, "~{}", self.slop)?;
        }
        write!(f, "{}", boost_suffix(self.boost))
    }
}

struct PhraseWeight {
    query: PhraseQuery,
    similarity: Arc<dyn Similarity>,
    sim_weight: Box<dyn SimWeight>,
    term_contexts: Vec<TermContext>,
    needs_scores: bool,
}

impl PhraseWeight {
    /// Positioned postings of every phrase term in `leaf`, `None` when one of
    /// them does not occur there.
    fn postings(&self, leaf: &LeafReaderContext) -> Result<Option<Vec<PostingsAndFreq>>> {
        let terms = match leaf.reader.terms(&self.query.field)? {
            Some(terms) => terms,
            None => return Ok(None),
        };
        if !terms.has_positions()? {
            bail!(IllegalState(format!(
                "field '{}' was indexed without position data; cannot run PhraseQuery \
                 (phrase={})",
                self.query.field, self.query
            )));
        }
        let live_docs = leaf.reader.live_docs();
        let mut postings = Vec::with_capacity(self.query.terms.len());
        for (i, term) in self.query.terms.iter().enumerate() {
            let state = match self.term_contexts[i].get(leaf.ord) {
                Some(state) => state,
                None => return Ok(None),
            };
            let mut iter = terms.iterator()?;
            iter.seek_exact_state(&term.bytes, state)?;
            let postings_iterator =
                iter.postings_with_live_docs(live_docs.clone(), PostingIteratorFlags::POSITIONS)?;
            postings.push(PostingsAndFreq::new(
                postings_iterator,
                state.doc_freq,
                self.query.positions[i],
                term.clone(),
            ));
        }
        Ok(Some(postings))
    }
}

impl Weight for PhraseWeight {
    fn create_scorer(&self, leaf: &LeafReaderContext) -> Result<Option<Box<dyn Scorer>>> {
        let postings = match self.postings(leaf)? {
            Some(postings) => postings,
            None => return Ok(None),
        };
        let sim_scorer = self.sim_weight.sim_scorer(leaf.reader.as_ref())?;
        if self.query.slop == 0 {
            Ok(Some(Box::new(ExactPhraseScorer::new(
                postings,
                sim_scorer,
                self.needs_scores,
            ))))
        } else {
            Ok(Some(Box::new(SloppyPhraseScorer::new(
                postings,
                self.query.slop,
                sim_scorer,
                self.needs_scores,
            ))))
        }
    }

    fn query_type(&self) -> &'static str {
        PHRASE
    }

    fn normalize(&mut self, norm: f32, boost: f32) {
        self.sim_weight.normalize(norm, boost * self.query.boost)
    }

    fn value_for_normalization(&self) -> f32 {
        self.sim_weight.value_for_normalization()
    }

    fn needs_scores(&self) -> bool {
        self.needs_scores
    }

    fn explain(&self, leaf: &LeafReaderContext, doc: DocId) -> Result<Explanation> {
        let no_match = || Explanation::no_match("no matching term".to_string());
        let postings = match self.postings(leaf)? {
            Some(postings) => postings,
            None => return Ok(no_match()),
        };
        let sim_scorer = self.sim_weight.sim_scorer(leaf.reader.as_ref())?;
        let freq = if self.query.slop == 0 {
            let mut scorer = ExactPhraseScorer::new(postings, sim_scorer, true);
            if scorer.advance(doc)? != doc {
                return Ok(no_match());
            }
            scorer.freq() as f32
        } else {
            let mut scorer = SloppyPhraseScorer::new(postings, self.query.slop, sim_scorer, true);
            if scorer.advance(doc)? != doc {
                return Ok(no_match());
            }
            scorer.sloppy_freq()
        };

        let freq_expl = Explanation::new(true, freq, format!("phraseFreq={}", freq), vec![]);
        let score_expl = self
            .sim_weight
            .explain(leaf.reader.as_ref(), doc, freq_expl)?;
        Ok(Explanation::new(
            true,
            score_expl.value(),
            format!(
                "weight({} in {}) [{}], result of:",
                self.query, doc, self.similarity
            ),
            vec![score_expl],
        ))
    }
}

impl fmt::Display for PhraseWeight {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "PhraseWeight(query: {}, similarity: {}, needs_scores: {})",
            self.query, self.similarity, self.needs_scores
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::query::tests::matches;
    use crate::core::search::query::TERM;
    use crate::core::search::tests::open_reader;

    fn searcher() -> IndexSearcher {
        IndexSearcher::new(Arc::new(open_reader(
            &[
                "quick brown fox",
                "brown quick fox",
                "quick red brown fox",
                "the fox",
                "quick brown quick brown",
            ],
            2,
        )))
    }

    fn docs(hits: &[(DocId, f32)]) -> Vec<DocId> {
        hits.iter().map(|h| h.0).collect()
    }

    #[test]
    fn test_exact_phrase() {
        let searcher = searcher();
        let query = PhraseQuery::build("body", &["quick", "brown"], 0).unwrap();
        assert_eq!(query.to_string(), "body:\"quick brown\"");
        let hits = matches(&searcher, &query);
        assert_eq!(docs(&hits), vec![0, 4]);
        // two occurrences beat one
        assert!(hits[1].1 > 0.0);

        let query = PhraseQuery::build("body", &["brown", "fox"], 0).unwrap();
        assert_eq!(docs(&matches(&searcher, &query)), vec![0, 2]);

        let query = PhraseQuery::build("body", &["fox", "brown"], 0).unwrap();
        assert!(matches(&searcher, &query).is_empty());
    }

    #[test]
    fn test_sloppy_phrase() {
        let searcher = searcher();
        let query = PhraseQuery::build("body", &["quick", "fox"], 1).unwrap();
        assert_eq!(query.to_string(), "body:\"quick fox\"~1");
        // "quick brown fox" is one move away, "brown quick fox" is exact
        let hits = matches(&searcher, &query);
        assert_eq!(docs(&hits), vec![0, 1]);

        let query = PhraseQuery::build("body", &["quick", "fox"], 2).unwrap();
        let hits = matches(&searcher, &query);
        assert_eq!(docs(&hits), vec![0, 1, 2]);
        // the nearer match scores higher
        assert!(hits[0].1 > hits[2].1);
    }

    #[test]
    fn test_phrase_with_gap() {
        let searcher = searcher();
        let terms = vec![Term::from_str("body", "quick"), Term::from_str("body", "fox")];
        let query = PhraseQuery::new(terms, vec![0, 2], 0).unwrap();
        assert_eq!(query.to_string(), "body:\"quick ? fox\"");
        assert_eq!(docs(&matches(&searcher, &query)), vec![0]);
    }

    #[test]
    fn test_rewrite_and_validation() {
        let searcher = searcher();
        let query = PhraseQuery::build("body", &["fox"], 0).unwrap();
        let rewritten = searcher.rewrite(&query).unwrap();
        assert_eq!(rewritten.query_type(), TERM);
        assert_eq!(docs(&matches(&searcher, &query)), vec![0, 1, 2, 3]);

        let empty = PhraseQuery::build("body", &[], 0).unwrap();
        let rewritten = empty.rewrite(searcher.reader().as_ref()).unwrap();
        assert!(rewritten.is_some());
        assert!(PhraseQuery::new(vec![Term::from_str("body", "a")], vec![], 0).is_err());
        assert!(PhraseQuery::build("body", &["a", "b"], -1).is_err());
        let mixed = vec![Term::from_str("body", "a"), Term::from_str("title", "b")];
        assert!(PhraseQuery::new(mixed, vec![0, 1], 0).is_err());
    }

    #[test]
    fn test_phrase_explain() {
        let searcher = searcher();
        let query = PhraseQuery::build("body", &["quick", "brown"], 0).unwrap();
        let hits = matches(&searcher, &query);
        let expl = searcher.explain(&query, 4).unwrap();
        assert!(expl.is_match());
        assert!((expl.value() - hits[1].1).abs() < 1e-5);
        assert!(!searcher.explain(&query, 1).unwrap().is_match());
    }
}
