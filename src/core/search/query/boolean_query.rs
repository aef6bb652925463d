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

use crate::core::index::reader::{IndexReader, LeafReaderContext};
use crate::core::index::Term;
use crate::core::search;
use crate::core::search::explanation::Explanation;
use crate::core::search::query::{boost_suffix, Query, Weight};
use crate::core::search::scorer::{
    ConjunctionScorer, ConstantScoreScorer, DisjunctionSumScorer, ReqNotScorer, ReqOptScorer,
    Scorer,
};
use crate::core::search::searcher::IndexSearcher;
use crate::core::search::DocIterator;
use crate::core::util::DocId;
use crate::error::{ErrorKind, Result};

pub const BOOLEAN: &str = "boolean";

/// Default bound on the number of clauses of a `BooleanQuery`, and on the
/// number of terms a multi term query may expand to.
pub const DEFAULT_MAX_CLAUSE_COUNT: usize = 1024;

/// How a clause takes part in a `BooleanQuery`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occur {
    /// The clause must match and contributes to the score.
    Must,
    /// The clause should match, see `BooleanQuery::minimum_should_match`.
    Should,
    /// The clause must not match.
    MustNot,
    /// The clause must match but does not contribute to the score.
    Filter,
}

impl Occur {
    fn is_scoring(self) -> bool {
        self == Occur::Must || self == Occur::Should
    }

    fn is_required(self) -> bool {
        self == Occur::Must || self == Occur::Filter
    }
}

impl fmt::Display for Occur {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Occur::Must => write!(f, "+"),
            Occur::Should => Ok(()),
            Occur::MustNot => write!(f, "-"),
            Occur::Filter => write!(f, "#"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BooleanClause {
    pub query: Box<dyn Query>,
    pub occur: Occur,
}

impl BooleanClause {
    pub fn new(query: Box<dyn Query>, occur: Occur) -> BooleanClause {
        BooleanClause { query, occur }
    }
}

/// A Query that matches documents matching boolean combinations of other queries.
///
/// Without any `Must` or `Filter` clause at least one `Should` clause has to
/// match; otherwise `Should` clauses only add to the score, unless
/// `minimum_should_match` is set. A query made of `MustNot` clauses only
/// matches nothing.
#[derive(Clone)]
pub struct BooleanQuery {
    clauses: Vec<BooleanClause>,
    min_should_match: usize,
    max_clause_count: usize,
    boost: f32,
}

impl Default for BooleanQuery {
    fn default() -> Self {
        BooleanQuery::new()
    }
}

impl BooleanQuery {
    pub fn new() -> BooleanQuery {
        BooleanQuery::with_max_clause_count(DEFAULT_MAX_CLAUSE_COUNT)
    }

    pub fn with_max_clause_count(max_clause_count: usize) -> BooleanQuery {
        BooleanQuery {
            clauses: vec![],
            min_should_match: 0,
            max_clause_count,
            boost: 1.0,
        }
    }

    /// Builds a query from clause lists, in the order must, should, filter
    /// and must not.
    pub fn build(
        musts: Vec<Box<dyn Query>>,
        shoulds: Vec<Box<dyn Query>>,
        filters: Vec<Box<dyn Query>>,
        must_nots: Vec<Box<dyn Query>>,
        min_should_match: usize,
    ) -> Result<BooleanQuery> {
        let mut query = BooleanQuery::new();
        let groups = vec![
            (musts, Occur::Must),
            (shoulds, Occur::Should),
            (filters, Occur::Filter),
            (must_nots, Occur::MustNot),
        ];
        for (queries, occur) in groups {
            for q in queries {
                query.add(q, occur)?;
            }
        }
        query.set_minimum_should_match(min_should_match);
        Ok(query)
    }

    /// Adds a clause, failing with `TooManyClauses` once the bound is
    /// reached.
    pub fn add(&mut self, query: Box<dyn Query>, occur: Occur) -> Result<()> {
        if self.clauses.len() >= self.max_clause_count {
            bail!(ErrorKind::Search(search::ErrorKind::TooManyClauses(
                self.max_clause_count
            )));
        }
        self.clauses.push(BooleanClause::new(query, occur));
        Ok(())
    }

    pub fn clauses(&self) -> &[BooleanClause] {
        &self.clauses
    }

    pub fn max_clause_count(&self) -> usize {
        self.max_clause_count
    }

    pub fn minimum_should_match(&self) -> usize {
        self.min_should_match
    }

    /// Number of `Should` clauses a matching doc needs.
    pub fn set_minimum_should_match(&mut self, min_should_match: usize) {
        self.min_should_match = min_should_match;
    }
}

impl Query for BooleanQuery {
    fn create_weight(
        &self,
        searcher: &IndexSearcher,
        needs_scores: bool,
    ) -> Result<Box<dyn Weight>> {
        let mut clauses = Vec::with_capacity(self.clauses.len());
        for c in &self.clauses {
            let weight =
                searcher.create_weight(c.query.as_ref(), needs_scores && c.occur.is_scoring())?;
            clauses.push(WeightClause {
                weight,
                occur: c.occur,
                query: c.query.to_string(),
            });
        }

        Ok(Box::new(BooleanWeight {
            clauses,
            min_should_match: self.min_should_match,
            boost: self.boost,
            needs_scores,
        }))
    }

    fn rewrite(&self, reader: &dyn IndexReader) -> Result<Option<Box<dyn Query>>> {
        if self.min_should_match == 0 && self.clauses.len() == 1 {
            let clause = &self.clauses[0];
            if clause.occur.is_scoring() {
                let mut query = clause.query.clone_box();
                let boost = query.boost() * self.boost;
                query.set_boost(boost);
                return Ok(Some(query));
            }
        }

        let mut changed = false;
        let mut clauses = Vec::with_capacity(self.clauses.len());
        for c in &self.clauses {
            match c.query.rewrite(reader)? {
                Some(query) => {
                    changed = true;
                    clauses.push(BooleanClause::new(query, c.occur));
                }
                None => clauses.push(c.clone()),
            }
        }
        if !changed {
            return Ok(None);
        }
        Ok(Some(Box::new(BooleanQuery {
            clauses,
            min_should_match: self.min_should_match,
            max_clause_count: self.max_clause_count,
            boost: self.boost,
        })))
    }

    fn extract_terms(&self) -> Vec<Term> {
        self.clauses
            .iter()
            .filter(|c| c.occur != Occur::MustNot)
            .flat_map(|c| c.query.extract_terms())
            .collect()
    }

    fn boost(&self) -> f32 {
        self.boost
    }

    fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    fn query_type(&self) -> &'static str {
        BOOLEAN
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for BooleanQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let clauses: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("{}{}", c.occur, c.query))
            .collect();
        write!(f, "({})", clauses.join(" "))?;
        if self.min_should_match > 0 {
            write!(f, "~{}", self.min_should_match)?;
        }
        write!(f, "{}", boost_suffix(self.boost))
    }
}

struct WeightClause {
    weight: Box<dyn Weight>,
    occur: Occur,
    query: String,
}

struct BooleanWeight {
    clauses: Vec<WeightClause>,
    min_should_match: usize,
    boost: f32,
    needs_scores: bool,
}

impl BooleanWeight {
    fn disjunction(
        mut scorers: Vec<Box<dyn Scorer>>,
        needs_scores: bool,
        min_should_match: usize,
    ) -> Option<Box<dyn Scorer>> {
        match scorers.len() {
            0 => None,
            1 => Some(scorers.remove(0)),
            _ => Some(Box::new(DisjunctionSumScorer::new(
                scorers,
                needs_scores,
                min_should_match,
            ))),
        }
    }

    fn conjunction(mut scorers: Vec<Box<dyn Scorer>>) -> Box<dyn Scorer> {
        if scorers.len() == 1 {
            scorers.remove(0)
        } else {
            Box::new(ConjunctionScorer::new(scorers))
        }
    }

    fn weights_to_str(&self, occur: Occur) -> String {
        let weight_strs: Vec<String> = self
            .clauses
            .iter()
            .filter(|c| c.occur == occur)
            .map(|c| format!("{}", c.weight))
            .collect();
        weight_strs.join(", ")
    }
}

impl Weight for BooleanWeight {
    fn create_scorer(&self, leaf: &LeafReaderContext) -> Result<Option<Box<dyn Scorer>>> {
        let mut required: Vec<Box<dyn Scorer>> = vec![];
        let mut optional: Vec<Box<dyn Scorer>> = vec![];
        let mut prohibited: Vec<Box<dyn Scorer>> = vec![];
        for c in &self.clauses {
            let scorer = c.weight.create_scorer(leaf)?;
            match (c.occur, scorer) {
                (Occur::Must, Some(s)) => required.push(s),
                (Occur::Filter, Some(s)) => {
                    let cost = s.cost();
                    required.push(Box::new(ConstantScoreScorer::new(0.0, s, cost)));
                }
                (Occur::Should, Some(s)) => optional.push(s),
                (Occur::MustNot, Some(s)) => prohibited.push(s),
                (Occur::Must, None) | (Occur::Filter, None) => return Ok(None),
                (Occur::Should, None) | (Occur::MustNot, None) => {}
            }
        }

        let min_should_match = if required.is_empty() {
            self.min_should_match.max(1)
        } else {
            self.min_should_match
        };
        if optional.len() < min_should_match {
            return Ok(None);
        }

        let positive = if required.is_empty() {
            match Self::disjunction(optional, self.needs_scores, min_should_match) {
                Some(s) => s,
                None => return Ok(None),
            }
        } else if min_should_match > 0 {
            // the optional clauses turn into one more required clause
            if let Some(s) = Self::disjunction(optional, self.needs_scores, min_should_match) {
                required.push(s);
            }
            Self::conjunction(required)
        } else {
            let req = Self::conjunction(required);
            match Self::disjunction(optional, self.needs_scores, 1) {
                Some(opt) if self.needs_scores => Box::new(ReqOptScorer::new(req, opt)),
                _ => req,
            }
        };

        match Self::disjunction(prohibited, false, 1) {
            Some(not) => Ok(Some(Box::new(ReqNotScorer::new(positive, not)))),
            None => Ok(Some(positive)),
        }
    }

    fn query_type(&self) -> &'static str {
        BOOLEAN
    }

    fn normalize(&mut self, norm: f32, boost: f32) {
        let boost = boost * self.boost;
        for c in &mut self.clauses {
            c.weight.normalize(norm, boost);
        }
    }

    fn value_for_normalization(&self) -> f32 {
        let sum: f32 = self
            .clauses
            .iter()
            .filter(|c| c.occur.is_scoring())
            .map(|c| c.weight.value_for_normalization())
            .sum();
        sum * self.boost * self.boost
    }

    fn needs_scores(&self) -> bool {
        self.needs_scores
    }

    fn explain(&self, leaf: &LeafReaderContext, doc: DocId) -> Result<Explanation> {
        let mut sum = 0.0f32;
        let mut fail = false;
        let mut match_count = 0;
        let mut should_match_count = 0;

        let mut subs: Vec<Explanation> = vec![];
        for c in &self.clauses {
            let e = c.weight.explain(leaf, doc)?;
            if e.is_match() {
                match c.occur {
                    Occur::Must | Occur::Should => {
                        sum += e.value();
                        subs.push(e);
                    }
                    Occur::Filter => subs.push(Explanation::new(
                        true,
                        0.0,
                        "match on required clause, product of:".to_string(),
                        vec![
                            Explanation::new(true, 0.0, "# clause".to_string(), vec![]),
                            e,
                        ],
                    )),
                    Occur::MustNot => {
                        subs.push(Explanation::new(
                            false,
                            0.0,
                            format!("match on prohibited clause ({})", c.query),
                            vec![e],
                        ));
                        fail = true;
                    }
                }
                if c.occur != Occur::MustNot {
                    match_count += 1;
                }
                if c.occur == Occur::Should {
                    should_match_count += 1;
                }
            } else if c.occur.is_required() {
                subs.push(Explanation::new(
                    false,
                    0.0,
                    format!("no match on required clause ({})", c.query),
                    vec![e],
                ));
                fail = true;
            }
        }

        let has_required = self.clauses.iter().any(|c| c.occur.is_required());
        let min_should_match = if has_required {
            self.min_should_match
        } else {
            self.min_should_match.max(1)
        };

        if fail {
            Ok(Explanation::new(
                false,
                0.0f32,
                "Failure to meet condition(s) of required/prohibited clause(s)".to_string(),
                subs,
            ))
        } else if match_count == 0 {
            Ok(Explanation::new(
                false,
                0.0f32,
                "No matching clauses".to_string(),
                subs,
            ))
        } else if should_match_count < min_should_match {
            Ok(Explanation::new(
                false,
                0.0f32,
                format!(
                    "Failure to match minimum number of optional clauses: {}",
                    min_should_match
                ),
                subs,
            ))
        } else {
            Ok(Explanation::new(true, sum, "sum of:".to_string(), subs))
        }
    }
}

impl fmt::Display for BooleanWeight {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "BooleanWeight(must: [{}], should: [{}], filter: [{}], must_not: [{}], min match: {}, \
             needs score: {})",
            self.weights_to_str(Occur::Must),
            self.weights_to_str(Occur::Should),
            self.weights_to_str(Occur::Filter),
            self.weights_to_str(Occur::MustNot),
            self.min_should_match,
            self.needs_scores
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::query::tests::matches;
    use crate::core::search::query::TermQuery;
    use crate::core::search::tests::open_reader;
    use std::sync::Arc;

    fn term(text: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(Term::from_str("body", text), 1.0))
    }

    fn docs(hits: &[(DocId, f32)]) -> Vec<DocId> {
        hits.iter().map(|h| h.0).collect()
    }

    fn searcher(bodies: &[&str], per_segment: usize) -> IndexSearcher {
        IndexSearcher::new(Arc::new(open_reader(bodies, per_segment)))
    }

    #[test]
    fn test_conjunction() {
        let searcher = searcher(&["a b", "a", "b"], 3);
        let query = BooleanQuery::build(vec![term("a"), term("b")], vec![], vec![], vec![], 0)
            .unwrap();
        let top_docs = searcher.search_top(&query, 10).unwrap();
        assert_eq!(top_docs.total_hits(), 1);
        assert_eq!(top_docs.score_docs()[0].doc_id(), 0);
        assert!(top_docs.score_docs()[0].score() > 0.0);

        // a clause with doc freq 0 empties the result
        let query = BooleanQuery::build(vec![term("a"), term("zzz")], vec![], vec![], vec![], 0)
            .unwrap();
        let top_docs = searcher.search_top(&query, 10).unwrap();
        assert_eq!(top_docs.total_hits(), 0);
        assert!(top_docs.score_docs().is_empty());
    }

    #[test]
    fn test_disjunction_and_exclusion() {
        let searcher = searcher(&["a b", "a", "b", "c"], 2);
        let query = BooleanQuery::build(vec![], vec![term("a"), term("b")], vec![], vec![], 0)
            .unwrap();
        let hits = matches(&searcher, &query);
        assert_eq!(docs(&hits), vec![0, 1, 2]);
        assert!(hits[0].1 > hits[1].1);

        let query = BooleanQuery::build(vec![term("a")], vec![], vec![], vec![term("b")], 0)
            .unwrap();
        assert_eq!(docs(&matches(&searcher, &query)), vec![1]);

        // only prohibited clauses match nothing
        let query = BooleanQuery::build(vec![], vec![], vec![], vec![term("b")], 0).unwrap();
        assert!(matches(&searcher, &query).is_empty());
    }

    #[test]
    fn test_optional_clauses_add_to_score() {
        let searcher = searcher(&["a b", "a", "b"], 3);
        let query = BooleanQuery::build(vec![term("a")], vec![term("b")], vec![], vec![], 0)
            .unwrap();
        let hits = matches(&searcher, &query);
        assert_eq!(docs(&hits), vec![0, 1]);
        let a_only = matches(&searcher, &TermQuery::new(Term::from_str("body", "a"), 1.0));
        let b_only = matches(&searcher, &TermQuery::new(Term::from_str("body", "b"), 1.0));
        assert!((hits[0].1 - (a_only[0].1 + b_only[0].1)).abs() < 1e-5);
        assert!((hits[1].1 - a_only[1].1).abs() < 1e-5);
    }

    #[test]
    fn test_filter_does_not_score() {
        let searcher = searcher(&["a b", "a", "b"], 3);
        let query = BooleanQuery::build(vec![term("a")], vec![], vec![term("b")], vec![], 0)
            .unwrap();
        let hits = matches(&searcher, &query);
        assert_eq!(docs(&hits), vec![0]);
        let a_only = matches(&searcher, &TermQuery::new(Term::from_str("body", "a"), 1.0));
        assert!((hits[0].1 - a_only[0].1).abs() < 1e-5);
    }

    #[test]
    fn test_minimum_should_match() {
        let searcher = searcher(&["a b", "a c", "b", "a b c"], 2);
        let query = BooleanQuery::build(
            vec![],
            vec![term("a"), term("b"), term("c")],
            vec![],
            vec![],
            2,
        )
        .unwrap();
        assert_eq!(docs(&matches(&searcher, &query)), vec![0, 1, 3]);

        let mut query = query;
        query.set_minimum_should_match(4);
        assert!(matches(&searcher, &query).is_empty());

        let query =
            BooleanQuery::build(vec![term("a")], vec![term("b"), term("c")], vec![], vec![], 2)
                .unwrap();
        assert_eq!(docs(&matches(&searcher, &query)), vec![3]);
    }

    #[test]
    fn test_too_many_clauses() {
        let mut query = BooleanQuery::with_max_clause_count(2);
        query.add(term("a"), Occur::Should).unwrap();
        query.add(term("b"), Occur::Should).unwrap();
        let err = query.add(term("c"), Occur::Should).unwrap_err();
        match err.kind() {
            ErrorKind::Search(search::ErrorKind::TooManyClauses(max)) => assert_eq!(*max, 2),
            e => panic!("unexpected error {:?}", e),
        }
        assert_eq!(query.clauses().len(), 2);
        assert_eq!(BooleanQuery::new().max_clause_count(), DEFAULT_MAX_CLAUSE_COUNT);
    }

    #[test]
    fn test_rewrite_single_clause() {
        let searcher = searcher(&["a b"], 1);
        let mut query = BooleanQuery::new();
        query.add(term("a"), Occur::Must).unwrap();
        query.set_boost(3.0);
        let rewritten = searcher.rewrite(&query).unwrap();
        assert_eq!(rewritten.query_type(), crate::core::search::query::TERM);
        assert!((rewritten.boost() - 3.0).abs() < ::std::f32::EPSILON);

        let query = BooleanQuery::build(vec![term("a")], vec![], vec![], vec![term("b")], 0)
            .unwrap();
        assert!(query.rewrite(searcher.reader().as_ref()).unwrap().is_none());
        assert_eq!(query.to_string(), "(+body:a -body:b)");
    }

    #[test]
    fn test_explain() {
        let searcher = searcher(&["a b", "a", "b"], 3);
        let query = BooleanQuery::build(vec![term("a"), term("b")], vec![], vec![], vec![], 0)
            .unwrap();
        let hits = matches(&searcher, &query);
        let expl = searcher.explain(&query, 0).unwrap();
        assert!(expl.is_match());
        assert_eq!(expl.description(), "sum of:");
        assert_eq!(expl.details().len(), 2);
        assert!((expl.value() - hits[0].1).abs() < 1e-5);

        let expl = searcher.explain(&query, 1).unwrap();
        assert!(!expl.is_match());
        assert_eq!(
            expl.description(),
            "Failure to meet condition(s) of required/prohibited clause(s)"
        );
    }
}
