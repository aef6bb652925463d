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

mod bulk_scorer;

pub use self::bulk_scorer::*;

mod conjunction_scorer;

pub use self::conjunction_scorer::*;

mod disjunction_scorer;

pub use self::disjunction_scorer::*;

mod req_opt_scorer;

pub use self::req_opt_scorer::*;

mod req_not_scorer;

pub use self::req_not_scorer::*;

mod term_scorer;

pub use self::term_scorer::*;

mod phrase_scorer;

pub use self::phrase_scorer::*;

use crate::core::search::{AllDocsIterator, DocIterator, NO_MORE_DOCS};
use crate::core::util::{Bits, BitsRef, DocId};
use crate::error::Result;

/// Expert: Common scoring functionality for different types of queries.
///
/// A `Scorer` iterates over documents matching a query in increasing order of doc
/// Id.
///
/// Document scores are computed using a given `Similarity` implementation.
///
/// **NOTE**: The values `f32::NAN`, `f32::NEG_INFINITY` and `f32::INFINITY` are
/// not valid scores.  Certain collectors (eg `TopDocsCollector`) will not properly collect hits
/// with these scores.
pub trait Scorer: DocIterator {
    /// Returns the score of the current document matching the query.
    /// Initially invalid, until `DocIterator::next()` or
    /// `DocIterator::advance()` is called the first time, or when called from
    /// within `Collector::collect`.
    fn score(&mut self) -> Result<f32>;

    /// Whether docs may be delivered out of increasing doc id order. Every
    /// scorer of this crate delivers them in order.
    fn scores_docs_out_of_order(&self) -> bool {
        false
    }
}

impl Scorer for Box<dyn Scorer> {
    fn score(&mut self) -> Result<f32> {
        (**self).score()
    }

    fn scores_docs_out_of_order(&self) -> bool {
        (**self).scores_docs_out_of_order()
    }
}

impl DocIterator for Box<dyn Scorer> {
    fn doc_id(&self) -> DocId {
        (**self).doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        (**self).next()
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        (**self).advance(target)
    }

    fn slow_advance(&mut self, target: DocId) -> Result<DocId> {
        (**self).slow_advance(target)
    }

    fn cost(&self) -> usize {
        (**self).cost()
    }
}

/// A constant-scoring `Scorer`
pub struct ConstantScoreScorer<T: DocIterator> {
    pub score: f32,
    pub iterator: T,
    pub cost: usize,
}

impl<T: DocIterator> ConstantScoreScorer<T> {
    pub fn new(score: f32, iterator: T, cost: usize) -> ConstantScoreScorer<T> {
        ConstantScoreScorer {
            score,
            iterator,
            cost,
        }
    }
}

impl<T: DocIterator> Scorer for ConstantScoreScorer<T> {
    fn score(&mut self) -> Result<f32> {
        Ok(self.score)
    }
}

impl<T: DocIterator> DocIterator for ConstantScoreScorer<T> {
    fn doc_id(&self) -> DocId {
        self.iterator.doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        self.iterator.next()
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        self.iterator.advance(target)
    }

    fn slow_advance(&mut self, target: DocId) -> Result<DocId> {
        self.iterator.slow_advance(target)
    }

    fn cost(&self) -> usize {
        self.cost
    }
}

/// Scores every live document of a segment with a constant.
pub struct MatchAllScorer {
    score: f32,
    iterator: AllDocsIterator,
    live_docs: Option<BitsRef>,
    max_doc: DocId,
}

impl MatchAllScorer {
    pub fn new(score: f32, max_doc: DocId, live_docs: Option<BitsRef>) -> MatchAllScorer {
        MatchAllScorer {
            score,
            iterator: AllDocsIterator::new(max_doc),
            live_docs,
            max_doc,
        }
    }

    fn skip_deleted(&mut self, mut doc: DocId) -> Result<DocId> {
        if let Some(ref live_docs) = self.live_docs {
            while doc != NO_MORE_DOCS && !live_docs.get(doc as usize)? {
                doc = self.iterator.next()?;
            }
        }
        Ok(doc)
    }
}

impl Scorer for MatchAllScorer {
    fn score(&mut self) -> Result<f32> {
        Ok(self.score)
    }
}

impl DocIterator for MatchAllScorer {
    fn doc_id(&self) -> DocId {
        self.iterator.doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        let doc = self.iterator.next()?;
        self.skip_deleted(doc)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        let doc = self.iterator.advance(target)?;
        self.skip_deleted(doc)
    }

    fn cost(&self) -> usize {
        self.max_doc as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::util::FixedBitSet;

    use std::sync::Arc;

    #[test]
    fn test_match_all_skips_deleted() {
        let mut live = FixedBitSet::with_all_set(5);
        live.clear(0);
        live.clear(3);
        let mut scorer = MatchAllScorer::new(2.0, 5, Some(Arc::new(live)));
        assert_eq!(scorer.next().unwrap(), 1);
        assert!((scorer.score().unwrap() - 2.0).abs() < ::std::f32::EPSILON);
        assert_eq!(scorer.advance(3).unwrap(), 4);
        assert_eq!(scorer.next().unwrap(), NO_MORE_DOCS);
    }
}
