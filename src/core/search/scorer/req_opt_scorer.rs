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

use crate::core::search::scorer::Scorer;
use crate::core::search::DocIterator;
use crate::core::util::DocId;
use crate::error::Result;

/// A Scorer for queries with a required part and an optional part.
///
/// Iterates the required docs only; the optional scorer is advanced lazily
/// and adds its score when it is on the same doc.
pub struct ReqOptScorer {
    req_scorer: Box<dyn Scorer>,
    opt_scorer: Box<dyn Scorer>,
}

impl ReqOptScorer {
    pub fn new(req_scorer: Box<dyn Scorer>, opt_scorer: Box<dyn Scorer>) -> ReqOptScorer {
        ReqOptScorer {
            req_scorer,
            opt_scorer,
        }
    }
}

impl Scorer for ReqOptScorer {
    fn score(&mut self) -> Result<f32> {
        let current_doc = self.req_scorer.doc_id();
        let mut score = self.req_scorer.score()?;

        let mut opt_doc = self.opt_scorer.doc_id();
        if opt_doc < current_doc {
            opt_doc = self.opt_scorer.advance(current_doc)?;
        }

        if opt_doc == current_doc {
            score += self.opt_scorer.score()?;
        }

        Ok(score)
    }
}

impl DocIterator for ReqOptScorer {
    fn doc_id(&self) -> DocId {
        self.req_scorer.doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        self.req_scorer.next()
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        self.req_scorer.advance(target)
    }

    fn cost(&self) -> usize {
        self.req_scorer.cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::scorer::*;
    use crate::core::search::tests::*;
    use crate::core::search::NO_MORE_DOCS;

    #[test]
    fn test_score() {
        let s1 = create_mock_scorer(vec![1, 2, 3, 4, 5]);
        let s2 = create_mock_scorer(vec![2, 3, 5]);
        let s3 = create_mock_scorer(vec![2, 5]);
        let s4 = create_mock_scorer(vec![3, 4, 5]);

        let req_scorer: Box<dyn Scorer> = Box::new(ConjunctionScorer::new(vec![s1, s2]));
        let opt_scorer: Box<dyn Scorer> =
            Box::new(DisjunctionSumScorer::new(vec![s3, s4], true, 1));
        let mut scorer = ReqOptScorer::new(req_scorer, opt_scorer);

        assert_eq!(scorer.doc_id(), -1);

        // 2 + 2 required, 2 optional
        assert_eq!(scorer.next().unwrap(), 2);
        assert!((scorer.score().unwrap() - 6.0).abs() < ::std::f32::EPSILON);

        assert_eq!(scorer.next().unwrap(), 3);
        assert!((scorer.score().unwrap() - 9.0).abs() < ::std::f32::EPSILON);

        // both optional clauses are on 5
        assert_eq!(scorer.next().unwrap(), 5);
        assert!((scorer.score().unwrap() - 20.0).abs() < ::std::f32::EPSILON);

        assert_eq!(scorer.next().unwrap(), NO_MORE_DOCS);
    }
}
