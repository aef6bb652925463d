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
use crate::core::search::{DocIterator, NO_MORE_DOCS};
use crate::core::util::DocId;
use crate::error::Result;

/// A Scorer for queries with a required sub scorer and an excluding sub
/// scorer. Scores only with the required scorer.
pub struct ReqNotScorer {
    req_scorer: Box<dyn Scorer>,
    not_scorer: Box<dyn Scorer>,
}

impl ReqNotScorer {
    pub fn new(req_scorer: Box<dyn Scorer>, not_scorer: Box<dyn Scorer>) -> Self {
        Self {
            req_scorer,
            not_scorer,
        }
    }

    /// Returns `doc` when it is not excluded, otherwise moves on to the next
    /// required doc that is not.
    fn to_non_excluded(&mut self, mut doc: DocId) -> Result<DocId> {
        while doc != NO_MORE_DOCS {
            let mut not_doc = self.not_scorer.doc_id();
            if not_doc < doc {
                not_doc = self.not_scorer.advance(doc)?;
            }
            if not_doc != doc {
                return Ok(doc);
            }
            doc = self.req_scorer.next()?;
        }
        Ok(NO_MORE_DOCS)
    }
}

impl Scorer for ReqNotScorer {
    fn score(&mut self) -> Result<f32> {
        self.req_scorer.score()
    }
}

impl DocIterator for ReqNotScorer {
    fn doc_id(&self) -> DocId {
        self.req_scorer.doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        let doc = self.req_scorer.next()?;
        self.to_non_excluded(doc)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        let doc = self.req_scorer.advance(target)?;
        self.to_non_excluded(doc)
    }

    fn cost(&self) -> usize {
        self.req_scorer.cost()
    }
}
