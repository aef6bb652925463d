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

/// A scorer for a disjunction of sub scorers, scoring the sum of the sub
/// scorers positioned on the current doc.
///
/// A doc matches once at least `min_should_match` sub scorers are on it,
/// and at least one in any case.
pub struct DisjunctionSumScorer<T: Scorer> {
    subs: Vec<T>,
    min_should_match: usize,
    needs_scores: bool,
    cost: usize,
    doc: DocId,
}

impl<T: Scorer> DisjunctionSumScorer<T> {
    pub fn new(
        children: Vec<T>,
        needs_scores: bool,
        min_should_match: usize,
    ) -> DisjunctionSumScorer<T> {
        assert!(children.len() > 1);

        let cost = children.iter().map(|c| c.cost()).sum();
        DisjunctionSumScorer {
            subs: children,
            min_should_match: min_should_match.max(1),
            needs_scores,
            cost,
            doc: -1,
        }
    }

    /// Number of sub scorers matching the current doc.
    pub fn freq(&self) -> usize {
        if self.doc == NO_MORE_DOCS || self.doc < 0 {
            return 0;
        }
        self.subs.iter().filter(|s| s.doc_id() == self.doc).count()
    }

    fn min_doc(&self) -> DocId {
        self.subs
            .iter()
            .map(|s| s.doc_id())
            .min()
            .unwrap_or(NO_MORE_DOCS)
    }

    /// Moves to the first doc `>= target` matched by enough sub scorers.
    fn do_next(&mut self, mut target: DocId) -> Result<DocId> {
        loop {
            for sub in &mut self.subs {
                if sub.doc_id() < target {
                    sub.advance(target)?;
                }
            }
            let doc = self.min_doc();
            if doc == NO_MORE_DOCS {
                self.doc = NO_MORE_DOCS;
                return Ok(NO_MORE_DOCS);
            }
            let matching = self.subs.iter().filter(|s| s.doc_id() == doc).count();
            if matching >= self.min_should_match {
                self.doc = doc;
                return Ok(doc);
            }
            target = doc + 1;
        }
    }
}

impl<T: Scorer> Scorer for DisjunctionSumScorer<T> {
    fn score(&mut self) -> Result<f32> {
        if !self.needs_scores {
            return Ok(0.0);
        }
        let doc = self.doc;
        let mut score = 0.0f32;
        for sub in &mut self.subs {
            if sub.doc_id() == doc {
                score += sub.score()?;
            }
        }
        Ok(score)
    }
}

impl<T: Scorer> DocIterator for DisjunctionSumScorer<T> {
    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn next(&mut self) -> Result<DocId> {
        if self.doc == NO_MORE_DOCS {
            return Ok(NO_MORE_DOCS);
        }
        let target = self.doc + 1;
        self.do_next(target)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        if target == NO_MORE_DOCS {
            self.doc = NO_MORE_DOCS;
            return Ok(NO_MORE_DOCS);
        }
        self.do_next(target.max(self.doc + 1))
    }

    fn cost(&self) -> usize {
        self.cost
    }
}
