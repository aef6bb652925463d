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

use crate::core::search::posting_iterator::PostingIterator;
use crate::core::search::scorer::Scorer;
use crate::core::search::similarity::SimScorer;
use crate::core::search::DocIterator;
use crate::core::util::DocId;
use crate::error::Result;

/// Scores the postings of a single term.
pub struct TermScorer {
    sim_scorer: Box<dyn SimScorer>,
    postings_iterator: Box<dyn PostingIterator>,
    needs_freqs: bool,
}

impl TermScorer {
    pub fn new(
        sim_scorer: Box<dyn SimScorer>,
        postings_iterator: Box<dyn PostingIterator>,
        needs_freqs: bool,
    ) -> Self {
        TermScorer {
            sim_scorer,
            postings_iterator,
            needs_freqs,
        }
    }

    pub fn freq(&self) -> Result<i32> {
        if self.needs_freqs {
            self.postings_iterator.freq()
        } else {
            Ok(1)
        }
    }
}

impl Scorer for TermScorer {
    fn score(&mut self) -> Result<f32> {
        let doc_id = self.doc_id();
        let freq = self.freq()?;
        self.sim_scorer.score_exact(doc_id, freq)
    }
}

impl DocIterator for TermScorer {
    fn doc_id(&self) -> DocId {
        self.postings_iterator.doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        self.postings_iterator.next()
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        self.postings_iterator.advance(target)
    }

    fn cost(&self) -> usize {
        self.postings_iterator.cost()
    }
}
