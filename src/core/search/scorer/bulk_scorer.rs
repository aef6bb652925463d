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

use crate::core::search::collector::Collector;
use crate::core::search::scorer::Scorer;
use crate::core::search::NO_MORE_DOCS;
use crate::core::util::{Bits, DocId};
use crate::error::Result;

/// Pushes the matches of a `Scorer` into a `Collector`, the push style
/// counterpart of iterating the scorer by hand.
pub struct BulkScorer<'a> {
    scorer: &'a mut dyn Scorer,
}

impl<'a> BulkScorer<'a> {
    pub fn new(scorer: &'a mut dyn Scorer) -> BulkScorer<'a> {
        BulkScorer { scorer }
    }

    /// Collects every match before `max`, returns the first doc on or after
    /// `max`, or `NO_MORE_DOCS`.
    pub fn score_all(
        &mut self,
        collector: &mut dyn Collector,
        accept_docs: Option<&dyn Bits>,
        max: DocId,
    ) -> Result<DocId> {
        self.score(collector, accept_docs, 0, max)
    }

    /// Collects matching documents in a range and return an estimation of the
    /// next matching document which is on or after `max`.
    ///
    /// *Arguments*
    ///     * `min` Score starting at, including, this document.
    ///     * `max` Score up to, but not including, this doc.
    ///
    /// The return value must be:
    ///     * >= `max`
    ///     * `NO_MORE_DOCS` if there are no more matches
    ///     * <= the first matching document that is >= `max` otherwise.
    pub fn score(
        &mut self,
        collector: &mut dyn Collector,
        accept_docs: Option<&dyn Bits>,
        min: DocId,
        max: DocId,
    ) -> Result<DocId> {
        let mut current_doc = self.scorer.doc_id();
        if current_doc < min {
            current_doc = self.scorer.advance(min)?;
        }

        while current_doc < max {
            let accepted = match accept_docs {
                Some(bits) => bits.get(current_doc as usize)?,
                None => true,
            };
            if accepted {
                collector.collect(current_doc, &mut *self.scorer)?;
            }
            current_doc = self.scorer.next()?;
        }
        Ok(current_doc)
    }
}
