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

/// Scorer for conjunctions, sets of queries, all of which are required.
///
/// The cheapest scorer leads. Every other scorer is advanced to the lead's
/// doc, and any overshoot becomes the new target of the lead.
pub struct ConjunctionScorer<T: Scorer> {
    lead: T,
    others: Vec<T>,
}

impl<T: Scorer> ConjunctionScorer<T> {
    pub fn new(mut children: Vec<T>) -> ConjunctionScorer<T> {
        assert!(children.len() >= 2);
        children.sort_by_key(|c| c.cost());
        let lead = children.remove(0);
        ConjunctionScorer {
            lead,
            others: children,
        }
    }

    /// Moves every scorer onto the first doc on or after `target` that all
    /// of them match.
    fn agree(&mut self, mut target: DocId) -> Result<DocId> {
        'lead: while target != NO_MORE_DOCS {
            for other in &mut self.others {
                let doc = if other.doc_id() < target {
                    other.advance(target)?
                } else {
                    other.doc_id()
                };
                if doc > target {
                    target = self.lead.advance(doc)?;
                    continue 'lead;
                }
            }
            break;
        }
        Ok(target)
    }
}

impl<T: Scorer> Scorer for ConjunctionScorer<T> {
    fn score(&mut self) -> Result<f32> {
        let mut sum = self.lead.score()?;
        for other in &mut self.others {
            sum += other.score()?;
        }
        Ok(sum)
    }
}

impl<T: Scorer> DocIterator for ConjunctionScorer<T> {
    fn doc_id(&self) -> DocId {
        self.lead.doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        let target = self.lead.next()?;
        self.agree(target)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        let target = self.lead.advance(target)?;
        self.agree(target)
    }

    fn cost(&self) -> usize {
        self.lead.cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::tests::*;

    fn conjunction(docs: Vec<Vec<DocId>>) -> ConjunctionScorer<MockSimpleScorer<MockDocIterator>> {
        ConjunctionScorer::new(docs.into_iter().map(create_mock_scorer).collect())
    }

    #[test]
    fn test_next_visits_common_docs() {
        let mut scorer = conjunction(vec![vec![1, 2, 3, 4, 5], vec![2, 5], vec![2, 3, 4, 5]]);
        assert_eq!(scorer.doc_id(), -1);
        assert_eq!(scorer.next().unwrap(), 2);
        assert!((scorer.score().unwrap() - 6.0).abs() < ::std::f32::EPSILON);
        assert_eq!(scorer.next().unwrap(), 5);
        assert!((scorer.score().unwrap() - 15.0).abs() < ::std::f32::EPSILON);
        assert_eq!(scorer.next().unwrap(), NO_MORE_DOCS);
        assert_eq!(scorer.doc_id(), NO_MORE_DOCS);
    }

    #[test]
    fn test_advance_skips_to_agreement() {
        let mut scorer = conjunction(vec![vec![1, 2, 3, 4, 5], vec![2, 5], vec![2, 3, 4, 5]]);
        assert_eq!(scorer.advance(3).unwrap(), 5);
        assert_eq!(scorer.advance(6).unwrap(), NO_MORE_DOCS);

        let mut scorer = conjunction(vec![vec![0, 4, 8, 12], vec![1, 4, 9, 12], vec![4, 12]]);
        assert_eq!(scorer.advance(1).unwrap(), 4);
        assert_eq!(scorer.next().unwrap(), 12);
    }

    #[test]
    fn test_disjoint_children_match_nothing() {
        let mut scorer = conjunction(vec![vec![1, 3, 5], vec![2, 4, 6]]);
        assert_eq!(scorer.next().unwrap(), NO_MORE_DOCS);
        assert_eq!(scorer.cost(), 3);
    }
}
