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

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::core::index::Term;
use crate::core::search::posting_iterator::PostingIterator;
use crate::core::search::scorer::Scorer;
use crate::core::search::similarity::SimScorer;
use crate::core::search::{DocIterator, NO_MORE_DOCS};
use crate::core::util::DocId;
use crate::error::Result;

/// The postings of one phrase term with its position in the phrase.
///
/// Ordered by doc freq first so the rarest term leads the doc intersection.
pub struct PostingsAndFreq {
    pub postings: Box<dyn PostingIterator>,
    pub doc_freq: i32,
    pub position: i32,
    pub term: Term,
}

impl PostingsAndFreq {
    pub fn new(
        postings: Box<dyn PostingIterator>,
        doc_freq: i32,
        position: i32,
        term: Term,
    ) -> Self {
        PostingsAndFreq {
            postings,
            doc_freq,
            position,
            term,
        }
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.doc_freq
            .cmp(&other.doc_freq)
            .then(self.position.cmp(&other.position))
            .then_with(|| self.term.field.cmp(&other.term.field))
            .then_with(|| self.term.bytes.cmp(&other.term.bytes))
    }
}

/// Sorts phrase postings cheapest first.
pub fn sort_postings(postings: &mut Vec<PostingsAndFreq>) {
    postings.sort_by(|a, b| a.cmp_key(b));
}

/// Positions the first iterator on a doc all the others contain too, starting
/// at its current doc.
fn align_docs<T: AsMut<dyn PostingIterator>>(
    iterators: &mut [T],
    mut target: DocId,
) -> Result<DocId> {
    'advanceHead: loop {
        if target == NO_MORE_DOCS {
            return Ok(NO_MORE_DOCS);
        }
        for i in 1..iterators.len() {
            let it = iterators[i].as_mut();
            let mut doc = it.doc_id();
            if doc < target {
                doc = it.advance(target)?;
            }
            if doc > target {
                target = iterators[0].as_mut().advance(doc)?;
                continue 'advanceHead;
            }
        }
        return Ok(target);
    }
}

struct PostingsAndPosition {
    postings: Box<dyn PostingIterator>,
    pos: i32,
    offset: i32,
    freq: i32,
    up_to: i32,
}

impl AsMut<dyn PostingIterator> for PostingsAndPosition {
    fn as_mut(&mut self) -> &mut (dyn PostingIterator + 'static) {
        self.postings.as_mut()
    }
}

/// Scores documents containing the phrase terms at consecutive positions.
pub struct ExactPhraseScorer {
    postings: Vec<PostingsAndPosition>,
    doc_scorer: Box<dyn SimScorer>,
    needs_scores: bool,
    freq: i32,
    cost: usize,
}

impl ExactPhraseScorer {
    pub fn new(
        mut postings: Vec<PostingsAndFreq>,
        doc_scorer: Box<dyn SimScorer>,
        needs_scores: bool,
    ) -> Self {
        assert!(!postings.is_empty());
        sort_postings(&mut postings);
        let cost = postings[0].postings.cost();
        let postings = postings
            .into_iter()
            .map(|p| PostingsAndPosition {
                postings: p.postings,
                pos: -1,
                offset: p.position,
                freq: 0,
                up_to: 0,
            })
            .collect();
        ExactPhraseScorer {
            postings,
            doc_scorer,
            needs_scores,
            freq: 0,
            cost,
        }
    }

    /// Number of phrase occurrences in the current doc.
    pub fn freq(&self) -> i32 {
        self.freq
    }

    fn advance_position(posting: &mut PostingsAndPosition, target: i32) -> Result<bool> {
        while posting.pos < target {
            if posting.up_to == posting.freq {
                return Ok(false);
            }
            posting.pos = posting.postings.next_position()?;
            posting.up_to += 1;
        }
        Ok(true)
    }

    fn phrase_freq(&mut self) -> Result<i32> {
        for pp in &mut self.postings {
            pp.freq = pp.postings.freq()?;
            pp.pos = pp.postings.next_position()?;
            pp.up_to = 1;
        }

        let mut freq = 0;
        let needs_scores = self.needs_scores;
        if let Some((lead, others)) = self.postings.split_first_mut() {
            'advanceHead: loop {
                let phrase_pos = lead.pos - lead.offset;
                for posting in others.iter_mut() {
                    let expected_pos = phrase_pos + posting.offset;

                    // advance up to the same position as the lead
                    if !Self::advance_position(posting, expected_pos)? {
                        break 'advanceHead;
                    }

                    if posting.pos != expected_pos {
                        // we advanced too far
                        let target = posting.pos - posting.offset + lead.offset;
                        if Self::advance_position(lead, target)? {
                            continue 'advanceHead;
                        } else {
                            break 'advanceHead;
                        }
                    }
                }

                freq += 1;
                if !needs_scores || lead.up_to == lead.freq {
                    break;
                }
                lead.pos = lead.postings.next_position()?;
                lead.up_to += 1;
            }
        }
        self.freq = freq;
        Ok(freq)
    }

    fn next_match(&mut self, mut doc: DocId) -> Result<DocId> {
        loop {
            doc = align_docs(&mut self.postings, doc)?;
            if doc == NO_MORE_DOCS || self.phrase_freq()? > 0 {
                return Ok(doc);
            }
            doc = self.postings[0].postings.next()?;
        }
    }
}

impl Scorer for ExactPhraseScorer {
    fn score(&mut self) -> Result<f32> {
        let doc = self.doc_id();
        self.doc_scorer.score(doc, self.freq as f32)
    }
}

impl DocIterator for ExactPhraseScorer {
    fn doc_id(&self) -> DocId {
        self.postings[0].postings.doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        let doc = self.postings[0].postings.next()?;
        self.next_match(doc)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        let doc = self.postings[0].postings.advance(target)?;
        self.next_match(doc)
    }

    fn cost(&self) -> usize {
        self.cost
    }
}

/// Position of a term in a document relative to its offset in the phrase.
struct PhrasePositions {
    postings: Box<dyn PostingIterator>,
    position: i32,
    // remaining positions in this doc
    count: i32,
    offset: i32,
}

impl PhrasePositions {
    fn first_position(&mut self) -> Result<()> {
        self.count = self.postings.freq()?;
        self.next_position()?;
        Ok(())
    }

    fn next_position(&mut self) -> Result<bool> {
        if self.count > 0 {
            self.count -= 1;
            self.position = self.postings.next_position()? - self.offset;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl AsMut<dyn PostingIterator> for PhrasePositions {
    fn as_mut(&mut self) -> &mut (dyn PostingIterator + 'static) {
        self.postings.as_mut()
    }
}

/// Scores documents containing the phrase terms within `slop` moves of each
/// other. Each occurrence contributes `compute_slop_factor(match_length)`.
///
/// Repeated terms are not told apart, so two of them may be matched at the
/// same document position.
pub struct SloppyPhraseScorer {
    pps: Vec<PhrasePositions>,
    doc_scorer: Box<dyn SimScorer>,
    slop: i32,
    needs_scores: bool,
    sloppy_freq: f32,
    num_matches: i32,
    // largest relative position of the current doc
    end: i32,
    cost: usize,
}

impl SloppyPhraseScorer {
    pub fn new(
        mut postings: Vec<PostingsAndFreq>,
        slop: i32,
        doc_scorer: Box<dyn SimScorer>,
        needs_scores: bool,
    ) -> Self {
        assert!(!postings.is_empty());
        sort_postings(&mut postings);
        let cost = postings[0].postings.cost();
        let pps = postings
            .into_iter()
            .map(|p| PhrasePositions {
                postings: p.postings,
                position: 0,
                count: 0,
                offset: p.position,
            })
            .collect();
        SloppyPhraseScorer {
            pps,
            doc_scorer,
            slop,
            needs_scores,
            sloppy_freq: 0.0,
            num_matches: 0,
            end: 0,
            cost,
        }
    }

    /// The summed slop factors of the current doc.
    pub fn sloppy_freq(&self) -> f32 {
        self.sloppy_freq
    }

    fn key(&self, idx: usize) -> Reverse<(i32, i32, usize)> {
        let pp = &self.pps[idx];
        Reverse((pp.position, pp.offset, idx))
    }

    fn advance_pp(&mut self, idx: usize) -> Result<bool> {
        if !self.pps[idx].next_position()? {
            return Ok(false);
        }
        if self.pps[idx].position > self.end {
            self.end = self.pps[idx].position;
        }
        Ok(true)
    }

    /// Minimal match lengths are found by moving the smallest relative
    /// position forward until it passes the next smallest.
    fn phrase_freq(&mut self) -> Result<f32> {
        self.end = i32::min_value();
        for pp in &mut self.pps {
            pp.first_position()?;
        }
        let mut pq = BinaryHeap::with_capacity(self.pps.len());
        for idx in 0..self.pps.len() {
            if self.pps[idx].position > self.end {
                self.end = self.pps[idx].position;
            }
            pq.push(self.key(idx));
        }

        let mut freq = 0.0f32;
        self.num_matches = 0;
        let mut idx = match pq.pop() {
            Some(Reverse((_, _, idx))) => idx,
            None => return Ok(0.0),
        };
        let mut match_length = self.end - self.pps[idx].position;
        let mut next = pq
            .peek()
            .map_or(self.pps[idx].position, |Reverse((pos, _, _))| *pos);
        while self.advance_pp(idx)? {
            if self.pps[idx].position > next {
                if match_length <= self.slop {
                    freq += self.doc_scorer.compute_slop_factor(match_length);
                    self.num_matches += 1;
                    if !self.needs_scores {
                        return Ok(freq);
                    }
                }
                pq.push(self.key(idx));
                idx = match pq.pop() {
                    Some(Reverse((_, _, idx))) => idx,
                    None => break,
                };
                next = pq
                    .peek()
                    .map_or(self.pps[idx].position, |Reverse((pos, _, _))| *pos);
                match_length = self.end - self.pps[idx].position;
            } else {
                let match_length2 = self.end - self.pps[idx].position;
                if match_length2 < match_length {
                    match_length = match_length2;
                }
            }
        }
        if match_length <= self.slop {
            freq += self.doc_scorer.compute_slop_factor(match_length);
            self.num_matches += 1;
        }
        Ok(freq)
    }

    fn next_match(&mut self, mut doc: DocId) -> Result<DocId> {
        loop {
            doc = align_docs(&mut self.pps, doc)?;
            if doc == NO_MORE_DOCS {
                return Ok(doc);
            }
            self.sloppy_freq = self.phrase_freq()?;
            if self.num_matches > 0 {
                return Ok(doc);
            }
            doc = self.pps[0].postings.next()?;
        }
    }
}

impl Scorer for SloppyPhraseScorer {
    fn score(&mut self) -> Result<f32> {
        let doc = self.doc_id();
        self.doc_scorer.score(doc, self.sloppy_freq)
    }
}

impl DocIterator for SloppyPhraseScorer {
    fn doc_id(&self) -> DocId {
        self.pps[0].postings.doc_id()
    }

    fn next(&mut self) -> Result<DocId> {
        let doc = self.pps[0].postings.next()?;
        self.next_match(doc)
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        let doc = self.pps[0].postings.advance(target)?;
        self.next_match(doc)
    }

    fn cost(&self) -> usize {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::Payload;

    /// Postings over `(doc, positions)` pairs.
    struct MockPostings {
        docs: Vec<(DocId, Vec<i32>)>,
        idx: usize,
        doc: DocId,
        pos_idx: usize,
    }

    impl MockPostings {
        fn new(docs: Vec<(DocId, Vec<i32>)>) -> Box<dyn PostingIterator> {
            Box::new(MockPostings {
                docs,
                idx: 0,
                doc: -1,
                pos_idx: 0,
            })
        }
    }

    impl DocIterator for MockPostings {
        fn doc_id(&self) -> DocId {
            self.doc
        }

        fn next(&mut self) -> Result<DocId> {
            if self.doc != -1 {
                self.idx += 1;
            }
            self.pos_idx = 0;
            self.doc = if self.idx < self.docs.len() {
                self.docs[self.idx].0
            } else {
                NO_MORE_DOCS
            };
            Ok(self.doc)
        }

        fn advance(&mut self, target: DocId) -> Result<DocId> {
            self.slow_advance(target)
        }

        fn cost(&self) -> usize {
            self.docs.len()
        }
    }

    impl PostingIterator for MockPostings {
        fn freq(&self) -> Result<i32> {
            Ok(self.docs[self.idx].1.len() as i32)
        }

        fn next_position(&mut self) -> Result<i32> {
            let pos = self.docs[self.idx].1[self.pos_idx];
            self.pos_idx += 1;
            Ok(pos)
        }

        fn start_offset(&self) -> Result<i32> {
            Ok(-1)
        }

        fn end_offset(&self) -> Result<i32> {
            Ok(-1)
        }

        fn payload(&self) -> Result<Payload> {
            Ok(Payload::new())
        }
    }

    /// Scores with the raw phrase freq.
    struct FreqSimScorer;

    impl SimScorer for FreqSimScorer {
        fn score(&mut self, _doc: DocId, freq: f32) -> Result<f32> {
            Ok(freq)
        }
    }

    fn phrase(terms: Vec<Vec<(DocId, Vec<i32>)>>) -> Vec<PostingsAndFreq> {
        terms
            .into_iter()
            .enumerate()
            .map(|(i, docs)| {
                let df = docs.len() as i32;
                PostingsAndFreq::new(
                    MockPostings::new(docs),
                    df,
                    i as i32,
                    Term::from_str("body", &format!("t{}", i)),
                )
            })
            .collect()
    }

    #[test]
    fn test_exact_phrase() {
        // "t0 t1": doc 1 has them adjacent twice, doc 3 reversed, doc 4 apart
        let postings = phrase(vec![
            vec![(1, vec![0, 5]), (3, vec![1]), (4, vec![0]), (6, vec![2])],
            vec![(1, vec![1, 6]), (3, vec![0]), (4, vec![3]), (6, vec![3])],
        ]);
        let mut scorer = ExactPhraseScorer::new(postings, Box::new(FreqSimScorer), true);

        assert_eq!(scorer.next().unwrap(), 1);
        assert_eq!(scorer.freq(), 2);
        assert!((scorer.score().unwrap() - 2.0).abs() < ::std::f32::EPSILON);
        assert_eq!(scorer.next().unwrap(), 6);
        assert_eq!(scorer.freq(), 1);
        assert_eq!(scorer.next().unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_exact_phrase_advance() {
        let postings = phrase(vec![
            vec![(1, vec![0]), (2, vec![4]), (5, vec![7])],
            vec![(1, vec![1]), (2, vec![5]), (5, vec![8])],
            vec![(1, vec![2]), (2, vec![9]), (5, vec![9])],
        ]);
        let mut scorer = ExactPhraseScorer::new(postings, Box::new(FreqSimScorer), false);

        assert_eq!(scorer.advance(2).unwrap(), 5);
        assert_eq!(scorer.doc_id(), 5);
        assert_eq!(scorer.next().unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_sloppy_phrase() {
        // "t0 t1" with slop 2
        let postings = phrase(vec![
            vec![(0, vec![0]), (1, vec![0]), (2, vec![3]), (3, vec![0])],
            vec![(0, vec![1]), (1, vec![2]), (2, vec![2]), (3, vec![5])],
        ]);
        let mut scorer =
            SloppyPhraseScorer::new(postings, 2, Box::new(FreqSimScorer), true);

        // exact match
        assert_eq!(scorer.next().unwrap(), 0);
        assert!((scorer.sloppy_freq() - 1.0).abs() < ::std::f32::EPSILON);

        // one term in between
        assert_eq!(scorer.next().unwrap(), 1);
        assert!((scorer.sloppy_freq() - 0.5).abs() < ::std::f32::EPSILON);

        // swapped terms need two moves
        assert_eq!(scorer.next().unwrap(), 2);
        assert!((scorer.sloppy_freq() - 1.0 / 3.0).abs() < 1e-6);

        // doc 3 needs four moves
        assert_eq!(scorer.next().unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_sloppy_phrase_zero_slop_is_exact() {
        let postings = phrase(vec![
            vec![(0, vec![0]), (1, vec![0])],
            vec![(0, vec![1]), (1, vec![2])],
        ]);
        let mut scorer =
            SloppyPhraseScorer::new(postings, 0, Box::new(FreqSimScorer), true);
        assert_eq!(scorer.next().unwrap(), 0);
        assert_eq!(scorer.next().unwrap(), NO_MORE_DOCS);
    }
}
