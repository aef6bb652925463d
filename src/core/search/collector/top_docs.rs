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

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f32;

use crate::core::index::reader::LeafReaderContext;
use crate::core::search::collector::{Collector, SearchCollector};
use crate::core::search::scorer::Scorer;
use crate::core::search::top_docs::{ScoreDoc, ScoreDocHit, TopDocs};
use crate::core::util::DocId;
use crate::error::Result;

/// Heap entry ordered so that the worst hit is the greatest.
#[derive(Debug)]
struct HitEntry {
    doc: DocId,
    score: f32,
}

impl Ord for HitEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then(self.doc.cmp(&other.doc))
    }
}

impl PartialOrd for HitEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HitEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HitEntry {}

type ScoreDocPriorityQueue = BinaryHeap<HitEntry>;

/// Collects the top scoring hits, ties broken by smaller doc id.
///
/// With an `after` hit it only keeps hits ranking strictly after it, which
/// pages through results; `total_hits` still counts every match.
pub struct TopDocsCollector {
    /// Holds the top hits, the worst one on top.
    pq: ScoreDocPriorityQueue,

    estimated_hits: usize,

    /// The total number of documents that the collector encountered.
    total_hits: usize,

    max_score: f32,

    cur_doc_base: DocId,

    after: Option<ScoreDoc>,
}

impl TopDocsCollector {
    pub fn new(estimated_hits: usize) -> TopDocsCollector {
        let pq = ScoreDocPriorityQueue::with_capacity(estimated_hits);
        TopDocsCollector {
            pq,
            estimated_hits,
            total_hits: 0,
            max_score: f32::NAN,
            cur_doc_base: 0,
            after: None,
        }
    }

    /// Collects the hits ranking after `after`, which must come from a
    /// previous page of the same query.
    pub fn with_after(estimated_hits: usize, after: ScoreDoc) -> TopDocsCollector {
        let mut collector = TopDocsCollector::new(estimated_hits);
        collector.after = Some(after);
        collector
    }

    pub fn total_hits(&self) -> usize {
        self.total_hits
    }

    /// Returns the top docs that were collected by this collector.
    pub fn top_docs(&mut self) -> TopDocs {
        let mut score_docs = Vec::with_capacity(self.pq.len());
        while let Some(entry) = self.pq.pop() {
            score_docs.push(ScoreDocHit::Score(ScoreDoc::new(entry.doc, entry.score)));
        }
        score_docs.reverse();
        TopDocs::new(self.total_hits, score_docs, self.max_score)
    }

    fn after_allows(&self, doc: DocId, score: f32) -> bool {
        match &self.after {
            Some(after) => score < after.score || (score == after.score && doc > after.doc),
            None => true,
        }
    }

    fn add_doc(&mut self, doc: DocId, score: f32) {
        debug_assert!(self.pq.len() <= self.estimated_hits);

        self.total_hits += 1;
        if self.max_score.is_nan() || score > self.max_score {
            self.max_score = score;
        }

        if self.estimated_hits == 0 || !self.after_allows(doc, score) {
            return;
        }

        if self.pq.len() < self.estimated_hits {
            self.pq.push(HitEntry { doc, score });
        } else if let Some(mut worst) = self.pq.peek_mut() {
            // docs arrive in increasing order so ties never replace
            if worst.score < score {
                worst.doc = doc;
                worst.score = score;
            }
        }
    }
}

impl SearchCollector for TopDocsCollector {
    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
        self.cur_doc_base = reader.doc_base;

        Ok(())
    }
}

impl Collector for TopDocsCollector {
    fn needs_scores(&self) -> bool {
        true
    }

    fn collect(&mut self, doc: DocId, scorer: &mut dyn Scorer) -> Result<()> {
        let score = scorer.score()?;
        debug_assert!((score - f32::NEG_INFINITY).abs() >= f32::EPSILON);
        debug_assert!(!score.is_nan());

        let id = doc + self.cur_doc_base;
        self.add_doc(id, score);

        Ok(())
    }
}
