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
use std::f32;

use crate::core::index::reader::LeafReaderContext;
use crate::core::search::collector::{Collector, SearchCollector};
use crate::core::search::scorer::Scorer;
use crate::core::search::sort_field::{
    ComparatorValue, FieldComparator, FieldComparatorEnum, Sort, SortFieldType,
};
use crate::core::search::top_docs::{FieldDoc, ScoreDocHit, TopDocs};
use crate::core::util::DocId;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct Entry {
    slot: usize,
    doc: DocId,
    score: f32,
}

/// Collects the top hits by a `Sort`. Hits that compare equal on every sort
/// field keep index order.
pub struct TopFieldCollector {
    sort: Sort,
    comparators: Vec<FieldComparatorEnum>,
    reverse: Vec<bool>,
    num_hits: usize,
    /// Best first, the bottom is the last entry.
    queue: Vec<Entry>,
    total_hits: usize,
    max_score: f32,
    track_scores: bool,
    doc_base: DocId,
}

impl TopFieldCollector {
    /// `track_scores` keeps the score of every hit and the max score even
    /// when the sort does not use them.
    pub fn new(sort: Sort, num_hits: usize, track_scores: bool) -> TopFieldCollector {
        let comparators = sort
            .get_sort()
            .iter()
            .map(|f| f.get_comparator(num_hits))
            .collect();
        let reverse = sort.get_sort().iter().map(|f| f.is_reverse()).collect();
        TopFieldCollector {
            sort,
            comparators,
            reverse,
            num_hits,
            queue: Vec::with_capacity(num_hits),
            total_hits: 0,
            max_score: f32::NAN,
            track_scores,
            doc_base: 0,
        }
    }

    pub fn total_hits(&self) -> usize {
        self.total_hits
    }

    fn apply_reverse(reverse: bool, ord: Ordering) -> Ordering {
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    }

    fn compare_entries(
        comparators: &[FieldComparatorEnum],
        reverse: &[bool],
        a: &Entry,
        b: &Entry,
    ) -> Ordering {
        for (comparator, &rev) in comparators.iter().zip(reverse) {
            let ord = Self::apply_reverse(rev, comparator.compare(a.slot, b.slot));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.doc.cmp(&b.doc)
    }

    fn comparator_value(
        comparator: &FieldComparatorEnum,
        doc: DocId,
        score: f32,
    ) -> ComparatorValue {
        match comparator.get_type() {
            SortFieldType::Score => ComparatorValue::Score(score),
            _ => ComparatorValue::Doc(doc),
        }
    }

    /// Whether the leaf local `doc` sorts before the bottom.
    fn competitive(&mut self, doc: DocId, score: f32) -> Result<bool> {
        for (comparator, &rev) in self.comparators.iter_mut().zip(&self.reverse) {
            let value = Self::comparator_value(comparator, doc, score);
            let ord = Self::apply_reverse(rev, comparator.compare_bottom(value)?);
            if ord != Ordering::Equal {
                return Ok(ord == Ordering::Greater);
            }
        }
        // equal on every field, the earlier doc wins
        Ok(false)
    }

    fn insert(&mut self, slot: usize, doc: DocId, score: f32) -> Result<()> {
        for comparator in &mut self.comparators {
            let value = Self::comparator_value(comparator, doc, score);
            comparator.copy(slot, value)?;
        }
        let entry = Entry {
            slot,
            doc: doc + self.doc_base,
            score,
        };
        let pos = {
            let comparators = &self.comparators;
            let reverse = &self.reverse;
            match self
                .queue
                .binary_search_by(|e| Self::compare_entries(comparators, reverse, e, &entry))
            {
                Ok(pos) | Err(pos) => pos,
            }
        };
        self.queue.insert(pos, entry);
        if self.queue.len() == self.num_hits {
            if let Some(bottom) = self.queue.last() {
                let slot = bottom.slot;
                for comparator in &mut self.comparators {
                    comparator.set_bottom(slot);
                }
            }
        }
        Ok(())
    }

    /// Returns the top hits as `FieldDoc`s carrying their sort values.
    pub fn top_docs(&mut self) -> TopDocs {
        let score_docs = self
            .queue
            .iter()
            .map(|e| {
                let fields = self.comparators.iter().map(|c| c.value(e.slot)).collect();
                let score = if self.needs_scores() { e.score } else { f32::NAN };
                ScoreDocHit::Field(FieldDoc::new(e.doc, score, fields))
            })
            .collect();
        TopDocs::with_fields(
            self.total_hits,
            score_docs,
            self.max_score,
            self.sort.get_sort().to_vec(),
        )
    }
}

impl SearchCollector for TopFieldCollector {
    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
        self.doc_base = reader.doc_base;
        for comparator in &mut self.comparators {
            comparator.set_next_reader(reader)?;
        }
        Ok(())
    }
}

impl Collector for TopFieldCollector {
    fn needs_scores(&self) -> bool {
        self.track_scores || self.sort.needs_scores()
    }

    fn collect(&mut self, doc: DocId, scorer: &mut dyn Scorer) -> Result<()> {
        self.total_hits += 1;
        let score = if self.needs_scores() {
            let score = scorer.score()?;
            if self.max_score.is_nan() || score > self.max_score {
                self.max_score = score;
            }
            score
        } else {
            f32::NAN
        };

        if self.num_hits == 0 {
            return Ok(());
        }
        if self.queue.len() < self.num_hits {
            let slot = self.queue.len();
            return self.insert(slot, doc, score);
        }
        if !self.competitive(doc, score)? {
            return Ok(());
        }
        // reuse the bottom's slot
        if let Some(bottom) = self.queue.pop() {
            self.insert(bottom.slot, doc, score)?;
        }
        Ok(())
    }
}
