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

use crate::core::search::sort_field::SortField;
use crate::core::util::{DocId, VariantValue};
use std::cmp::Ordering;
use std::f32;

#[derive(Clone, Debug, Serialize)]
pub struct ScoreDoc {
    pub doc: DocId,
    pub score: f32,
    /// Index of the shard the hit came from, set by `TopDocs::merge`.
    pub shard_index: usize,
}

impl ScoreDoc {
    pub fn new(doc: DocId, score: f32) -> ScoreDoc {
        ScoreDoc {
            doc,
            score,
            shard_index: 0,
        }
    }

    pub fn reset(&mut self, doc: DocId, score: f32) {
        self.doc = doc;
        self.score = score;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDoc {
    pub doc: DocId,
    pub score: f32,
    pub shard_index: usize,
    /// Expert: The values which are used to sort the referenced document.
    /// The order of these will match the original sort criteria given by a
    /// `Sort` object. Each value comes from the `value` method of the
    /// `FieldComparator` used to sort that field.
    pub fields: Vec<VariantValue>,
}

impl FieldDoc {
    pub fn new(doc: DocId, score: f32, fields: Vec<VariantValue>) -> FieldDoc {
        FieldDoc {
            doc,
            score,
            shard_index: 0,
            fields,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum ScoreDocHit {
    Score(ScoreDoc),
    Field(FieldDoc),
}

impl ScoreDocHit {
    pub fn score(&self) -> f32 {
        match *self {
            ScoreDocHit::Score(ref s) => s.score,
            ScoreDocHit::Field(ref f) => f.score,
        }
    }

    pub fn set_score(&mut self, score: f32) {
        match *self {
            ScoreDocHit::Score(ref mut s) => s.score = score,
            ScoreDocHit::Field(ref mut f) => f.score = score,
        }
    }

    pub fn doc_id(&self) -> DocId {
        match *self {
            ScoreDocHit::Score(ref s) => s.doc,
            ScoreDocHit::Field(ref f) => f.doc,
        }
    }

    pub fn shard_index(&self) -> usize {
        match *self {
            ScoreDocHit::Score(ref s) => s.shard_index,
            ScoreDocHit::Field(ref f) => f.shard_index,
        }
    }

    pub fn set_shard_index(&mut self, shard_index: usize) {
        match *self {
            ScoreDocHit::Score(ref mut s) => s.shard_index = shard_index,
            ScoreDocHit::Field(ref mut f) => f.shard_index = shard_index,
        }
    }

    /// Sort values of a field sorted hit, empty for score hits.
    pub fn fields(&self) -> &[VariantValue] {
        match *self {
            ScoreDocHit::Score(_) => &[],
            ScoreDocHit::Field(ref f) => &f.fields,
        }
    }

    pub fn order_by_doc(d1: &ScoreDocHit, d2: &ScoreDocHit) -> Ordering {
        d1.doc_id().cmp(&d2.doc_id())
    }

    /// Ranking order of score sorted hits: score desc, then shard asc and
    /// doc asc. NaN scores rank last.
    pub fn order_by_score(d1: &ScoreDocHit, d2: &ScoreDocHit) -> Ordering {
        let by_score = match d2.score().partial_cmp(&d1.score()) {
            Some(ord) => ord,
            None => d1.score().is_nan().cmp(&d2.score().is_nan()),
        };
        by_score
            .then(d1.shard_index().cmp(&d2.shard_index()))
            .then(d1.doc_id().cmp(&d2.doc_id()))
    }
}

/// Represents hits returned by `IndexSearcher::search`.
#[derive(Clone, Debug, Serialize)]
pub struct TopDocs {
    /// The total number of hits for the query.
    pub total_hits: usize,

    /// The top hits for the query.
    pub score_docs: Vec<ScoreDocHit>,

    /// The maximum score encountered, NaN when no scores were tracked.
    pub max_score: f32,

    /// The fields which were used to sort results by, empty when sorted by
    /// relevance.
    #[serde(skip)]
    pub fields: Vec<SortField>,
}

impl TopDocs {
    pub fn new(total_hits: usize, score_docs: Vec<ScoreDocHit>, max_score: f32) -> TopDocs {
        TopDocs {
            total_hits,
            score_docs,
            max_score,
            fields: vec![],
        }
    }

    pub fn with_fields(
        total_hits: usize,
        score_docs: Vec<ScoreDocHit>,
        max_score: f32,
        fields: Vec<SortField>,
    ) -> TopDocs {
        TopDocs {
            total_hits,
            score_docs,
            max_score,
            fields,
        }
    }

    pub fn empty() -> TopDocs {
        TopDocs::new(0, vec![], f32::NAN)
    }

    pub fn total_hits(&self) -> usize {
        self.total_hits
    }

    pub fn max_score(&self) -> f32 {
        self.max_score
    }

    pub fn score_docs(&self) -> &[ScoreDocHit] {
        &self.score_docs
    }

    pub fn score_docs_mut(&mut self) -> &mut Vec<ScoreDocHit> {
        &mut self.score_docs
    }

    /// Merges the relevance sorted results of several shards into the top
    /// `top_n`, tagging every hit with the index of its shard.
    ///
    /// Ties on score keep the hit of the lower shard first, then the lower
    /// doc.
    pub fn merge(top_n: usize, shard_hits: Vec<TopDocs>) -> TopDocs {
        let mut total_hits = 0;
        let mut max_score = f32::NAN;
        let mut hits = Vec::new();
        for (shard_index, shard) in shard_hits.into_iter().enumerate() {
            total_hits += shard.total_hits;
            if !shard.max_score.is_nan()
                && (max_score.is_nan() || shard.max_score > max_score)
            {
                max_score = shard.max_score;
            }
            for mut hit in shard.score_docs {
                hit.set_shard_index(shard_index);
                hits.push(hit);
            }
        }
        hits.sort_by(ScoreDocHit::order_by_score);
        hits.truncate(top_n);
        TopDocs::new(total_hits, hits, max_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(docs: &[(DocId, f32)]) -> TopDocs {
        let score_docs: Vec<ScoreDocHit> = docs
            .iter()
            .map(|&(doc, score)| ScoreDocHit::Score(ScoreDoc::new(doc, score)))
            .collect();
        let max_score = docs.iter().map(|d| d.1).fold(f32::NAN, f32::max);
        TopDocs::new(docs.len() + 1, score_docs, max_score)
    }

    #[test]
    fn test_merge_by_score_then_shard() {
        let merged = TopDocs::merge(
            4,
            vec![
                hits(&[(3, 2.0), (1, 1.0)]),
                hits(&[(0, 3.0), (2, 1.0)]),
                hits(&[(5, 1.0)]),
            ],
        );

        assert_eq!(merged.total_hits(), 8);
        assert!((merged.max_score() - 3.0).abs() < ::std::f32::EPSILON);

        let got: Vec<(usize, DocId)> = merged
            .score_docs()
            .iter()
            .map(|h| (h.shard_index(), h.doc_id()))
            .collect();
        assert_eq!(got, vec![(1, 0), (0, 3), (0, 1), (1, 2)]);
    }

    #[test]
    fn test_merge_empty() {
        let merged = TopDocs::merge(10, vec![TopDocs::empty(), TopDocs::empty()]);
        assert_eq!(merged.total_hits(), 0);
        assert!(merged.score_docs().is_empty());
        assert!(merged.max_score().is_nan());
    }

    #[test]
    fn test_nan_scores_rank_last() {
        let a = ScoreDocHit::Score(ScoreDoc::new(0, f32::NAN));
        let b = ScoreDocHit::Score(ScoreDoc::new(1, 0.5));
        assert_eq!(ScoreDocHit::order_by_score(&a, &b), Ordering::Greater);
        assert_eq!(ScoreDocHit::order_by_score(&b, &a), Ordering::Less);
    }
}
