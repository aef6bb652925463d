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

//! Scoring models.
//!
//! A `Similarity` is consulted at index time to encode a per document norm
//! for each field (`compute_norm`), and at query time in three steps:
//!
//! - `compute_weight` is called once per query term (or phrase) with the
//!   collection and term statistics, producing a `SimWeight`;
//! - the searcher normalizes the weights of all clauses through
//!   `SimWeight::value_for_normalization`, `Similarity::query_norm` and
//!   `SimWeight::normalize`;
//! - for each segment the weight creates a `SimScorer`, whose `score` is
//!   called for each matching document.
//!
//! Exact queries (terms, exact phrases) score with an integer frequency via
//! `SimScorer::score_exact`; sloppy phrases accumulate a float frequency from
//! `compute_slop_factor` and score it with `SimScorer::score`, so both share
//! the same collection level weight.

mod bm25_similarity;

pub use self::bm25_similarity::*;

use crate::core::codec::field_infos::FieldInvertState;
use crate::core::index::reader::LeafReader;
use crate::core::search::explanation::Explanation;
use crate::core::search::statistics::{CollectionStatistics, TermStatistics};
use crate::core::util::DocId;
use crate::error::Result;

use std::fmt::Display;

pub trait Similarity: Display + Send + Sync {
    /// Encodes the normalization factor of a field, stored as one byte per
    /// document in the segment's norms.
    fn compute_norm(&self, state: &FieldInvertState) -> u8;

    /// Compute any collection-level weight (e.g. IDF, average document length, etc)
    /// needed for scoring a query.
    fn compute_weight(
        &self,
        collection_stats: &CollectionStatistics,
        term_stats: &[TermStatistics],
        boost: f32,
    ) -> Box<dyn SimWeight>;

    /// Creates the per segment scorer of `weight`.
    fn sim_scorer(
        &self,
        weight: &dyn SimWeight,
        leaf: &dyn LeafReader,
    ) -> Result<Box<dyn SimScorer>> {
        weight.sim_scorer(leaf)
    }

    /// Computes the normalization value for a query given the sum of the
    /// `SimWeight::value_for_normalization` of each of the query terms.
    ///
    /// Disabled (returns 1) unless a model wants scores of different queries
    /// to be comparable.
    fn query_norm(&self, _value_for_normalization: f32) -> f32 {
        1.0f32
    }
}

/// Scores the documents of one segment.
///
/// Frequencies given to `score` are floating-point values: an approximate
/// within-document frequency adjusted for "sloppiness" by
/// `compute_slop_factor`.
pub trait SimScorer: Send {
    /// Score a single document with a sloppy frequency.
    fn score(&mut self, doc: DocId, freq: f32) -> Result<f32>;

    /// Score a single document with an exact term or phrase frequency.
    fn score_exact(&mut self, doc: DocId, freq: i32) -> Result<f32> {
        self.score(doc, freq as f32)
    }

    /// Computes the amount of a sloppy phrase match, based on an edit distance.
    fn compute_slop_factor(&self, distance: i32) -> f32 {
        1.0 / (distance as f32 + 1.0)
    }

    /// Calculate a scoring factor based on the data in the payload.
    fn compute_payload_factor(&self, _doc: DocId, _start: i32, _end: i32, _payload: &[u8]) -> f32 {
        1.0
    }
}

/// Stores the weight for a query across the indexed collection.
pub trait SimWeight: Send + Sync {
    /// The value for normalization of contained query clauses (e.g. sum of squared weights).
    fn value_for_normalization(&self) -> f32;

    fn normalize(&mut self, query_norm: f32, boost: f32);

    fn sim_scorer(&self, leaf: &dyn LeafReader) -> Result<Box<dyn SimScorer>>;

    /// Explain the score for a single document
    fn explain(&self, leaf: &dyn LeafReader, doc: DocId, freq: Explanation) -> Result<Explanation> {
        Ok(Explanation::new(
            true,
            self.sim_scorer(leaf)?.score(doc, freq.value())?,
            format!("score(doc={},freq={}), with freq of:", doc, freq.value()),
            vec![freq],
        ))
    }
}
