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

//! BM25 Similarity. Introduced in Stephen E. Robertson, Steve Walker,
//! Susan Jones, Micheline Hancock-Beaulieu, and Mike Gatford. Okapi at TREC-3.
//! In Proceedings of the Third *T*ext *RE*trieval *C*onference (TREC 1994).
//! Gaithersburg, USA, November 1994.

use crate::core::codec::field_infos::FieldInvertState;
use crate::core::codec::norms::NormValues;
use crate::core::index::reader::LeafReader;
use crate::core::search::explanation::Explanation;
use crate::core::search::similarity::{SimScorer, SimWeight, Similarity};
use crate::core::search::statistics::{CollectionStatistics, TermStatistics};
use crate::core::util::small_float::SmallFloat;
use crate::core::util::DocId;
use crate::error::Result;

use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref NORM_TABLE: [f32; 256] = {
        let mut norm_table: [f32; 256] = [0f32; 256];
        for (i, norm) in norm_table.iter_mut().enumerate().skip(1) {
            let f = SmallFloat::byte315_to_float(i as u8);
            *norm = 1f32 / (f * f);
        }
        norm_table[0] = 1f32 / norm_table[255];
        norm_table
    };
}

pub const DEFAULT_BM25_K1: f32 = 1.2;
pub const DEFAULT_BM25_B: f32 = 0.75;

/// BM25 Similarity.
pub struct BM25Similarity {
    k1: f32,
    b: f32,
    /// Whether overlap tokens (position increment of zero) count towards the
    /// field length.
    discount_overlaps: bool,
}

impl Default for BM25Similarity {
    fn default() -> Self {
        BM25Similarity::new(DEFAULT_BM25_K1, DEFAULT_BM25_B)
    }
}

impl BM25Similarity {
    pub fn new(k1: f32, b: f32) -> BM25Similarity {
        BM25Similarity {
            k1,
            b,
            discount_overlaps: true,
        }
    }

    pub fn k1(&self) -> f32 {
        self.k1
    }

    pub fn b(&self) -> f32 {
        self.b
    }

    pub fn set_discount_overlaps(&mut self, discount_overlaps: bool) {
        self.discount_overlaps = discount_overlaps;
    }

    /// The average field length is sumTotalTermFreq / docCount, or 1 when
    /// the field does not store sumTotalTermFreq (it omits frequencies).
    fn avg_field_length(collection_stats: &CollectionStatistics) -> f32 {
        let sum_total_term_freq = collection_stats.sum_total_term_freq;
        if sum_total_term_freq <= 0 {
            1f32
        } else {
            let mut doc_count = collection_stats.doc_count;
            if doc_count == -1 {
                doc_count = collection_stats.max_doc;
            };
            (sum_total_term_freq as f64 / doc_count as f64) as f32
        }
    }

    pub fn encode_norm_value(boost: f32, field_length: i32) -> u8 {
        SmallFloat::float_to_byte315(boost / (field_length as f32).sqrt())
    }

    /// Decodes a norm byte back to an (approximate) field length.
    #[inline]
    pub fn decode_norm_value(b: u8) -> f32 {
        NORM_TABLE[b as usize]
    }

    fn doc_count(collection_stats: &CollectionStatistics) -> i64 {
        if collection_stats.doc_count == -1 {
            collection_stats.max_doc
        } else {
            collection_stats.doc_count
        }
    }

    fn term_idf(doc_freq: i64, doc_count: i64) -> f32 {
        (1.0 + (doc_count as f64 - doc_freq as f64 + 0.5) / (doc_freq as f64 + 0.5)).ln() as f32
    }

    fn idf(term_stats: &[TermStatistics], collection_stats: &CollectionStatistics) -> f32 {
        let doc_count = Self::doc_count(collection_stats);
        term_stats
            .iter()
            .map(|stat| Self::term_idf(stat.doc_freq, doc_count))
            .sum()
    }

    fn idf_explain(
        collection_stats: &CollectionStatistics,
        term_stats: &[TermStatistics],
    ) -> Explanation {
        let doc_count = Self::doc_count(collection_stats);
        let mut idf_total = 0f32;
        let mut details: Vec<Explanation> = vec![];
        for stat in term_stats {
            let idf = Self::term_idf(stat.doc_freq, doc_count);
            idf_total += idf;
            details.push(Explanation::new(
                true,
                idf,
                "idf, computed as log(1 + (docCount - docFreq + 0.5) / (docFreq + 0.5)) from:"
                    .to_string(),
                vec![
                    Explanation::new(true, stat.doc_freq as f32, "docFreq".to_string(), vec![]),
                    Explanation::new(true, doc_count as f32, "docCount".to_string(), vec![]),
                ],
            ))
        }

        if details.len() == 1 {
            return details.remove(0);
        }
        Explanation::new(true, idf_total, "idf(), sum of:".to_string(), details)
    }
}

impl Similarity for BM25Similarity {
    fn compute_norm(&self, state: &FieldInvertState) -> u8 {
        let num_terms = if self.discount_overlaps {
            state.length - state.num_overlap
        } else {
            state.length
        };
        BM25Similarity::encode_norm_value(state.boost, num_terms)
    }

    fn compute_weight(
        &self,
        collection_stats: &CollectionStatistics,
        term_stats: &[TermStatistics],
        boost: f32,
    ) -> Box<dyn SimWeight> {
        let avgdl = BM25Similarity::avg_field_length(collection_stats);
        let idf = BM25Similarity::idf(term_stats, collection_stats);
        let mut cache: [f32; 256] = [0f32; 256];
        for (i, c) in cache.iter_mut().enumerate() {
            *c = self.k1
                * ((1.0 - self.b) + self.b * (BM25Similarity::decode_norm_value(i as u8) / avgdl));
        }

        Box::new(BM25SimWeight::new(
            self.k1,
            self.b,
            idf,
            collection_stats.field.clone(),
            cache,
            BM25Similarity::idf_explain(collection_stats, term_stats),
            avgdl,
            boost,
        ))
    }
}

impl fmt::Display for BM25Similarity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BM25(k1={},b={})", self.k1, self.b)
    }
}

struct BM25SimScorer {
    k1: f32,
    weight: f32,
    cache: Arc<[f32; 256]>,
    norms: Option<Arc<NormValues>>,
}

impl BM25SimScorer {
    fn new(weight: &BM25SimWeight, norms: Option<Arc<NormValues>>) -> BM25SimScorer {
        BM25SimScorer {
            k1: weight.k1,
            weight: weight.weight,
            cache: Arc::clone(&weight.cache),
            norms,
        }
    }
}

impl SimScorer for BM25SimScorer {
    fn score(&mut self, doc: DocId, freq: f32) -> Result<f32> {
        let norm = match self.norms {
            Some(ref norms) => self.cache[norms.get(doc) as usize],
            None => self.k1,
        };

        Ok(self.weight * (self.k1 + 1.0) * freq / (freq + norm))
    }
}

struct BM25SimWeight {
    k1: f32,
    b: f32,
    idf: f32,
    field: String,
    cache: Arc<[f32; 256]>,
    boost: f32,
    weight: f32,
    idf_explanation: Explanation,
    avg_dl: f32,
}

impl BM25SimWeight {
    #[allow(clippy::too_many_arguments)]
    fn new(
        k1: f32,
        b: f32,
        idf: f32,
        field: String,
        cache: [f32; 256],
        idf_explanation: Explanation,
        avg_dl: f32,
        boost: f32,
    ) -> BM25SimWeight {
        let mut weight = BM25SimWeight {
            k1,
            b,
            idf,
            field,
            cache: Arc::new(cache),
            boost: 1.0,
            weight: 0.0,
            idf_explanation,
            avg_dl,
        };
        weight.do_normalize(boost);
        weight
    }

    fn explain_tf_norm(
        &self,
        doc: DocId,
        freq: Explanation,
        norms: Option<Arc<NormValues>>,
    ) -> Explanation {
        let freq_value = freq.value();
        let mut subs = vec![
            freq,
            Explanation::new(true, self.k1, "parameter k1".to_string(), vec![]),
        ];

        match norms {
            Some(n) => {
                let doc_len = BM25Similarity::decode_norm_value(n.get(doc));
                subs.push(Explanation::new(
                    true,
                    self.b,
                    "parameter b".to_string(),
                    vec![],
                ));
                subs.push(Explanation::new(
                    true,
                    self.avg_dl,
                    "avgFieldLength".to_string(),
                    vec![],
                ));
                subs.push(Explanation::new(
                    true,
                    doc_len,
                    "fieldLength".to_string(),
                    vec![],
                ));

                Explanation::new(
                    true,
                    (freq_value * (self.k1 + 1.0f32))
                        / (freq_value
                            + self.k1 * (1.0f32 - self.b + self.b * doc_len / self.avg_dl)),
                    "tfNorm, computed as (freq * (k1 + 1)) / (freq + k1 * (1 - b + b * \
                     fieldLength / avgFieldLength)) from:"
                        .to_string(),
                    subs,
                )
            }
            None => {
                subs.push(Explanation::new(
                    true,
                    0.0f32,
                    "parameter b (norms omitted for field)".to_string(),
                    vec![],
                ));

                Explanation::new(
                    true,
                    (freq_value * (self.k1 + 1.0f32)) / (freq_value + self.k1),
                    "tfNorm, computed as (freq * (k1 + 1)) / (freq + k1) from:".to_string(),
                    subs,
                )
            }
        }
    }

    fn explain_score(
        &self,
        doc: DocId,
        freq: Explanation,
        norms: Option<Arc<NormValues>>,
    ) -> Explanation {
        let mut subs: Vec<Explanation> = vec![];

        if (self.boost - 1.0).abs() > ::std::f32::EPSILON {
            subs.push(Explanation::new(
                true,
                self.boost,
                "boost".to_string(),
                vec![],
            ));
        }

        subs.push(self.idf_explanation.clone());

        let freq_value = freq.value();
        let tf_explanation = self.explain_tf_norm(doc, freq, norms);
        let tf_value = tf_explanation.value();
        subs.push(tf_explanation);

        Explanation::new(
            true,
            self.boost * self.idf * tf_value,
            format!("score(doc={},freq={}), product of:", doc, freq_value),
            subs,
        )
    }

    fn do_normalize(&mut self, boost: f32) {
        self.boost = boost;
        self.weight = self.idf * boost;
    }
}

impl SimWeight for BM25SimWeight {
    fn value_for_normalization(&self) -> f32 {
        // we return a TF-IDF like normalization to be nice, but we don't
        // actually normalize ourselves.
        self.weight * self.weight
    }

    fn normalize(&mut self, _query_norm: f32, boost: f32) {
        self.do_normalize(boost)
    }

    fn sim_scorer(&self, leaf: &dyn LeafReader) -> Result<Box<dyn SimScorer>> {
        let norms = leaf.norm_values(&self.field)?;
        Ok(Box::new(BM25SimScorer::new(self, norms)))
    }

    fn explain(&self, leaf: &dyn LeafReader, doc: DocId, freq: Explanation) -> Result<Explanation> {
        let norms = leaf.norm_values(&self.field)?;
        Ok(self.explain_score(doc, freq, norms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::reader::{IndexReader, StandardDirectoryReader};
    use crate::core::index::tests::*;

    #[test]
    fn test_sane_norm_values() {
        for i in 0..256 {
            let len = BM25Similarity::decode_norm_value(i as u8);
            assert!(len >= 0f32);
            assert!(!len.is_nan());
            assert!(!len.is_infinite());
            if i > 0 {
                assert!(len < BM25Similarity::decode_norm_value((i - 1) as u8));
            }
        }
    }

    #[test]
    fn test_idf() {
        let collection_stats = CollectionStatistics::new(String::from("world"), 11, -1, 0, 0);
        let term_stats = vec![TermStatistics::new(Vec::new(), 1, -1)];
        assert!(
            (BM25Similarity::idf(&term_stats, &collection_stats) - (8f32).ln()).abs()
                < 1e-6
        );

        let collection_stats = CollectionStatistics::new(String::from("world"), 35, 32, -1, -1);
        let term_stats = vec![TermStatistics::new(Vec::new(), 1, -1)];
        assert!(
            (BM25Similarity::idf(&term_stats, &collection_stats) - (22f32).ln()).abs()
                < 1e-6
        );
    }

    #[test]
    fn test_avg_field_length() {
        let collection_stats = CollectionStatistics::new(String::from("world"), 11, 5, 0, -1);
        assert!((BM25Similarity::avg_field_length(&collection_stats) - 1f32).abs() < 1e-6);

        let collection_stats = CollectionStatistics::new(String::from("world"), 3, 2, 8, -1);
        assert!((BM25Similarity::avg_field_length(&collection_stats) - 4f32).abs() < 1e-6);

        let collection_stats = CollectionStatistics::new(String::from("world"), 3, -1, 9, -1);
        assert!((BM25Similarity::avg_field_length(&collection_stats) - 3f32).abs() < 1e-6);
    }

    #[test]
    fn test_compute_norm() {
        let sim = BM25Similarity::default();
        let mut state = FieldInvertState::new("body".to_string());
        state.length = 4;
        state.num_overlap = 1;
        let norm = sim.compute_norm(&state);
        assert_eq!(norm, BM25Similarity::encode_norm_value(state.boost, 3));
        // longer fields get smaller norms
        state.length = 40;
        assert!(sim.compute_norm(&state) < norm);
    }

    #[test]
    fn test_bm25_similarity() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a b", "a b c d e f g h"], 2);
        writer.close().unwrap();
        let reader = StandardDirectoryReader::open(dir).unwrap();
        let leaves = reader.leaves();

        let collection_stats = CollectionStatistics::new(String::from("body"), 2, 2, 10, 10);
        let term_stats = vec![TermStatistics::new(b"a".to_vec(), 2, 2)];
        let bm25_sim = BM25Similarity::new(1.2, 0.75);
        let sim_weight = bm25_sim.compute_weight(&collection_stats, &term_stats, 1.0f32);
        let idf = (1.0f32 + 0.5 / 2.5).ln();
        assert!((sim_weight.value_for_normalization() - idf * idf).abs() < 1e-6);

        let mut sim_scorer = sim_weight.sim_scorer(leaves[0].reader.as_ref()).unwrap();

        // same field length
        let score1 = sim_scorer.score(0, 3.0).unwrap();
        let score2 = sim_scorer.score(0, 1.0).unwrap();
        assert!(score1 > score2);

        // same term freq, shorter field scores higher
        let score1 = sim_scorer.score_exact(0, 1).unwrap();
        let score2 = sim_scorer.score_exact(1, 1).unwrap();
        assert!(score1 > score2);

        let expl = sim_weight
            .explain(
                leaves[0].reader.as_ref(),
                0,
                Explanation::new(true, 1.0, "termFreq=1".to_string(), vec![]),
            )
            .unwrap();
        assert!((expl.value() - score1).abs() < 1e-5);
        assert!((sim_scorer.compute_slop_factor(1) - 0.5).abs() < 1e-6);
    }
}
