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

use std::any::Any;
use std::fmt;

use crate::core::index::reader::LeafReaderContext;
use crate::core::index::Term;
use crate::core::search::explanation::Explanation;
use crate::core::search::query::{boost_suffix, Query, Weight};
use crate::core::search::scorer::{MatchAllScorer, Scorer};
use crate::core::search::searcher::IndexSearcher;
use crate::core::util::{is_live, DocId};
use crate::error::Result;

pub const MATCH_ALL: &str = "match_all";

/// A query that matches all live documents, each with the query's boost as
/// its score.
#[derive(Clone, Debug)]
pub struct MatchAllDocsQuery {
    boost: f32,
}

impl Default for MatchAllDocsQuery {
    fn default() -> Self {
        MatchAllDocsQuery::new()
    }
}

impl MatchAllDocsQuery {
    pub fn new() -> MatchAllDocsQuery {
        MatchAllDocsQuery { boost: 1.0 }
    }
}

impl Query for MatchAllDocsQuery {
    fn create_weight(
        &self,
        _searcher: &IndexSearcher,
        needs_scores: bool,
    ) -> Result<Box<dyn Weight>> {
        Ok(Box::new(MatchAllDocsWeight {
            boost: self.boost,
            query_norm: 1.0,
            score: self.boost,
            needs_scores,
        }))
    }

    fn extract_terms(&self) -> Vec<Term> {
        vec![]
    }

    fn boost(&self) -> f32 {
        self.boost
    }

    fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    fn query_type(&self) -> &'static str {
        MATCH_ALL
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for MatchAllDocsQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "*:*{}", boost_suffix(self.boost))
    }
}

struct MatchAllDocsWeight {
    boost: f32,
    query_norm: f32,
    score: f32,
    needs_scores: bool,
}

impl Weight for MatchAllDocsWeight {
    fn create_scorer(&self, leaf: &LeafReaderContext) -> Result<Option<Box<dyn Scorer>>> {
        let max_doc = leaf.reader.max_doc();
        Ok(Some(Box::new(MatchAllScorer::new(
            self.score,
            max_doc,
            leaf.reader.live_docs(),
        ))))
    }

    fn query_type(&self) -> &'static str {
        MATCH_ALL
    }

    fn normalize(&mut self, norm: f32, boost: f32) {
        self.query_norm = norm * boost;
        self.score = self.boost * self.query_norm;
    }

    fn value_for_normalization(&self) -> f32 {
        self.boost * self.boost
    }

    fn needs_scores(&self) -> bool {
        self.needs_scores
    }

    fn explain(&self, leaf: &LeafReaderContext, doc: DocId) -> Result<Explanation> {
        let live_docs = leaf.reader.live_docs();
        if doc < 0 || doc >= leaf.reader.max_doc() || !is_live(live_docs.as_ref(), doc as usize)? {
            return Ok(Explanation::no_match(format!("doc {} is deleted", doc)));
        }
        Ok(Explanation::new(
            true,
            self.score,
            "MatchAllDocsQuery, product of:".to_string(),
            vec![
                Explanation::new(true, self.boost, "boost".to_string(), vec![]),
                Explanation::new(true, self.query_norm, "queryNorm".to_string(), vec![]),
            ],
        ))
    }
}

impl fmt::Display for MatchAllDocsWeight {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "MatchAllDocsWeight(boost: {}, score: {})",
            self.boost, self.score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::tests::{build_index, new_directory};
    use crate::core::index::reader::StandardDirectoryReader;
    use crate::core::search::query::tests::matches;
    use std::sync::Arc;

    #[test]
    fn test_match_all_skips_deletions() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b", "c", "d"], 2);
        writer.delete_documents(&[Term::from_str("id", "1")]).unwrap();
        writer.commit().unwrap();
        writer.close().unwrap();

        let reader = StandardDirectoryReader::open(dir).unwrap();
        let searcher = IndexSearcher::new(Arc::new(reader));
        let mut query = MatchAllDocsQuery::new();
        query.set_boost(2.0);
        let hits = matches(&searcher, &query);
        let docs: Vec<DocId> = hits.iter().map(|h| h.0).collect();
        assert_eq!(docs, vec![0, 2, 3]);
        assert!(hits.iter().all(|h| (h.1 - 2.0).abs() < ::std::f32::EPSILON));

        assert!(searcher.explain(&query, 0).unwrap().is_match());
        assert!(!searcher.explain(&query, 1).unwrap().is_match());
        assert_eq!(query.to_string(), "*:*^2");
    }
}
