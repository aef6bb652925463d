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

/// Contains statistics for a collection (field)
#[derive(Clone, Debug, Serialize)]
pub struct CollectionStatistics {
    pub field: String,
    pub max_doc: i64,
    /// Docs with at least one term for the field, or -1 if unknown.
    pub doc_count: i64,
    /// -1 when the field omits term frequencies.
    pub sum_total_term_freq: i64,
    pub sum_doc_freq: i64,
}

impl CollectionStatistics {
    pub fn new(
        field: String,
        max_doc: i64,
        doc_count: i64,
        sum_total_term_freq: i64,
        sum_doc_freq: i64,
    ) -> CollectionStatistics {
        debug_assert!(max_doc >= 0);
        debug_assert!(doc_count >= -1 && doc_count <= max_doc);
        debug_assert!(sum_doc_freq == -1 || sum_doc_freq >= doc_count);
        CollectionStatistics {
            field,
            max_doc,
            doc_count,
            sum_total_term_freq,
            sum_doc_freq,
        }
    }

    /// Statistics for a field no leaf knows about.
    pub fn empty(field: String, max_doc: i64) -> CollectionStatistics {
        CollectionStatistics::new(field, max_doc, 0, 0, 0)
    }

    /// Sums the statistics of two leaves, keeping -1 (unknown) sticky.
    pub fn merge(&mut self, doc_count: i64, sum_total_term_freq: i64, sum_doc_freq: i64) {
        self.doc_count = add_known(self.doc_count, doc_count);
        self.sum_total_term_freq = add_known(self.sum_total_term_freq, sum_total_term_freq);
        self.sum_doc_freq = add_known(self.sum_doc_freq, sum_doc_freq);
    }
}

fn add_known(a: i64, b: i64) -> i64 {
    if a < 0 || b < 0 {
        -1
    } else {
        a + b
    }
}

/// Contains statistics for a specific term
#[derive(Clone, Debug, Serialize)]
pub struct TermStatistics {
    pub term: Vec<u8>,
    pub doc_freq: i64,
    pub total_term_freq: i64,
}

impl TermStatistics {
    pub fn new(term: Vec<u8>, doc_freq: i64, total_term_freq: i64) -> TermStatistics {
        debug_assert!(doc_freq >= 0);
        debug_assert!(total_term_freq == -1 || total_term_freq >= doc_freq);
        TermStatistics {
            term,
            doc_freq,
            total_term_freq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_statistics() {
        let mut stats = CollectionStatistics::new(String::from("hello"), 10, 5, 4, 7);
        assert_eq!(stats.field, "hello");
        assert_eq!(stats.max_doc, 10);
        assert_eq!(stats.doc_count, 5);
        assert_eq!(stats.sum_total_term_freq, 4);
        assert_eq!(stats.sum_doc_freq, 7);

        stats.merge(2, -1, 3);
        assert_eq!(stats.doc_count, 7);
        assert_eq!(stats.sum_total_term_freq, -1);
        assert_eq!(stats.sum_doc_freq, 10);
    }

    #[test]
    fn test_term_statistics() {
        let term_statistics = TermStatistics::new(vec![1], 1, 1);
        assert_eq!(term_statistics.term[0], 1);
        assert_eq!(term_statistics.doc_freq, 1);
        assert_eq!(term_statistics.total_term_freq, 1);
    }
}
