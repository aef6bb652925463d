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

use crate::core::index::reader::LeafReaderContext;
use crate::core::search::collector::{self, Collector, SearchCollector};
use crate::core::search::scorer::Scorer;
use crate::core::util::DocId;
use crate::error::{ErrorKind, Result};

/// Stops collecting a leaf after a fixed number of hits.
///
/// Meant to be chained after a collector sorting by index order (or by the
/// order the segments were sorted in), where the first hits of every leaf
/// are the only competitive ones.
pub struct EarlyTerminatingSortingCollector {
    pub early_terminated: bool,
    num_docs_to_collect_per_reader: usize,
    num_docs_collected_per_reader: usize,
}

impl EarlyTerminatingSortingCollector {
    pub fn new(num_docs_to_collect_per_reader: usize) -> EarlyTerminatingSortingCollector {
        assert!(
            num_docs_to_collect_per_reader > 0,
            "num_docs_to_collect_per_reader must always be > 0, got {}",
            num_docs_to_collect_per_reader
        );

        EarlyTerminatingSortingCollector {
            early_terminated: false,
            num_docs_to_collect_per_reader,
            num_docs_collected_per_reader: 0,
        }
    }
}

impl SearchCollector for EarlyTerminatingSortingCollector {
    fn set_next_reader(&mut self, _reader: &LeafReaderContext) -> Result<()> {
        self.num_docs_collected_per_reader = 0;

        Ok(())
    }
}

impl Collector for EarlyTerminatingSortingCollector {
    // NOTE: this collector won't be used alone, so return false will be ok
    fn needs_scores(&self) -> bool {
        false
    }

    fn collect(&mut self, _doc: DocId, _scorer: &mut dyn Scorer) -> Result<()> {
        self.num_docs_collected_per_reader += 1;

        if self.num_docs_collected_per_reader >= self.num_docs_to_collect_per_reader {
            self.early_terminated = true;
            bail!(ErrorKind::Collector(
                collector::ErrorKind::LeafCollectionTerminated,
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::collector::{collection_stop, CollectionStop};
    use crate::core::search::tests::*;
    use crate::core::search::DocIterator;

    #[test]
    fn test_terminates_leaf() {
        let mut collector = EarlyTerminatingSortingCollector::new(2);
        let mut scorer = create_mock_scorer(vec![0, 1, 2]);

        scorer.next().unwrap();
        collector.collect(0, &mut scorer).unwrap();
        assert!(!collector.early_terminated);

        scorer.next().unwrap();
        let err = collector.collect(1, &mut scorer).unwrap_err();
        assert_eq!(collection_stop(&err), Some(CollectionStop::Leaf));
        assert!(collector.early_terminated);
    }
}
