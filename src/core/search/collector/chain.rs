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
use crate::core::search::collector::{Collector, SearchCollector};
use crate::core::search::scorer::Scorer;
use crate::core::util::DocId;
use crate::error::Result;

/// Feeds every hit to several collectors in order.
///
/// A termination raised by one collector stops the whole chain for the
/// leaf, so later collectors see a prefix of the hits.
pub struct ChainedCollector<'a> {
    collectors: Vec<&'a mut dyn SearchCollector>,
}

impl<'a> ChainedCollector<'a> {
    pub fn new(collectors: Vec<&'a mut dyn SearchCollector>) -> ChainedCollector<'a> {
        ChainedCollector { collectors }
    }
}

impl<'a> SearchCollector for ChainedCollector<'a> {
    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
        for collector in &mut self.collectors {
            collector.set_next_reader(reader)?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for collector in &mut self.collectors {
            collector.finish()?;
        }
        Ok(())
    }
}

impl<'a> Collector for ChainedCollector<'a> {
    fn needs_scores(&self) -> bool {
        self.collectors.iter().any(|it| it.needs_scores())
    }

    fn collect(&mut self, doc: DocId, scorer: &mut dyn Scorer) -> Result<()> {
        for collector in &mut self.collectors {
            collector.collect(doc, scorer)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::collector::{EarlyTerminatingSortingCollector, TopDocsCollector};
    use crate::core::search::tests::*;
    use crate::core::search::DocIterator;

    #[test]
    fn test_chain() {
        let mut top = TopDocsCollector::new(10);
        let mut early = EarlyTerminatingSortingCollector::new(2);
        {
            let mut chain = ChainedCollector::new(vec![
                &mut top as &mut dyn SearchCollector,
                &mut early as &mut dyn SearchCollector,
            ]);
            assert!(chain.needs_scores());

            let mut scorer = create_mock_scorer(vec![1, 2, 3]);
            let doc = scorer.next().unwrap();
            chain.collect(doc, &mut scorer).unwrap();
            let doc = scorer.next().unwrap();
            assert!(chain.collect(doc, &mut scorer).is_err());
        }
        assert!(early.early_terminated);
        assert_eq!(top.total_hits(), 2);
    }
}
