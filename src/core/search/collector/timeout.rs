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

use std::time::{Duration, Instant};

/// Wraps a collector and stops the whole search once the time budget is
/// spent. Hits collected before that are kept.
pub struct TimeoutCollector<C: SearchCollector> {
    timeout_duration: Duration,
    start_time: Instant,
    pub timeout: bool,
    collector: C,
}

impl<C: SearchCollector> TimeoutCollector<C> {
    pub fn new(timeout_duration: Duration, start_time: Instant, collector: C) -> Self {
        TimeoutCollector {
            timeout_duration,
            start_time,
            timeout: false,
            collector,
        }
    }

    pub fn inner(&mut self) -> &mut C {
        &mut self.collector
    }

    fn check_timeout(&mut self) -> Result<()> {
        if self.start_time.elapsed() >= self.timeout_duration {
            self.timeout = true;
            bail!(ErrorKind::Collector(collector::ErrorKind::CollectionTimeout))
        }
        Ok(())
    }
}

impl<C: SearchCollector> SearchCollector for TimeoutCollector<C> {
    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
        self.check_timeout()?;
        self.collector.set_next_reader(reader)
    }

    fn finish(&mut self) -> Result<()> {
        self.collector.finish()
    }
}

impl<C: SearchCollector> Collector for TimeoutCollector<C> {
    fn needs_scores(&self) -> bool {
        self.collector.needs_scores()
    }

    fn collect(&mut self, doc: DocId, scorer: &mut dyn Scorer) -> Result<()> {
        self.check_timeout()?;
        self.collector.collect(doc, scorer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::collector::{collection_stop, CollectionStop, TopDocsCollector};
    use crate::core::search::tests::*;
    use crate::core::search::DocIterator;

    #[test]
    fn test_timeout() {
        let mut scorer = create_mock_scorer(vec![1, 2]);
        scorer.next().unwrap();

        let mut collector = TimeoutCollector::new(
            Duration::from_secs(3600),
            Instant::now(),
            TopDocsCollector::new(2),
        );
        collector.collect(1, &mut scorer).unwrap();
        assert!(!collector.timeout);

        let mut expired =
            TimeoutCollector::new(Duration::from_secs(0), Instant::now(), TopDocsCollector::new(2));
        let err = expired.collect(1, &mut scorer).unwrap_err();
        assert_eq!(collection_stop(&err), Some(CollectionStop::All));
        assert!(expired.timeout);
        assert_eq!(expired.inner().total_hits(), 0);
        assert_eq!(collector.inner().total_hits(), 1);
    }
}
