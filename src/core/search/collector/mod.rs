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

mod top_docs;

pub use self::top_docs::*;

mod top_field;

pub use self::top_field::*;

mod early_terminating;

pub use self::early_terminating::*;

mod timeout;

pub use self::timeout::*;

mod chain;

pub use self::chain::*;

use crate::core::index::reader::LeafReaderContext;
use crate::core::search::scorer::Scorer;
use crate::core::util::DocId;
use crate::error::{self, Result};

error_chain! {
    types {
        Error, ErrorKind, ResultExt;
    }
    errors {
        LeafCollectionTerminated {
            description("Leaf collection terminated")
        }
        CollectionTerminated {
            description("Collection terminated")
        }
        CollectionTimeout {
            description("Collection timeout")
        }

        CollectionFailed {
            description("Collection failed")
        }
    }
}

/// How the searcher reacts to an error raised while collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStop {
    /// Skip the rest of the current leaf.
    Leaf,
    /// Skip every remaining leaf, results so far are kept.
    All,
}

/// Classifies the early termination signals of collectors, `None` for real
/// failures.
pub fn collection_stop(err: &error::Error) -> Option<CollectionStop> {
    match err.kind() {
        error::ErrorKind::Collector(ErrorKind::LeafCollectionTerminated) => {
            Some(CollectionStop::Leaf)
        }
        error::ErrorKind::Collector(ErrorKind::CollectionTerminated)
        | error::ErrorKind::Collector(ErrorKind::CollectionTimeout) => Some(CollectionStop::All),
        _ => None,
    }
}

/// A collector driven by `IndexSearcher`, told about every leaf before the
/// leaf's docs are collected.
pub trait SearchCollector: Collector {
    /// This method is called before collecting on a new leaf.
    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()>;

    /// Called once after the last leaf, even when collection stopped early.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<'a, T: SearchCollector + ?Sized + 'a> SearchCollector for &'a mut T {
    fn set_next_reader(&mut self, reader: &LeafReaderContext) -> Result<()> {
        (**self).set_next_reader(reader)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

pub trait Collector {
    /// Indicates if document scores are needed by this collector.
    /// return `true` if scores are needed.
    fn needs_scores(&self) -> bool;

    /// Called once for every document matching a query, with the unbased document
    /// number.
    /// Note: The collection of the current segment can be terminated by throwing
    /// a `ErrorKind::LeafCollectionTerminated`. In this case, the last docs of the
    /// current `LeafReader` will be skipped and `IndexSearcher`
    /// will swallow the exception and continue collection with the next leaf.
    ///
    /// Note: This is called in an inner search loop. For good search performance,
    /// implementations of this method should not load stored fields of every
    /// hit.
    fn collect(&mut self, doc: DocId, scorer: &mut dyn Scorer) -> Result<()>;
}

impl<'a, T: Collector + ?Sized + 'a> Collector for &'a mut T {
    fn needs_scores(&self) -> bool {
        (**self).needs_scores()
    }

    fn collect(&mut self, doc: DocId, scorer: &mut dyn Scorer) -> Result<()> {
        (**self).collect(doc, scorer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_stop() {
        let leaf: error::Error =
            error::ErrorKind::Collector(ErrorKind::LeafCollectionTerminated).into();
        assert_eq!(collection_stop(&leaf), Some(CollectionStop::Leaf));

        let all: error::Error = error::ErrorKind::Collector(ErrorKind::CollectionTimeout).into();
        assert_eq!(collection_stop(&all), Some(CollectionStop::All));

        let failed: error::Error = error::ErrorKind::Collector(ErrorKind::CollectionFailed).into();
        assert_eq!(collection_stop(&failed), None);

        let other: error::Error = error::ErrorKind::IllegalState("x".into()).into();
        assert_eq!(collection_stop(&other), None);
    }
}
