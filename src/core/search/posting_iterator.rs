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

use crate::core::search::{DocIterator, Payload, NO_MORE_DOCS};
use crate::core::util::DocId;
use crate::error::Result;

pub struct PostingIteratorFlags;

/// Flag constants for `TermIterator::postings`.
impl PostingIteratorFlags {
    /// Only doc ids are required.
    pub const NONE: u16 = 0;

    /// Term frequencies are required.
    pub const FREQS: u16 = 1 << 3;

    /// Term positions are required.
    pub const POSITIONS: u16 = Self::FREQS | 1 << 4;

    /// Offsets are required.
    pub const OFFSETS: u16 = Self::POSITIONS | 1 << 5;

    /// Payloads are required.
    pub const PAYLOADS: u16 = Self::POSITIONS | 1 << 6;

    /// Positions, payloads and offsets are all required.
    pub const ALL: u16 = Self::OFFSETS | Self::PAYLOADS;

    pub fn feature_requested(flags: u16, feature: u16) -> bool {
        (flags & feature) == feature
    }
}

/// Iterates through the postings of one term.
///
/// NOTE: you must first call `next()` before using any of the per-doc
/// methods.
pub trait PostingIterator: DocIterator {
    /// Returns term frequency in the current document, or 1 if the field was
    /// indexed with `IndexOptions::Docs`. Do not call this before `next()`
    /// is first called, nor after `next()` returns `NO_MORE_DOCS`.
    ///
    /// *NOTE:* if the iterator was obtained with `PostingIteratorFlags::NONE`,
    /// the result of this method is undefined.
    fn freq(&self) -> Result<i32>;

    /// Returns the next position, or -1 if positions were not indexed.
    /// Calling this more than `freq()` times is undefined.
    fn next_position(&mut self) -> Result<i32>;

    /// Returns start offset for the current position, or -1 if offsets were
    /// not indexed.
    fn start_offset(&self) -> Result<i32>;

    /// Returns end offset for the current position, or -1 if offsets were
    /// not indexed.
    fn end_offset(&self) -> Result<i32>;

    /// Returns the payload at this position, empty if no payload was
    /// indexed.
    fn payload(&self) -> Result<Payload>;
}

/// a `PostingIterator` that no matching docs are available.
#[derive(Clone)]
pub struct EmptyPostingIterator {
    doc_id: DocId,
}

impl Default for EmptyPostingIterator {
    fn default() -> Self {
        EmptyPostingIterator { doc_id: -1 }
    }
}

impl DocIterator for EmptyPostingIterator {
    fn doc_id(&self) -> DocId {
        self.doc_id
    }

    fn next(&mut self) -> Result<DocId> {
        self.doc_id = NO_MORE_DOCS;
        Ok(NO_MORE_DOCS)
    }

    fn advance(&mut self, _target: DocId) -> Result<DocId> {
        self.doc_id = NO_MORE_DOCS;
        Ok(NO_MORE_DOCS)
    }

    fn cost(&self) -> usize {
        0usize
    }
}

impl PostingIterator for EmptyPostingIterator {
    fn freq(&self) -> Result<i32> {
        Ok(0)
    }

    fn next_position(&mut self) -> Result<i32> {
        Ok(-1)
    }

    fn start_offset(&self) -> Result<i32> {
        Ok(-1)
    }

    fn end_offset(&self) -> Result<i32> {
        Ok(-1)
    }

    fn payload(&self) -> Result<Payload> {
        Ok(Payload::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = PostingIteratorFlags::PAYLOADS;
        assert!(PostingIteratorFlags::feature_requested(flags, PostingIteratorFlags::POSITIONS));
        assert!(PostingIteratorFlags::feature_requested(flags, PostingIteratorFlags::FREQS));
        assert!(!PostingIteratorFlags::feature_requested(flags, PostingIteratorFlags::OFFSETS));
        assert!(PostingIteratorFlags::feature_requested(
            PostingIteratorFlags::ALL,
            PostingIteratorFlags::OFFSETS
        ));
    }

    #[test]
    fn test_empty_posting_iterator() {
        let mut iter = EmptyPostingIterator::default();
        assert_eq!(iter.doc_id(), -1);
        assert_eq!(iter.next().unwrap(), NO_MORE_DOCS);
        assert_eq!(iter.freq().unwrap(), 0);
    }
}
