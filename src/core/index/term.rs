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

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::index::reader::LeafReaderContext;
use crate::core::search::posting_iterator::PostingIterator;
use crate::core::store::io::{DataInput, DataOutput};
use crate::core::util::BitsRef;
use crate::error::ErrorKind::{IllegalState, UnsupportedOperation};
use crate::error::Result;

/// A Term represents a word from text. This is the unit of search. It is
/// composed of two elements, the text of the word, as bytes, and the name of
/// the field that the text occurred in.
///
/// Terms order by field name first, then by unsigned byte comparison of the
/// text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Term {
    pub field: String,
    pub bytes: Vec<u8>,
}

impl Term {
    pub fn new(field: String, bytes: Vec<u8>) -> Term {
        Term { field, bytes }
    }

    pub fn from_str(field: &str, text: &str) -> Term {
        Term::new(field.to_string(), text.as_bytes().to_vec())
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the text of this term, lossy when the bytes are not UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.field.is_empty() && self.bytes.is_empty()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.text())
    }
}

/// Position of a term inside one segment's term dictionary, captured so a
/// `TermIterator` can be repositioned without searching the dictionary again.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TermState {
    pub ord: i64,
    pub doc_freq: i32,
    pub total_term_freq: i64,
    pub doc_start_fp: i64,
    pub pos_start_fp: i64,
    /// Offset of the skip table from `doc_start_fp`, -1 when there is none.
    pub skip_offset: i64,
}

impl TermState {
    /// Opaque byte form of this state.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::with_capacity(24);
        // writing to a Vec can not fail
        let _ = out.write_vlong(self.ord);
        let _ = out.write_vint(self.doc_freq);
        let _ = out.write_zlong(self.total_term_freq);
        let _ = out.write_vlong(self.doc_start_fp);
        let _ = out.write_vlong(self.pos_start_fp);
        let _ = out.write_zlong(self.skip_offset);
        out
    }

    pub fn deserialize(mut bytes: &[u8]) -> Result<TermState> {
        let input = &mut bytes;
        Ok(TermState {
            ord: input.read_vlong()?,
            doc_freq: input.read_vint()?,
            total_term_freq: input.read_zlong()?,
            doc_start_fp: input.read_vlong()?,
            pos_start_fp: input.read_vlong()?,
            skip_offset: input.read_zlong()?,
        })
    }
}

/// Represents returned result from `TermIterator::seek_ceil`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStatus {
    /// The term was not found, and the end of iteration was hit.
    End,
    /// The precise term was found.
    Found,
    /// A different term was found after the requested term.
    NotFound,
}

/// Flex API for access to fields and terms.
pub trait Fields: Send + Sync {
    /// Field names, sorted.
    fn fields(&self) -> Vec<String>;

    fn terms(&self, field: &str) -> Result<Option<Arc<dyn Terms>>>;

    fn size(&self) -> usize;
}

/// Access to the terms of one field.
pub trait Terms: Send + Sync {
    /// Returns an iterator that will step through all terms, positioned before
    /// the first one.
    fn iterator(&self) -> Result<Box<dyn TermIterator>>;

    /// Number of unique terms, or -1 if this measure isn't stored.
    fn size(&self) -> Result<i64>;

    /// Sum of `TermIterator::total_term_freq` over all terms, or -1 when
    /// frequencies are omitted.
    fn sum_total_term_freq(&self) -> Result<i64>;

    /// Sum of `TermIterator::doc_freq` over all terms.
    fn sum_doc_freq(&self) -> Result<i64>;

    /// Number of documents that have at least one term for this field.
    fn doc_count(&self) -> Result<i32>;

    fn has_freqs(&self) -> Result<bool>;

    fn has_offsets(&self) -> Result<bool>;

    fn has_positions(&self) -> Result<bool>;

    fn has_payloads(&self) -> Result<bool>;
}

/// Iterator over a sorted term dictionary.
///
/// A fresh iterator is unpositioned: call `next` or one of the seek
/// methods first.
pub trait TermIterator: Send {
    /// Moves to the next term, returns `None` at the end.
    fn next(&mut self) -> Result<Option<Vec<u8>>>;

    /// Attempts to seek to the exact term. A failed seek leaves the iterator
    /// unpositioned.
    fn seek_exact(&mut self, text: &[u8]) -> Result<bool> {
        Ok(self.seek_ceil(text)? == SeekStatus::Found)
    }

    /// Seeks to the specified term if it exists, or to the next (ceiling)
    /// term.
    fn seek_ceil(&mut self, text: &[u8]) -> Result<SeekStatus>;

    /// Seeks to the specified term by ordinal.
    fn seek_exact_ord(&mut self, _ord: i64) -> Result<()> {
        bail!(UnsupportedOperation("seek_exact_ord".into()))
    }

    /// Repositions on `text` using a state taken from `term_state`, without
    /// searching the dictionary.
    fn seek_exact_state(&mut self, text: &[u8], state: &TermState) -> Result<()>;

    fn term(&self) -> Result<&[u8]>;

    /// Ordinal of the current term, when the dictionary supports ords.
    fn ord(&self) -> Result<i64> {
        bail!(UnsupportedOperation("ord".into()))
    }

    fn doc_freq(&mut self) -> Result<i32>;

    /// Total occurrences of the current term, -1 when the field omits
    /// frequencies.
    fn total_term_freq(&mut self) -> Result<i64>;

    fn postings(&mut self, flags: u16) -> Result<Box<dyn PostingIterator>> {
        self.postings_with_live_docs(None, flags)
    }

    /// Postings of the current term skipping the documents that are not set
    /// in `live_docs`.
    fn postings_with_live_docs(
        &mut self,
        live_docs: Option<BitsRef>,
        flags: u16,
    ) -> Result<Box<dyn PostingIterator>>;

    /// Snapshot of the current position.
    fn term_state(&mut self) -> Result<TermState>;
}

/// Error for methods used on an iterator that is not on a term.
pub fn unpositioned_error<T>() -> Result<T> {
    bail!(IllegalState("term iterator is not positioned".into()))
}

/// Compares two terms as unsigned bytes.
pub fn compare_term_bytes(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Maintains a `IndexReader` `TermState` view over its leaves, plus the
/// statistics of the term summed across them.
#[derive(Clone, Debug)]
pub struct TermContext {
    pub doc_freq: i32,
    pub total_term_freq: i64,
    states: HashMap<usize, TermState>,
}

impl TermContext {
    pub fn new() -> TermContext {
        TermContext {
            doc_freq: 0,
            total_term_freq: 0,
            states: HashMap::new(),
        }
    }

    /// Looks `term` up in every leaf.
    pub fn build(leaves: &[LeafReaderContext], term: &Term) -> Result<TermContext> {
        let mut context = TermContext::new();
        for leaf in leaves {
            if let Some(terms) = leaf.reader.terms(&term.field)? {
                let mut iter = terms.iterator()?;
                if iter.seek_exact(&term.bytes)? {
                    let state = iter.term_state()?;
                    let total_term_freq = iter.total_term_freq()?;
                    context.register(state, leaf.ord, iter.doc_freq()?, total_term_freq);
                }
            }
        }
        Ok(context)
    }

    pub fn register(&mut self, state: TermState, ord: usize, doc_freq: i32, total_term_freq: i64) {
        self.states.insert(ord, state);
        self.doc_freq += doc_freq;
        if self.total_term_freq >= 0 && total_term_freq >= 0 {
            self.total_term_freq += total_term_freq;
        } else {
            self.total_term_freq = -1;
        }
    }

    pub fn get(&self, ord: usize) -> Option<&TermState> {
        self.states.get(&ord)
    }
}

impl Default for TermContext {
    fn default() -> Self {
        TermContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_ordering() {
        let a = Term::from_str("body", "apple");
        let b = Term::from_str("body", "banana");
        let c = Term::from_str("alpha", "zebra");
        assert!(a < b);
        assert!(c < a);
        assert_eq!(a.to_string(), "body:apple");
        assert_eq!(
            compare_term_bytes(&[0x7f], &[0x80]),
            Ordering::Less,
            "bytes compare unsigned"
        );
    }

    #[test]
    fn test_term_state_bytes() {
        let state = TermState {
            ord: 70,
            doc_freq: 3,
            total_term_freq: -1,
            doc_start_fp: 1234,
            pos_start_fp: 0,
            skip_offset: -1,
        };
        let bytes = state.serialize();
        assert_eq!(TermState::deserialize(&bytes).unwrap(), state);
        assert!(TermState::deserialize(&bytes[..2]).is_err());
    }

    #[test]
    fn test_term_context_aggregates() {
        let mut ctx = TermContext::new();
        ctx.register(TermState::default(), 0, 2, 5);
        ctx.register(TermState::default(), 2, 1, 1);
        assert_eq!(ctx.doc_freq, 3);
        assert_eq!(ctx.total_term_freq, 6);
        assert!(ctx.get(1).is_none());
        ctx.register(TermState::default(), 1, 1, -1);
        assert_eq!(ctx.total_term_freq, -1);
    }
}
