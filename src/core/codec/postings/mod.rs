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

//! Term dictionary and postings lists.
//!
//! A segment's postings live in four files:
//!
//! * `.tim` holds the terms of every field in blocks of `TERMS_BLOCK_SIZE`
//!   prefix coded entries, each with its statistics and postings pointers;
//! * `.tip` indexes the blocks (first term and file pointer) per field and is
//!   loaded into memory when the segment is opened;
//! * `.doc` holds doc deltas and frequencies, followed for long lists by a
//!   skip table with one entry every `SKIP_INTERVAL` documents;
//! * `.pos` holds position deltas, payloads and offsets.

mod posting_writer;

pub use self::posting_writer::*;

mod terms_reader;

pub use self::terms_reader::*;

mod posting_reader;

pub use self::posting_reader::*;

pub const TERMS_EXTENSION: &str = "tim";
pub const TERMS_INDEX_EXTENSION: &str = "tip";
pub const DOC_EXTENSION: &str = "doc";
pub const POS_EXTENSION: &str = "pos";

pub const TERMS_CODEC: &str = "QuarryTermsDict";
pub const TERMS_INDEX_CODEC: &str = "QuarryTermsIndex";
pub const DOC_CODEC: &str = "QuarryPostingsDoc";
pub const POS_CODEC: &str = "QuarryPostingsPos";

pub const VERSION_START: i32 = 0;
pub const VERSION_CURRENT: i32 = VERSION_START;

/// Number of terms per `.tim` block.
pub const TERMS_BLOCK_SIZE: usize = 32;

/// Number of documents between two entries of a postings skip table.
pub const SKIP_INTERVAL: i32 = 16;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::field_infos::{FieldInfos, FieldInfosBuilder};
    use crate::core::codec::segment_infos::{SegmentInfo, SegmentReadState, SegmentWriteState};
    use crate::core::index::{Fields, IndexOptions, SeekStatus, TermIterator};
    use crate::core::search::posting_iterator::{PostingIterator, PostingIteratorFlags};
    use crate::core::search::{DocIterator, NO_MORE_DOCS};
    use crate::core::store::directory::{DirectoryRc, RAMDirectory};
    use crate::core::store::IOContext;
    use crate::core::util::{random_id, BitsRef, FixedBitSet};

    use std::collections::HashMap;
    use std::sync::Arc;

    const MAX_DOC: i32 = 200;

    fn field_infos() -> Arc<FieldInfos> {
        let mut builder = FieldInfosBuilder::default();
        builder
            .get_or_add("body", IndexOptions::DocsAndFreqsAndPositionsAndOffsets, false, true)
            .unwrap();
        builder
            .get_or_add("tag", IndexOptions::Docs, true, false)
            .unwrap();
        Arc::new(builder.finish().unwrap())
    }

    fn term_name(i: usize) -> Vec<u8> {
        format!("term{:03}", i).into_bytes()
    }

    /// Writes 100 terms for `body`: term i occurs in every (i + 1)th doc
    /// with freq 2, plus a single `tag` term in every doc.
    fn write_segment(dir: &DirectoryRc, infos: &Arc<FieldInfos>) -> SegmentInfo {
        let si = SegmentInfo::new(
            "_0",
            MAX_DOC,
            Arc::clone(dir),
            false,
            HashMap::new(),
            random_id(),
            HashMap::new(),
        );
        let state = SegmentWriteState::new(
            Arc::clone(dir),
            si.clone(),
            Arc::clone(infos),
            IOContext::Default,
        );
        let mut writer = PostingsWriter::new(&state).unwrap();

        let body = Arc::clone(infos.by_name.get("body").unwrap());
        writer.start_field(body).unwrap();
        for i in 0..100 {
            writer.start_term(&term_name(i)).unwrap();
            let mut doc = 0;
            while doc < MAX_DOC {
                writer.start_doc(doc, 2).unwrap();
                writer.add_position(1, Some(b"p1"), 2, 5).unwrap();
                writer.add_position(doc % 7 + 3, Some(b""), 10, 12).unwrap();
                doc += i as i32 + 1;
            }
            writer.finish_term().unwrap();
        }
        writer.finish_field().unwrap();

        let tag = Arc::clone(infos.by_name.get("tag").unwrap());
        writer.start_field(tag).unwrap();
        writer.start_term(b"all").unwrap();
        for doc in 0..MAX_DOC {
            writer.start_doc(doc, 1).unwrap();
        }
        writer.finish_term().unwrap();
        writer.finish_field().unwrap();
        writer.close().unwrap();
        si
    }

    fn open(dir: &DirectoryRc) -> PostingsReader {
        let infos = field_infos();
        let si = write_segment(dir, &infos);
        let state = SegmentReadState::new(Arc::clone(dir), &si, infos, IOContext::READ);
        PostingsReader::open(&state).unwrap()
    }

    #[test]
    fn test_terms_are_ordered_and_seekable() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let reader = open(&dir);
        assert_eq!(reader.fields(), vec!["body".to_string(), "tag".to_string()]);

        let terms = reader.terms("body").unwrap().unwrap();
        assert_eq!(terms.size().unwrap(), 100);
        assert_eq!(terms.doc_count().unwrap(), MAX_DOC);
        assert!(terms.has_payloads().unwrap());

        let mut iter = terms.iterator().unwrap();
        let mut last: Option<Vec<u8>> = None;
        let mut count = 0;
        while let Some(term) = iter.next().unwrap() {
            if let Some(prev) = &last {
                assert!(prev < &term);
            }
            assert_eq!(iter.ord().unwrap(), count);
            last = Some(term);
            count += 1;
        }
        assert_eq!(count, 100);

        assert_eq!(iter.seek_ceil(b"term0405").unwrap(), SeekStatus::NotFound);
        assert_eq!(iter.term().unwrap(), b"term041");
        assert_eq!(iter.next().unwrap(), Some(term_name(42)));
        assert_eq!(iter.seek_ceil(b"term050").unwrap(), SeekStatus::Found);
        assert_eq!(iter.doc_freq().unwrap(), (MAX_DOC + 50) / 51);
        assert_eq!(iter.seek_ceil(b"zzz").unwrap(), SeekStatus::End);
        assert_eq!(iter.seek_ceil(b"a").unwrap(), SeekStatus::NotFound);
        assert_eq!(iter.term().unwrap(), b"term000");

        assert!(!iter.seek_exact(b"term0005").unwrap());
        assert!(iter.term().is_err());
        assert!(iter.seek_exact(b"term099").unwrap());

        iter.seek_exact_ord(33).unwrap();
        assert_eq!(iter.term().unwrap(), term_name(33).as_slice());
    }

    #[test]
    fn test_seek_ceil_across_block_boundaries() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let reader = open(&dir);
        let terms = reader.terms("body").unwrap().unwrap();
        let mut iter = terms.iterator().unwrap();

        // the first term of every block, then the gap just before it
        for &first in &[0usize, TERMS_BLOCK_SIZE, 2 * TERMS_BLOCK_SIZE, 3 * TERMS_BLOCK_SIZE] {
            assert_eq!(iter.seek_ceil(&term_name(first)).unwrap(), SeekStatus::Found);
            assert_eq!(iter.ord().unwrap(), first as i64);
            if first > 0 {
                let mut before = term_name(first - 1);
                before.push(b'5');
                assert_eq!(iter.seek_ceil(&before).unwrap(), SeekStatus::NotFound);
                assert_eq!(iter.term().unwrap(), term_name(first).as_slice());
            }
        }
        // backwards after forwards
        assert_eq!(iter.seek_ceil(b"term0315").unwrap(), SeekStatus::NotFound);
        assert_eq!(iter.term().unwrap(), b"term032");
        assert_eq!(iter.seek_ceil(b"term0995").unwrap(), SeekStatus::End);
    }

    #[test]
    fn test_postings_with_skips_and_positions() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let reader = open(&dir);
        let terms = reader.terms("body").unwrap().unwrap();
        let mut iter = terms.iterator().unwrap();
        assert!(iter.seek_exact(b"term000").unwrap());
        assert_eq!(iter.doc_freq().unwrap(), MAX_DOC);
        assert_eq!(iter.total_term_freq().unwrap(), 2 * MAX_DOC as i64);

        let mut postings = iter.postings(PostingIteratorFlags::ALL).unwrap();
        assert_eq!(postings.next().unwrap(), 0);
        assert_eq!(postings.freq().unwrap(), 2);
        assert_eq!(postings.next_position().unwrap(), 1);
        assert_eq!(postings.payload().unwrap(), b"p1".to_vec());
        assert_eq!(postings.start_offset().unwrap(), 2);
        assert_eq!(postings.end_offset().unwrap(), 5);

        // positions of skipped docs are consumed lazily
        assert_eq!(postings.advance(150).unwrap(), 150);
        assert_eq!(postings.next_position().unwrap(), 1);
        assert_eq!(postings.next_position().unwrap(), 150 % 7 + 3);
        assert_eq!(postings.start_offset().unwrap(), 10);
        assert_eq!(postings.end_offset().unwrap(), 12);
        assert!(postings.payload().unwrap().is_empty());

        assert_eq!(postings.next().unwrap(), 151);
        assert_eq!(postings.advance(190).unwrap(), 190);
        assert_eq!(postings.advance(MAX_DOC).unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_postings_are_monotonic_with_deletions() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let reader = open(&dir);
        let mut live = FixedBitSet::with_all_set(MAX_DOC as usize);
        for doc in (0..MAX_DOC as usize).step_by(3) {
            live.clear(doc);
        }
        let live: BitsRef = Arc::new(live);

        let terms = reader.terms("tag").unwrap().unwrap();
        assert!(!terms.has_freqs().unwrap());
        assert_eq!(terms.sum_total_term_freq().unwrap(), -1);
        let mut iter = terms.iterator().unwrap();
        assert!(iter.seek_exact(b"all").unwrap());
        assert_eq!(iter.total_term_freq().unwrap(), -1);

        let mut postings = iter
            .postings_with_live_docs(Some(Arc::clone(&live)), PostingIteratorFlags::FREQS)
            .unwrap();
        let mut last = -1;
        let mut seen = 0;
        loop {
            let doc = if seen % 5 == 4 {
                postings.advance(last + 4).unwrap()
            } else {
                postings.next().unwrap()
            };
            if doc == NO_MORE_DOCS {
                break;
            }
            assert!(doc > last);
            assert_ne!(doc % 3, 0);
            assert_eq!(postings.freq().unwrap(), 1);
            last = doc;
            seen += 1;
        }
        assert!(seen > 0);
    }

    #[test]
    fn test_seek_by_state_then_next() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let reader = open(&dir);
        let terms = reader.terms("body").unwrap().unwrap();
        let mut iter = terms.iterator().unwrap();
        assert!(iter.seek_exact(b"term064").unwrap());
        let state = iter.term_state().unwrap();

        let mut other = terms.iterator().unwrap();
        other.seek_exact_state(b"term064", &state).unwrap();
        assert_eq!(other.doc_freq().unwrap(), (MAX_DOC + 64) / 65);
        let mut postings = other.postings(PostingIteratorFlags::NONE).unwrap();
        assert_eq!(postings.next().unwrap(), 0);
        assert_eq!(postings.next().unwrap(), 65);
        assert_eq!(other.next().unwrap(), Some(term_name(65)));
    }
}
