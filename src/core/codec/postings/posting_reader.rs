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

use std::sync::Arc;

use crate::core::codec::field_infos::FieldInfo;
use crate::core::codec::postings::{PostingsInputs, SKIP_INTERVAL};
use crate::core::index::TermState;
use crate::core::search::posting_iterator::{PostingIterator, PostingIteratorFlags};
use crate::core::search::{DocIterator, Payload, NO_MORE_DOCS};
use crate::core::store::io::{DataInput, IndexInput};
use crate::core::util::{is_live, BitsRef, DocId};
use crate::error::ErrorKind::CorruptIndex;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct SkipEntry {
    doc: DocId,
    doc_fp: i64,
    pos_fp: i64,
}

/// Postings of one term in one segment.
pub struct SegmentPostingIterator {
    doc_in: Box<dyn IndexInput>,
    pos_in: Option<Box<dyn IndexInput>>,
    live_docs: Option<BitsRef>,
    has_freqs: bool,
    has_payloads: bool,
    has_offsets: bool,
    state: TermState,

    doc: DocId,
    accum: DocId,
    docs_read: i32,
    freq: i32,

    skips: Option<Vec<SkipEntry>>,

    // positions read from .doc but not yet consumed from .pos
    pos_pending: i32,
    new_doc: bool,
    position: i32,
    start_offset: i32,
    end_offset: i32,
    payload: Payload,
}

impl SegmentPostingIterator {
    pub(crate) fn new(
        info: Arc<FieldInfo>,
        inputs: &PostingsInputs,
        state: TermState,
        live_docs: Option<BitsRef>,
        flags: u16,
    ) -> Result<SegmentPostingIterator> {
        let options = info.index_options;
        let mut doc_in = inputs.doc.clone()?;
        doc_in.seek(state.doc_start_fp)?;

        let want_positions =
            PostingIteratorFlags::feature_requested(flags, PostingIteratorFlags::POSITIONS);
        let pos_in = match &inputs.pos {
            Some(pos) if want_positions && options.has_positions() => {
                let mut pos_in = pos.as_ref().clone()?;
                pos_in.seek(state.pos_start_fp)?;
                Some(pos_in)
            }
            _ => None,
        };

        Ok(SegmentPostingIterator {
            doc_in,
            pos_in,
            live_docs,
            has_freqs: options.has_freqs(),
            has_payloads: info.has_store_payloads,
            has_offsets: options.has_offsets(),
            state,
            doc: -1,
            accum: -1,
            docs_read: 0,
            freq: 0,
            skips: None,
            pos_pending: 0,
            new_doc: false,
            position: -1,
            start_offset: -1,
            end_offset: -1,
            payload: Vec::new(),
        })
    }

    fn load_skips(&mut self) -> Result<()> {
        let fp = self.doc_in.file_pointer();
        self.doc_in
            .seek(self.state.doc_start_fp + self.state.skip_offset)?;
        let count = self.doc_in.read_vint()?;
        let expected = (self.state.doc_freq - 1) / SKIP_INTERVAL;
        if count != expected {
            bail!(CorruptIndex(format!(
                "expected {} skip entries but got {} in {}",
                expected,
                count,
                self.doc_in.name()
            )));
        }
        let mut skips = Vec::with_capacity(count as usize);
        let mut last = SkipEntry {
            doc: 0,
            doc_fp: 0,
            pos_fp: 0,
        };
        for _ in 0..count {
            last.doc += self.doc_in.read_vint()?;
            last.doc_fp += self.doc_in.read_vlong()?;
            last.pos_fp += self.doc_in.read_vlong()?;
            skips.push(last);
        }
        self.doc_in.seek(fp)?;
        self.skips = Some(skips);
        Ok(())
    }

    /// Jumps to the last skip point before `target` that is ahead of the
    /// current position.
    fn skip_to(&mut self, target: DocId) -> Result<()> {
        if self.skips.is_none() {
            self.load_skips()?;
        }
        let skips = match &self.skips {
            Some(skips) => skips,
            None => return Ok(()),
        };
        let first = (self.docs_read / SKIP_INTERVAL) as usize;
        let mut found = None;
        for (i, entry) in skips.iter().enumerate().skip(first) {
            if entry.doc >= target {
                break;
            }
            found = Some((i, *entry));
        }
        if let Some((i, entry)) = found {
            self.docs_read = (i as i32 + 1) * SKIP_INTERVAL;
            self.accum = entry.doc;
            self.doc_in.seek(self.state.doc_start_fp + entry.doc_fp)?;
            if let Some(pos_in) = &mut self.pos_in {
                pos_in.seek(self.state.pos_start_fp + entry.pos_fp)?;
            }
            self.pos_pending = 0;
            self.new_doc = false;
        }
        Ok(())
    }

    fn skip_position(&mut self) -> Result<()> {
        if let Some(pos_in) = &mut self.pos_in {
            pos_in.read_vint()?;
            if self.has_payloads {
                let len = pos_in.read_vint()?;
                pos_in.skip_bytes(len as usize)?;
            }
            if self.has_offsets {
                pos_in.read_vint()?;
                pos_in.read_vint()?;
            }
        }
        Ok(())
    }
}

impl DocIterator for SegmentPostingIterator {
    fn doc_id(&self) -> DocId {
        self.doc
    }

    fn next(&mut self) -> Result<DocId> {
        loop {
            if self.docs_read >= self.state.doc_freq {
                self.doc = NO_MORE_DOCS;
                return Ok(NO_MORE_DOCS);
            }
            if self.has_freqs {
                let code = self.doc_in.read_vint()? as u32;
                self.accum += (code >> 1) as i32;
                self.freq = if code & 1 != 0 {
                    1
                } else {
                    self.doc_in.read_vint()?
                };
            } else {
                self.accum += self.doc_in.read_vint()?;
                self.freq = 1;
            }
            self.docs_read += 1;
            if self.pos_in.is_some() {
                self.pos_pending += self.freq;
                self.new_doc = true;
            }
            if is_live(self.live_docs.as_ref(), self.accum as usize)? {
                self.doc = self.accum;
                return Ok(self.doc);
            }
        }
    }

    fn advance(&mut self, target: DocId) -> Result<DocId> {
        if target == NO_MORE_DOCS {
            self.docs_read = self.state.doc_freq;
            self.doc = NO_MORE_DOCS;
            return Ok(NO_MORE_DOCS);
        }
        if self.state.skip_offset >= 0 && self.state.doc_freq > SKIP_INTERVAL {
            self.skip_to(target)?;
        }
        loop {
            let doc = self.next()?;
            if doc >= target {
                return Ok(doc);
            }
        }
    }

    fn cost(&self) -> usize {
        self.state.doc_freq as usize
    }
}

impl PostingIterator for SegmentPostingIterator {
    fn freq(&self) -> Result<i32> {
        Ok(self.freq)
    }

    fn next_position(&mut self) -> Result<i32> {
        if self.pos_in.is_none() {
            return Ok(-1);
        }
        if self.new_doc {
            while self.pos_pending > self.freq {
                self.skip_position()?;
                self.pos_pending -= 1;
            }
            self.position = 0;
            self.start_offset = 0;
            self.new_doc = false;
        }
        let has_payloads = self.has_payloads;
        let has_offsets = self.has_offsets;
        if let Some(pos_in) = &mut self.pos_in {
            self.position += pos_in.read_vint()?;
            if has_payloads {
                let len = pos_in.read_vint()? as usize;
                self.payload.resize(len, 0);
                pos_in.read_bytes(&mut self.payload, 0, len)?;
            }
            if has_offsets {
                self.start_offset += pos_in.read_vint()?;
                self.end_offset = self.start_offset + pos_in.read_vint()?;
            }
        }
        self.pos_pending -= 1;
        Ok(self.position)
    }

    fn start_offset(&self) -> Result<i32> {
        Ok(if self.has_offsets && self.pos_in.is_some() {
            self.start_offset
        } else {
            -1
        })
    }

    fn end_offset(&self) -> Result<i32> {
        Ok(if self.has_offsets && self.pos_in.is_some() {
            self.end_offset
        } else {
            -1
        })
    }

    fn payload(&self) -> Result<Payload> {
        if self.has_payloads && self.pos_in.is_some() {
            Ok(self.payload.clone())
        } else {
            Ok(Vec::new())
        }
    }
}
