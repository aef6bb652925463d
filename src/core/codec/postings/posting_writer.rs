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

use crate::core::codec::codec_util;
use crate::core::codec::field_infos::FieldInfo;
use crate::core::codec::postings::*;
use crate::core::codec::segment_infos::{segment_file_name, SegmentWriteState};
use crate::core::index::IndexOptions;
use crate::core::store::io::{DataOutput, IndexOutput, RAMOutputStream};
use crate::core::util::{bytes_difference, DocId, FixedBitSet};
use crate::error::ErrorKind::{IllegalArgument, IllegalState};
use crate::error::Result;

/// Statistics of one term, returned by `PostingsWriter::finish_term`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermStats {
    pub doc_freq: i32,
    pub total_term_freq: i64,
}

struct PendingTerm {
    term: Vec<u8>,
    doc_freq: i32,
    total_term_freq: i64,
    doc_start_fp: i64,
    pos_start_fp: i64,
    skip_offset: i64,
}

struct SkipEntry {
    doc: DocId,
    doc_fp: i64,
    pos_fp: i64,
}

struct FieldWriteState {
    info: Arc<FieldInfo>,
    num_terms: i64,
    sum_total_term_freq: i64,
    sum_doc_freq: i64,
    docs_seen: FixedBitSet,
    blocks: Vec<(Vec<u8>, i64)>,
    pending: Vec<PendingTerm>,
    last_term: Option<Vec<u8>>,
}

struct TermWriteState {
    term: Vec<u8>,
    doc_start_fp: i64,
    pos_start_fp: i64,
    doc_freq: i32,
    total_term_freq: i64,
    last_doc: DocId,
    // positions of the current doc
    freq: i32,
    positions_added: i32,
    last_position: i32,
    last_start_offset: i32,
    skips: Vec<SkipEntry>,
}

struct FieldSummary {
    number: u32,
    num_terms: i64,
    sum_total_term_freq: i64,
    sum_doc_freq: i64,
    doc_count: i32,
    blocks: Vec<(Vec<u8>, i64)>,
}

/// Streams the postings of a new segment to disk.
///
/// Fields must be added in increasing name order, terms in increasing
/// (unsigned byte) order within a field, and documents in increasing order
/// within a term. Both the in-memory flush and the segment merger feed this
/// writer.
pub struct PostingsWriter {
    terms_out: Box<dyn IndexOutput>,
    doc_out: Box<dyn IndexOutput>,
    pos_out: Option<Box<dyn IndexOutput>>,
    index_out: Option<Box<dyn IndexOutput>>,
    max_doc: usize,
    summaries: Vec<FieldSummary>,
    field: Option<FieldWriteState>,
    term: Option<TermWriteState>,
    last_field_name: Option<String>,
}

impl PostingsWriter {
    pub fn new(state: &SegmentWriteState) -> Result<PostingsWriter> {
        let si = &state.segment_info;
        let max_doc = si.max_doc() as usize;
        let id = si.id;
        let name = si.name.clone();

        let open = |ext: &str, codec: &str| -> Result<Box<dyn IndexOutput>> {
            let file_name = segment_file_name(&name, "", ext);
            let mut out = state.directory.create_output(&file_name, &state.context)?;
            codec_util::write_index_header(out.as_mut(), codec, VERSION_CURRENT, &id, "")?;
            Ok(out)
        };

        let terms_out = open(TERMS_EXTENSION, TERMS_CODEC)?;
        let index_out = open(TERMS_INDEX_EXTENSION, TERMS_INDEX_CODEC)?;
        let doc_out = open(DOC_EXTENSION, DOC_CODEC)?;
        let pos_out = if state.field_infos.has_prox {
            Some(open(POS_EXTENSION, POS_CODEC)?)
        } else {
            None
        };

        Ok(PostingsWriter {
            terms_out,
            doc_out,
            pos_out,
            index_out: Some(index_out),
            max_doc,
            summaries: Vec::new(),
            field: None,
            term: None,
            last_field_name: None,
        })
    }

    pub fn start_field(&mut self, info: Arc<FieldInfo>) -> Result<()> {
        if self.field.is_some() {
            bail!(IllegalState("previous field was not finished".into()));
        }
        if !info.index_options.is_indexed() {
            bail!(IllegalArgument(format!("field '{}' is not indexed", info.name)));
        }
        if let Some(last) = &self.last_field_name {
            if last.as_str() >= info.name.as_str() {
                bail!(IllegalArgument(format!(
                    "fields must be added in order: '{}' after '{}'",
                    info.name, last
                )));
            }
        }
        self.last_field_name = Some(info.name.clone());
        let freqs = info.index_options.has_freqs();
        self.field = Some(FieldWriteState {
            info,
            num_terms: 0,
            sum_total_term_freq: if freqs { 0 } else { -1 },
            sum_doc_freq: 0,
            docs_seen: FixedBitSet::new(self.max_doc),
            blocks: Vec::new(),
            pending: Vec::with_capacity(TERMS_BLOCK_SIZE),
            last_term: None,
        });
        Ok(())
    }

    pub fn start_term(&mut self, term: &[u8]) -> Result<()> {
        if self.term.is_some() {
            bail!(IllegalState("previous term was not finished".into()));
        }
        let field = match self.field.as_mut() {
            Some(f) => f,
            None => bail!(IllegalState("start_term called outside of a field".into())),
        };
        if let Some(last) = &field.last_term {
            if last.as_slice() >= term {
                bail!(IllegalArgument(format!(
                    "terms out of order in field '{}'",
                    field.info.name
                )));
            }
        }
        self.term = Some(TermWriteState {
            term: term.to_vec(),
            doc_start_fp: self.doc_out.file_pointer(),
            pos_start_fp: self.pos_out.as_ref().map_or(0, |p| p.file_pointer()),
            doc_freq: 0,
            total_term_freq: 0,
            last_doc: -1,
            freq: 0,
            positions_added: 0,
            last_position: 0,
            last_start_offset: 0,
            skips: Vec::new(),
        });
        Ok(())
    }

    /// Adds a document to the current term. `freq` is ignored when the field
    /// does not index frequencies.
    pub fn start_doc(&mut self, doc: DocId, freq: i32) -> Result<()> {
        let (field, term) = match (self.field.as_mut(), self.term.as_mut()) {
            (Some(f), Some(t)) => (f, t),
            _ => bail!(IllegalState("start_doc called outside of a term".into())),
        };
        if doc <= term.last_doc || doc as usize >= self.max_doc {
            bail!(IllegalArgument(format!(
                "doc {} out of order or out of bounds (last={}, max_doc={})",
                doc, term.last_doc, self.max_doc
            )));
        }
        let options = field.info.index_options;
        if options.has_positions() && term.doc_freq > 0 && term.positions_added != term.freq {
            bail!(IllegalState(format!(
                "doc {} expected {} positions but got {}",
                term.last_doc, term.freq, term.positions_added
            )));
        }

        if term.doc_freq > 0 && term.doc_freq % SKIP_INTERVAL == 0 {
            term.skips.push(SkipEntry {
                doc: term.last_doc,
                doc_fp: self.doc_out.file_pointer() - term.doc_start_fp,
                pos_fp: self
                    .pos_out
                    .as_ref()
                    .map_or(0, |p| p.file_pointer() - term.pos_start_fp),
            });
        }

        let delta = doc - term.last_doc;
        if options.has_freqs() {
            if freq <= 0 {
                bail!(IllegalArgument(format!("invalid freq {} for doc {}", freq, doc)));
            }
            if freq == 1 {
                self.doc_out.write_vint(delta << 1 | 1)?;
            } else {
                self.doc_out.write_vint(delta << 1)?;
                self.doc_out.write_vint(freq)?;
            }
            term.total_term_freq += freq as i64;
        } else {
            self.doc_out.write_vint(delta)?;
            term.total_term_freq += 1;
        }

        term.last_doc = doc;
        term.doc_freq += 1;
        term.freq = freq;
        term.positions_added = 0;
        term.last_position = 0;
        term.last_start_offset = 0;
        field.docs_seen.set(doc as usize);
        Ok(())
    }

    /// Adds a position to the current document. `payload` and the offsets are
    /// only written when the field indexes them.
    pub fn add_position(
        &mut self,
        position: i32,
        payload: Option<&[u8]>,
        start_offset: i32,
        end_offset: i32,
    ) -> Result<()> {
        let (field, term) = match (self.field.as_ref(), self.term.as_mut()) {
            (Some(f), Some(t)) => (f, t),
            _ => bail!(IllegalState("add_position called outside of a term".into())),
        };
        let pos_out = match self.pos_out.as_mut() {
            Some(out) if field.info.index_options.has_positions() => out,
            _ => return Ok(()),
        };
        if position < term.last_position {
            bail!(IllegalArgument(format!(
                "position {} is before the previous position {}",
                position, term.last_position
            )));
        }
        if term.positions_added >= term.freq {
            bail!(IllegalState(format!(
                "more than freq={} positions for doc {}",
                term.freq, term.last_doc
            )));
        }
        pos_out.write_vint(position - term.last_position)?;
        term.last_position = position;

        if field.info.has_store_payloads {
            let payload = payload.unwrap_or(&[]);
            pos_out.write_vint(payload.len() as i32)?;
            pos_out.write_bytes(payload, 0, payload.len())?;
        }
        if field.info.index_options == IndexOptions::DocsAndFreqsAndPositionsAndOffsets {
            if start_offset < term.last_start_offset || end_offset < start_offset {
                bail!(IllegalArgument(format!(
                    "invalid offsets [{}, {}) after start offset {}",
                    start_offset, end_offset, term.last_start_offset
                )));
            }
            pos_out.write_vint(start_offset - term.last_start_offset)?;
            pos_out.write_vint(end_offset - start_offset)?;
            term.last_start_offset = start_offset;
        }
        term.positions_added += 1;
        Ok(())
    }

    /// Finishes the current term. A term without documents is dropped, so
    /// the merger may start terms whose documents were all deleted.
    pub fn finish_term(&mut self) -> Result<TermStats> {
        let term = match self.term.take() {
            Some(t) => t,
            None => bail!(IllegalState("finish_term called without a term".into())),
        };
        let field = match self.field.as_mut() {
            Some(f) => f,
            None => bail!(IllegalState("finish_term called outside of a field".into())),
        };
        let freqs = field.info.index_options.has_freqs();
        let stats = TermStats {
            doc_freq: term.doc_freq,
            total_term_freq: if freqs { term.total_term_freq } else { -1 },
        };
        if term.doc_freq == 0 {
            return Ok(stats);
        }

        let skip_offset = if term.skips.is_empty() {
            -1
        } else {
            let offset = self.doc_out.file_pointer() - term.doc_start_fp;
            self.doc_out.write_vint(term.skips.len() as i32)?;
            let mut last = SkipEntry {
                doc: 0,
                doc_fp: 0,
                pos_fp: 0,
            };
            for skip in &term.skips {
                self.doc_out.write_vint(skip.doc - last.doc)?;
                self.doc_out.write_vlong(skip.doc_fp - last.doc_fp)?;
                self.doc_out.write_vlong(skip.pos_fp - last.pos_fp)?;
                last = SkipEntry {
                    doc: skip.doc,
                    doc_fp: skip.doc_fp,
                    pos_fp: skip.pos_fp,
                };
            }
            offset
        };

        field.num_terms += 1;
        field.sum_doc_freq += term.doc_freq as i64;
        if freqs {
            field.sum_total_term_freq += term.total_term_freq;
        }
        field.last_term = Some(term.term.clone());
        field.pending.push(PendingTerm {
            term: term.term,
            doc_freq: term.doc_freq,
            total_term_freq: term.total_term_freq,
            doc_start_fp: term.doc_start_fp,
            pos_start_fp: term.pos_start_fp,
            skip_offset,
        });
        if field.pending.len() == TERMS_BLOCK_SIZE {
            Self::write_block(self.terms_out.as_mut(), field)?;
        }
        Ok(stats)
    }

    fn write_block(out: &mut dyn IndexOutput, field: &mut FieldWriteState) -> Result<()> {
        if field.pending.is_empty() {
            return Ok(());
        }
        let has_freqs = field.info.index_options.has_freqs();
        let has_positions = field.info.index_options.has_positions();

        field
            .blocks
            .push((field.pending[0].term.clone(), out.file_pointer()));

        // the block is encoded in memory first so its length can prefix it
        let mut buffer = RAMOutputStream::new(String::from("block"));
        let mut last: Option<&PendingTerm> = None;
        for t in &field.pending {
            let prefix = match last {
                Some(prev) => bytes_difference(&prev.term, &t.term),
                None => 0,
            };
            buffer.write_vint(prefix as i32)?;
            buffer.write_vint((t.term.len() - prefix) as i32)?;
            buffer.write_bytes(&t.term, prefix, t.term.len() - prefix)?;
            buffer.write_vint(t.doc_freq)?;
            if has_freqs {
                buffer.write_vlong(t.total_term_freq - t.doc_freq as i64)?;
            }
            let (doc_base, pos_base) = last.map_or((0, 0), |p| (p.doc_start_fp, p.pos_start_fp));
            buffer.write_vlong(t.doc_start_fp - doc_base)?;
            if has_positions {
                buffer.write_vlong(t.pos_start_fp - pos_base)?;
            }
            buffer.write_vlong(t.skip_offset + 1)?;
            last = Some(t);
        }
        out.write_vint(field.pending.len() as i32)?;
        let bytes = buffer.bytes();
        out.write_vint(bytes.len() as i32)?;
        out.write_bytes(bytes, 0, bytes.len())?;
        field.pending.clear();
        Ok(())
    }

    pub fn finish_field(&mut self) -> Result<()> {
        if self.term.is_some() {
            bail!(IllegalState("previous term was not finished".into()));
        }
        let mut field = match self.field.take() {
            Some(f) => f,
            None => bail!(IllegalState("finish_field called without a field".into())),
        };
        Self::write_block(self.terms_out.as_mut(), &mut field)?;
        if field.num_terms > 0 {
            self.summaries.push(FieldSummary {
                number: field.info.number,
                num_terms: field.num_terms,
                sum_total_term_freq: if field.info.index_options.has_freqs() {
                    field.sum_total_term_freq
                } else {
                    -1
                },
                sum_doc_freq: field.sum_doc_freq,
                doc_count: field.docs_seen.cardinality() as i32,
                blocks: field.blocks,
            });
        }
        Ok(())
    }

    /// Writes the terms index and the footers of every file.
    pub fn close(&mut self) -> Result<()> {
        if self.field.is_some() {
            bail!(IllegalState("previous field was not finished".into()));
        }
        let mut index_out = match self.index_out.take() {
            Some(out) => out,
            None => bail!(IllegalState("postings writer is already closed".into())),
        };
        index_out.write_vint(self.summaries.len() as i32)?;
        for summary in &self.summaries {
            index_out.write_vint(summary.number as i32)?;
            index_out.write_vlong(summary.num_terms)?;
            index_out.write_zlong(summary.sum_total_term_freq)?;
            index_out.write_vlong(summary.sum_doc_freq)?;
            index_out.write_vint(summary.doc_count)?;
            index_out.write_vint(summary.blocks.len() as i32)?;
            for (first_term, fp) in &summary.blocks {
                index_out.write_vint(first_term.len() as i32)?;
                index_out.write_bytes(first_term, 0, first_term.len())?;
                index_out.write_vlong(*fp)?;
            }
        }
        codec_util::write_footer(index_out.as_mut())?;
        codec_util::write_footer(self.terms_out.as_mut())?;
        codec_util::write_footer(self.doc_out.as_mut())?;
        if let Some(pos_out) = self.pos_out.as_mut() {
            codec_util::write_footer(pos_out.as_mut())?;
        }
        Ok(())
    }
}
