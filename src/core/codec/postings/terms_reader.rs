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
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::codec::codec_util;
use crate::core::codec::field_infos::FieldInfo;
use crate::core::codec::postings::*;
use crate::core::codec::segment_infos::{segment_file_name, SegmentReadState};
use crate::core::index::{
    unpositioned_error, Fields, SeekStatus, TermIterator, TermState, Terms,
};
use crate::core::search::posting_iterator::PostingIterator;
use crate::core::store::directory::Directory;
use crate::core::store::io::{DataInput, IndexInput};
use crate::core::util::BitsRef;
use crate::error::ErrorKind::{CorruptIndex, IllegalArgument, IllegalState};
use crate::error::Result;

/// Open handles on the postings files of one segment; iterators clone them.
pub(crate) struct PostingsInputs {
    terms: Box<dyn IndexInput>,
    pub doc: Box<dyn IndexInput>,
    pub pos: Option<Box<dyn IndexInput>>,
}

/// Reads the term dictionary and postings written by `PostingsWriter`.
pub struct PostingsReader {
    fields: BTreeMap<String, Arc<FieldReader>>,
}

impl PostingsReader {
    pub fn open(state: &SegmentReadState) -> Result<PostingsReader> {
        let si = state.segment_info;
        let dir = state.directory.as_ref();

        let open = |ext: &str, codec: &str| -> Result<Box<dyn IndexInput>> {
            let name = segment_file_name(&si.name, "", ext);
            let mut input = dir.open_input(&name, &state.context)?;
            codec_util::check_index_header(
                input.as_mut(),
                codec,
                VERSION_START,
                VERSION_CURRENT,
                &si.id,
                "",
            )?;
            // structural check only, the whole file is verified by check_integrity
            codec_util::retrieve_checksum(input.as_mut())?;
            Ok(input)
        };
        let terms = open(TERMS_EXTENSION, TERMS_CODEC)?;
        let doc = open(DOC_EXTENSION, DOC_CODEC)?;
        let pos = if state.field_infos.has_prox {
            Some(open(POS_EXTENSION, POS_CODEC)?)
        } else {
            None
        };
        let inputs = Arc::new(PostingsInputs { terms, doc, pos });

        let index_name = segment_file_name(&si.name, "", TERMS_INDEX_EXTENSION);
        let mut index_in = dir.open_checksum_input(&index_name, &state.context)?;
        codec_util::check_index_header(
            index_in.as_mut(),
            TERMS_INDEX_CODEC,
            VERSION_START,
            VERSION_CURRENT,
            &si.id,
            "",
        )?;
        let num_fields = index_in.read_vint()?;
        if num_fields < 0 {
            bail!(CorruptIndex(format!("invalid number of fields: {}", num_fields)));
        }
        let mut fields = BTreeMap::new();
        for _ in 0..num_fields {
            let number = index_in.read_vint()?;
            let info = match state.field_infos.by_number.get(&(number as u32)) {
                Some(info) => Arc::clone(info),
                None => bail!(CorruptIndex(format!(
                    "invalid field number {} in {}",
                    number, index_name
                ))),
            };
            let num_terms = index_in.read_vlong()?;
            let sum_total_term_freq = index_in.read_zlong()?;
            let sum_doc_freq = index_in.read_vlong()?;
            let doc_count = index_in.read_vint()?;
            if doc_count < 0 || doc_count > si.max_doc() || sum_doc_freq < doc_count as i64 {
                bail!(CorruptIndex(format!(
                    "invalid doc_count {} for field {} in {}",
                    doc_count, info.name, index_name
                )));
            }
            let num_blocks = index_in.read_vint()?;
            let mut blocks = Vec::with_capacity(num_blocks.max(0) as usize);
            for _ in 0..num_blocks {
                let len = index_in.read_vint()? as usize;
                let mut first_term = vec![0u8; len];
                index_in.read_bytes(&mut first_term, 0, len)?;
                blocks.push((first_term, index_in.read_vlong()?));
            }
            let reader = FieldReader {
                info: Arc::clone(&info),
                num_terms,
                sum_total_term_freq,
                sum_doc_freq,
                doc_count,
                blocks: Arc::new(blocks),
                inputs: Arc::clone(&inputs),
            };
            if fields.insert(info.name.clone(), Arc::new(reader)).is_some() {
                bail!(CorruptIndex(format!("duplicate field: {}", info.name)));
            }
        }
        codec_util::check_footer(index_in.as_mut())?;
        Ok(PostingsReader { fields })
    }

    /// Reads every postings file and checks its checksum.
    pub fn check_integrity(&self) -> Result<()> {
        if let Some(field) = self.fields.values().next() {
            let inputs = &field.inputs;
            codec_util::checksum_entire_file(inputs.terms.as_ref())?;
            codec_util::checksum_entire_file(inputs.doc.as_ref())?;
            if let Some(pos) = &inputs.pos {
                codec_util::checksum_entire_file(pos.as_ref())?;
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&Arc<FieldReader>> {
        self.fields.get(name)
    }
}

impl Fields for PostingsReader {
    fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    fn terms(&self, field: &str) -> Result<Option<Arc<dyn Terms>>> {
        Ok(self
            .fields
            .get(field)
            .map(|f| Arc::clone(f) as Arc<dyn Terms>))
    }

    fn size(&self) -> usize {
        self.fields.len()
    }
}

/// Terms of one field of a segment.
pub struct FieldReader {
    info: Arc<FieldInfo>,
    num_terms: i64,
    sum_total_term_freq: i64,
    sum_doc_freq: i64,
    doc_count: i32,
    blocks: Arc<Vec<(Vec<u8>, i64)>>,
    inputs: Arc<PostingsInputs>,
}

impl FieldReader {
    pub fn field_info(&self) -> &FieldInfo {
        &self.info
    }
}

impl Terms for FieldReader {
    fn iterator(&self) -> Result<Box<dyn TermIterator>> {
        Ok(Box::new(SegmentTermIterator {
            info: Arc::clone(&self.info),
            blocks: Arc::clone(&self.blocks),
            inputs: Arc::clone(&self.inputs),
            terms_in: self.inputs.terms.clone()?,
            loaded_block: None,
            block: Vec::with_capacity(TERMS_BLOCK_SIZE),
            position: Position::Fresh,
            state_term: Vec::new(),
            state: TermState::default(),
        }))
    }

    fn size(&self) -> Result<i64> {
        Ok(self.num_terms)
    }

    fn sum_total_term_freq(&self) -> Result<i64> {
        Ok(self.sum_total_term_freq)
    }

    fn sum_doc_freq(&self) -> Result<i64> {
        Ok(self.sum_doc_freq)
    }

    fn doc_count(&self) -> Result<i32> {
        Ok(self.doc_count)
    }

    fn has_freqs(&self) -> Result<bool> {
        Ok(self.info.index_options.has_freqs())
    }

    fn has_offsets(&self) -> Result<bool> {
        Ok(self.info.index_options.has_offsets())
    }

    fn has_positions(&self) -> Result<bool> {
        Ok(self.info.index_options.has_positions())
    }

    fn has_payloads(&self) -> Result<bool> {
        Ok(self.info.has_store_payloads)
    }
}

struct BlockTerm {
    term: Vec<u8>,
    state: TermState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Fresh,
    At(usize, usize),
    /// Positioned by `seek_exact_state`, without a loaded block.
    State,
    Unpositioned,
    End,
}

/// `TermIterator` over the blocks of one field.
pub struct SegmentTermIterator {
    info: Arc<FieldInfo>,
    blocks: Arc<Vec<(Vec<u8>, i64)>>,
    inputs: Arc<PostingsInputs>,
    terms_in: Box<dyn IndexInput>,
    loaded_block: Option<usize>,
    block: Vec<BlockTerm>,
    position: Position,
    state_term: Vec<u8>,
    state: TermState,
}

impl SegmentTermIterator {
    fn load_block(&mut self, block_ord: usize) -> Result<()> {
        if self.loaded_block == Some(block_ord) {
            return Ok(());
        }
        self.loaded_block = None;
        self.block.clear();

        let fp = self.blocks[block_ord].1;
        self.terms_in.seek(fp)?;
        let count = self.terms_in.read_vint()?;
        let len = self.terms_in.read_vint()?;
        if count <= 0 || count as usize > TERMS_BLOCK_SIZE || len < 0 {
            bail!(CorruptIndex(format!(
                "invalid terms block at fp={} in {}",
                fp,
                self.terms_in.name()
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        self.terms_in.read_bytes(&mut bytes, 0, len as usize)?;

        let has_freqs = self.info.index_options.has_freqs();
        let has_positions = self.info.index_options.has_positions();
        let mut input: &[u8] = &bytes;
        let mut last_term: &[u8] = &[];
        let mut doc_fp = 0i64;
        let mut pos_fp = 0i64;
        let mut decoded = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let prefix = input.read_vint()? as usize;
            let suffix = input.read_vint()? as usize;
            if prefix > last_term.len() {
                bail!(CorruptIndex(format!("invalid term prefix {}", prefix)));
            }
            let mut term = Vec::with_capacity(prefix + suffix);
            term.extend_from_slice(&last_term[..prefix]);
            let start = term.len();
            term.resize(prefix + suffix, 0);
            input.read_bytes(&mut term[start..], 0, suffix)?;

            let doc_freq = input.read_vint()?;
            let total_term_freq = if has_freqs {
                input.read_vlong()? + doc_freq as i64
            } else {
                -1
            };
            doc_fp += input.read_vlong()?;
            if has_positions {
                pos_fp += input.read_vlong()?;
            }
            let skip_offset = input.read_vlong()? - 1;
            decoded.push(BlockTerm {
                term,
                state: TermState {
                    ord: (block_ord * TERMS_BLOCK_SIZE + i) as i64,
                    doc_freq,
                    total_term_freq,
                    doc_start_fp: doc_fp,
                    pos_start_fp: pos_fp,
                    skip_offset,
                },
            });
            last_term = &decoded[i].term;
        }
        self.block = decoded;
        self.loaded_block = Some(block_ord);
        Ok(())
    }

    fn current(&self) -> Result<(&[u8], &TermState)> {
        match self.position {
            Position::At(_, i) => Ok((&self.block[i].term, &self.block[i].state)),
            Position::State => Ok((&self.state_term, &self.state)),
            _ => unpositioned_error(),
        }
    }
}

impl TermIterator for SegmentTermIterator {
    fn next(&mut self) -> Result<Option<Vec<u8>>> {
        if self.position == Position::State {
            let term = self.state_term.clone();
            if self.seek_ceil(&term)? != SeekStatus::Found {
                bail!(IllegalState(
                    "term of the seek state is missing from the dictionary".into()
                ));
            }
        }
        let next = match self.position {
            Position::Fresh => {
                if self.blocks.is_empty() {
                    None
                } else {
                    Some((0, 0))
                }
            }
            Position::At(b, i) => {
                if i + 1 < self.block.len() {
                    Some((b, i + 1))
                } else if b + 1 < self.blocks.len() {
                    Some((b + 1, 0))
                } else {
                    None
                }
            }
            Position::End => None,
            Position::Unpositioned | Position::State => {
                bail!(IllegalState("next() on an unpositioned term iterator".into()))
            }
        };
        match next {
            Some((b, i)) => {
                self.load_block(b)?;
                self.position = Position::At(b, i);
                Ok(Some(self.block[i].term.clone()))
            }
            None => {
                self.position = Position::End;
                Ok(None)
            }
        }
    }

    fn seek_exact(&mut self, text: &[u8]) -> Result<bool> {
        if self.seek_ceil(text)? == SeekStatus::Found {
            Ok(true)
        } else {
            self.position = Position::Unpositioned;
            Ok(false)
        }
    }

    fn seek_ceil(&mut self, text: &[u8]) -> Result<SeekStatus> {
        if self.blocks.is_empty() {
            self.position = Position::End;
            return Ok(SeekStatus::End);
        }
        // last block whose first term is <= text
        let after = self
            .blocks
            .partition_point(|(first, _)| first.as_slice() <= text);
        let b = if after == 0 { 0 } else { after - 1 };
        self.load_block(b)?;
        for i in 0..self.block.len() {
            match self.block[i].term.as_slice().cmp(text) {
                Ordering::Less => continue,
                Ordering::Equal => {
                    self.position = Position::At(b, i);
                    return Ok(SeekStatus::Found);
                }
                Ordering::Greater => {
                    self.position = Position::At(b, i);
                    return Ok(SeekStatus::NotFound);
                }
            }
        }
        if b + 1 < self.blocks.len() {
            self.load_block(b + 1)?;
            self.position = Position::At(b + 1, 0);
            Ok(SeekStatus::NotFound)
        } else {
            self.position = Position::End;
            Ok(SeekStatus::End)
        }
    }

    fn seek_exact_ord(&mut self, ord: i64) -> Result<()> {
        let b = ord as usize / TERMS_BLOCK_SIZE;
        let i = ord as usize % TERMS_BLOCK_SIZE;
        if ord < 0 || b >= self.blocks.len() {
            bail!(IllegalArgument(format!("term ord {} out of range", ord)));
        }
        self.load_block(b)?;
        if i >= self.block.len() {
            bail!(IllegalArgument(format!("term ord {} out of range", ord)));
        }
        self.position = Position::At(b, i);
        Ok(())
    }

    fn seek_exact_state(&mut self, text: &[u8], state: &TermState) -> Result<()> {
        self.state_term.clear();
        self.state_term.extend_from_slice(text);
        self.state = state.clone();
        self.position = Position::State;
        Ok(())
    }

    fn term(&self) -> Result<&[u8]> {
        self.current().map(|(term, _)| term)
    }

    fn ord(&self) -> Result<i64> {
        self.current().map(|(_, state)| state.ord)
    }

    fn doc_freq(&mut self) -> Result<i32> {
        self.current().map(|(_, state)| state.doc_freq)
    }

    fn total_term_freq(&mut self) -> Result<i64> {
        self.current().map(|(_, state)| state.total_term_freq)
    }

    fn postings_with_live_docs(
        &mut self,
        live_docs: Option<BitsRef>,
        flags: u16,
    ) -> Result<Box<dyn PostingIterator>> {
        let state = self.current()?.1.clone();
        let iter = SegmentPostingIterator::new(
            Arc::clone(&self.info),
            &self.inputs,
            state,
            live_docs,
            flags,
        )?;
        Ok(Box::new(iter))
    }

    fn term_state(&mut self) -> Result<TermState> {
        self.current().map(|(_, state)| state.clone())
    }
}
