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

use crate::core::analysis::Analyzer;
use crate::core::codec::compound::write_compound_file;
use crate::core::codec::field_infos::{
    write_field_infos, FieldInfos, FieldInfosBuilder, FieldInvertState, FieldNumbers,
};
use crate::core::codec::live_docs::{new_live_docs, write_live_docs};
use crate::core::codec::norms::write_norms;
use crate::core::codec::postings::PostingsWriter;
use crate::core::codec::segment_infos::{
    write_segment_info, SegmentCommitInfo, SegmentInfo, SegmentWriteState,
};
use crate::core::codec::stored_fields::StoredFieldsWriter;
use crate::core::doc::{Document, Field};
use crate::core::index::{IndexOptions, Term};
use crate::core::search::similarity::Similarity;
use crate::core::store::directory::{Directory, DirectoryRc, TrackingDirectoryWrapper};
use crate::core::store::{FlushInfo, IOContext};
use crate::core::util::{random_id, DocId, FixedBitSet, VariantValue};
use crate::error::ErrorKind::IllegalArgument;
use crate::error::Result;

use smallvec::SmallVec;

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;

// rough per entry costs used for the RAM flush trigger
const BYTES_PER_TERM: usize = 64;
const BYTES_PER_POSTING: usize = 24;
const BYTES_PER_POSITION: usize = 16;

#[derive(Debug)]
struct PositionEntry {
    position: i32,
    start_offset: i32,
    end_offset: i32,
    payload: Option<Vec<u8>>,
}

#[derive(Debug)]
struct DocPostings {
    doc: DocId,
    freq: i32,
    positions: SmallVec<[PositionEntry; 4]>,
}

#[derive(Debug, Default)]
struct TermPostings {
    docs: Vec<DocPostings>,
}

#[derive(Debug, Default)]
struct FieldPostings {
    terms: HashMap<Vec<u8>, TermPostings>,
    /// Norm byte per doc, shorter than the doc count when trailing docs
    /// lack the field.
    norms: Vec<u8>,
}

/// A segment written by `SegmentBuffer::flush`.
pub struct FlushedSegment {
    pub info: Arc<SegmentCommitInfo>,
    pub field_infos: Arc<FieldInfos>,
}

/// The in-memory segment documents are added to until it gets flushed.
///
/// Each indexed field keeps, per term, the list of documents with their
/// positions, offsets and payloads; stored values and norms are kept per
/// document. Delete terms issued while documents were buffered only affect
/// the documents added before them.
pub struct SegmentBuffer {
    field_infos: FieldInfosBuilder,
    fields: HashMap<String, FieldPostings>,
    stored: Vec<Vec<(String, VariantValue)>>,
    num_docs: i32,
    /// Delete terms with the number of buffered docs they apply to.
    deletes: Vec<(Term, DocId)>,
    /// Docs that failed half way through inversion.
    aborted_docs: Vec<DocId>,
    bytes_used: usize,
}

impl SegmentBuffer {
    pub fn new(field_numbers: Arc<FieldNumbers>) -> SegmentBuffer {
        SegmentBuffer {
            field_infos: FieldInfosBuilder::new(field_numbers),
            fields: HashMap::new(),
            stored: Vec::new(),
            num_docs: 0,
            deletes: Vec::new(),
            aborted_docs: Vec::new(),
            bytes_used: 0,
        }
    }

    pub fn num_docs(&self) -> i32 {
        self.num_docs
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn has_changes(&self) -> bool {
        self.num_docs > 0 || !self.deletes.is_empty()
    }

    pub fn has_deletes(&self) -> bool {
        !self.deletes.is_empty()
    }

    /// Buffers `term` for deletion; it deletes the documents buffered so far
    /// and, once applied, every matching document of the flushed segments.
    pub fn delete_term(&mut self, term: Term) {
        self.bytes_used += term.bytes.len() + term.field.len() + BYTES_PER_POSTING;
        self.deletes.push((term, self.num_docs));
    }

    /// Delete terms buffered since the last flush.
    pub fn delete_terms(&self) -> Vec<Term> {
        self.deletes.iter().map(|(t, _)| t.clone()).collect()
    }

    /// Inverts `doc` into the buffer. A document that fails during inversion
    /// still consumes its doc id but is marked as deleted.
    pub fn add_document(
        &mut self,
        doc: &Document,
        analyzer: &dyn Analyzer,
        similarity: &dyn Similarity,
    ) -> Result<()> {
        let doc_id = self.num_docs;
        self.num_docs += 1;
        let result = self.invert_document(doc_id, doc, analyzer, similarity);
        if result.is_err() {
            self.aborted_docs.push(doc_id);
            if self.stored.len() as i32 == doc_id {
                self.stored.push(Vec::new());
            }
        }
        result
    }

    fn invert_document(
        &mut self,
        doc_id: DocId,
        doc: &Document,
        analyzer: &dyn Analyzer,
        similarity: &dyn Similarity,
    ) -> Result<()> {
        let mut stored = Vec::new();
        let mut states: Vec<FieldInvertState> = Vec::new();
        let mut norms_of: HashSet<String> = HashSet::new();

        for field in &doc.fields {
            let field_type = field.field_type();
            if !field_type.indexed() && !field_type.stored {
                continue;
            }
            if field_type.store_payloads && !field_type.index_options.has_positions() {
                bail!(IllegalArgument(format!(
                    "field '{}' cannot store payloads without positions",
                    field.name()
                )));
            }
            self.field_infos.get_or_add(
                field.name(),
                field_type.index_options,
                field_type.omit_norms,
                field_type.store_payloads,
            )?;
            if field_type.stored {
                self.bytes_used += field.name().len() + value_size(field.value());
                stored.push((field.name().to_string(), field.value().clone()));
            }
            if field_type.indexed() {
                let idx = match states.iter().position(|s| s.name == field.name()) {
                    Some(idx) => {
                        let state = &mut states[idx];
                        state.position += analyzer.position_increment_gap(field.name()) as i32;
                        state.offset += 1;
                        idx
                    }
                    None => {
                        states.push(FieldInvertState::new(field.name().to_string()));
                        states.len() - 1
                    }
                };
                self.invert_field(doc_id, field, analyzer, &mut states[idx])?;
                if !field_type.omit_norms {
                    norms_of.insert(field.name().to_string());
                }
            }
        }

        for state in &states {
            if !norms_of.contains(&state.name) {
                continue;
            }
            let norm = similarity.compute_norm(state);
            let postings = self.fields.entry(state.name.clone()).or_default();
            postings.norms.resize(doc_id as usize, 0);
            postings.norms.push(norm);
        }
        self.stored.push(stored);
        Ok(())
    }

    fn invert_field(
        &mut self,
        doc_id: DocId,
        field: &Field,
        analyzer: &dyn Analyzer,
        state: &mut FieldInvertState,
    ) -> Result<()> {
        let options = field.field_type().index_options;
        let postings = self.fields.entry(field.name().to_string()).or_default();
        state.boost *= field.boost();

        let mut stream = field.token_stream(analyzer)?;
        stream.reset()?;
        let mut last_start_offset = -1;
        while stream.next_token()? {
            let token = stream.token();
            let increment = token.position as i32;
            if increment == 0 {
                state.num_overlap += 1;
            }
            state.position += increment;
            if state.position < 0 {
                bail!(IllegalArgument(format!(
                    "first position increment must be > 0 for field '{}'",
                    field.name()
                )));
            }
            let start_offset = state.offset + token.start_offset as i32;
            let end_offset = state.offset + token.end_offset as i32;
            if options.has_offsets() && start_offset < last_start_offset {
                bail!(IllegalArgument(format!(
                    "offsets must not go backwards in field '{}': {} after {}",
                    field.name(),
                    start_offset,
                    last_start_offset
                )));
            }
            last_start_offset = start_offset;
            state.length += 1;

            let term_postings = match postings.terms.entry(token.term.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    self.bytes_used += BYTES_PER_TERM + token.term.len();
                    e.insert(TermPostings::default())
                }
            };
            let new_doc = term_postings.docs.last().map_or(true, |d| d.doc != doc_id);
            if new_doc {
                state.unique_term_count += 1;
                self.bytes_used += BYTES_PER_POSTING;
                term_postings.docs.push(DocPostings {
                    doc: doc_id,
                    freq: 0,
                    positions: SmallVec::new(),
                });
            }
            if let Some(doc_postings) = term_postings.docs.last_mut() {
                doc_postings.freq += 1;
                state.max_term_frequency =
                    state.max_term_frequency.max(doc_postings.freq as u32);
                if options.has_positions() {
                    let payload = if token.payload.is_empty() {
                        None
                    } else {
                        Some(token.payload.clone())
                    };
                    self.bytes_used +=
                        BYTES_PER_POSITION + payload.as_ref().map_or(0, Vec::len);
                    doc_postings.positions.push(PositionEntry {
                        position: state.position,
                        start_offset,
                        end_offset,
                        payload,
                    });
                }
            }
        }
        stream.end()?;
        state.offset += stream.token().end_offset as i32;
        Ok(())
    }

    /// Docs of this buffer that are deleted at flush time.
    fn buffered_deletes(&self) -> FixedBitSet {
        let mut live = new_live_docs(self.num_docs as usize);
        for doc in &self.aborted_docs {
            live.clear(*doc as usize);
        }
        for (term, upto) in &self.deletes {
            let postings = self
                .fields
                .get(&term.field)
                .and_then(|f| f.terms.get(&term.bytes));
            if let Some(postings) = postings {
                for d in postings.docs.iter().take_while(|d| d.doc < *upto) {
                    live.clear(d.doc as usize);
                }
            }
        }
        live
    }

    /// Writes the buffered documents as segment `name`, empties the buffer
    /// and returns the new segment. Returns `None` when no document survived
    /// the buffered deletes.
    pub fn flush(
        &mut self,
        directory: &DirectoryRc,
        name: &str,
        use_compound_file: bool,
    ) -> Result<Option<FlushedSegment>> {
        let num_docs = self.num_docs;
        if num_docs == 0 {
            self.clear();
            return Ok(None);
        }
        let live_docs = self.buffered_deletes();
        let del_count = num_docs - live_docs.cardinality() as i32;
        let tracking = Arc::new(TrackingDirectoryWrapper::new(Arc::clone(directory)));
        let context = IOContext::Flush(FlushInfo::new(num_docs as u32, self.bytes_used as u64));

        let res = if del_count == num_docs {
            debug!("flush: dropping segment {}, all {} docs deleted", name, num_docs);
            Ok(None)
        } else {
            self.write_segment(&tracking, name, use_compound_file, &live_docs, del_count, &context)
                .map(Some)
        };
        if res.is_err() || del_count == num_docs {
            // nothing references these yet
            if let Ok(created) = tracking.create_files() {
                for file in created {
                    if let Err(e) = directory.delete_file(&file) {
                        warn!("flush: failed to delete {}: {:?}", file, e);
                    }
                }
            }
        }
        self.clear();
        res
    }

    fn write_segment(
        &self,
        tracking: &Arc<TrackingDirectoryWrapper>,
        name: &str,
        use_compound_file: bool,
        live_docs: &FixedBitSet,
        del_count: i32,
        context: &IOContext,
    ) -> Result<FlushedSegment> {
        let dir: DirectoryRc = Arc::clone(tracking) as DirectoryRc;
        let num_docs = self.num_docs;
        let field_infos = Arc::new(self.field_infos.finish()?);
        let mut diagnostics = HashMap::new();
        diagnostics.insert("source".to_string(), "flush".to_string());
        let mut si = SegmentInfo::new(
            name,
            num_docs,
            Arc::clone(&tracking.directory),
            false,
            diagnostics,
            random_id(),
            HashMap::new(),
        );

        write_field_infos(dir.as_ref(), &si, &field_infos, context)?;
        self.write_stored_fields(dir.as_ref(), &si, &field_infos, context)?;
        self.write_postings(&dir, &si, &field_infos, context)?;
        if field_infos.has_norms {
            let mut norms = Vec::new();
            for info in field_infos.iter().filter(|i| i.has_norms()) {
                let mut values = self
                    .fields
                    .get(&info.name)
                    .map_or_else(Vec::new, |f| f.norms.clone());
                values.resize(num_docs as usize, 0);
                norms.push((info.number, values));
            }
            write_norms(dir.as_ref(), &si, &norms, context)?;
        }

        si.set_files(&tracking.create_files()?)?;
        if use_compound_file {
            let originals = si.files().clone();
            let compound = write_compound_file(dir.as_ref(), &si, context)?;
            for file in &originals {
                dir.delete_file(file)?;
            }
            si.set_files(&compound.into_iter().collect())?;
            si.set_use_compound_file();
        }
        write_segment_info(dir.as_ref(), &mut si, context)?;

        let commit_info = SegmentCommitInfo::new(Arc::new(si), 0, -1);
        if del_count > 0 {
            write_live_docs(dir.as_ref(), &commit_info, live_docs, del_count, context)?;
            commit_info.advance_del_gen();
            commit_info.set_del_count(del_count)?;
        }
        debug!(
            "flushed segment {} with {} docs, {} deleted",
            commit_info, num_docs, del_count
        );
        Ok(FlushedSegment {
            info: Arc::new(commit_info),
            field_infos,
        })
    }

    fn write_stored_fields(
        &self,
        dir: &dyn Directory,
        si: &SegmentInfo,
        field_infos: &FieldInfos,
        context: &IOContext,
    ) -> Result<()> {
        let mut writer = StoredFieldsWriter::new(dir, si, context)?;
        for doc in &self.stored {
            writer.start_document();
            for (name, value) in doc {
                if let Some(info) = field_infos.field_info_by_name(name) {
                    writer.write_field(info, value)?;
                }
            }
            writer.finish_document()?;
        }
        writer.finish(self.stored.len())
    }

    fn write_postings(
        &self,
        dir: &DirectoryRc,
        si: &SegmentInfo,
        field_infos: &Arc<FieldInfos>,
        context: &IOContext,
    ) -> Result<()> {
        let state =
            SegmentWriteState::new(Arc::clone(dir), si.clone(), Arc::clone(field_infos), *context);
        let mut writer = PostingsWriter::new(&state)?;
        let mut names: Vec<&String> = self.fields.keys().collect();
        names.sort();
        for name in names {
            let info = match field_infos.by_name.get(name) {
                Some(info) if info.index_options != IndexOptions::Null => Arc::clone(info),
                _ => continue,
            };
            let field = &self.fields[name];
            if field.terms.is_empty() {
                continue;
            }
            let with_positions = info.index_options.has_positions();
            writer.start_field(Arc::clone(&info))?;
            let mut terms: Vec<(&Vec<u8>, &TermPostings)> = field.terms.iter().collect();
            terms.sort_by(|a, b| a.0.cmp(b.0));
            for (term, postings) in terms {
                writer.start_term(term)?;
                for doc in &postings.docs {
                    writer.start_doc(doc.doc, doc.freq)?;
                    if with_positions {
                        for p in &doc.positions {
                            writer.add_position(
                                p.position,
                                p.payload.as_ref().map(Vec::as_slice),
                                p.start_offset,
                                p.end_offset,
                            )?;
                        }
                    }
                }
                writer.finish_term()?;
            }
            writer.finish_field()?;
        }
        writer.close()
    }

    /// Drops every buffered document and delete term.
    pub fn clear(&mut self) {
        let numbers = self.field_infos.global_field_numbers();
        let _ = mem::replace(self, SegmentBuffer::new(numbers));
    }
}

fn value_size(value: &VariantValue) -> usize {
    match value {
        VariantValue::VString(s) => s.len(),
        VariantValue::Binary(b) => b.len(),
        _ => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::WhitespaceAnalyzer;
    use crate::core::doc::FieldType;
    use crate::core::index::reader::{LeafReader, SegmentReader};
    use crate::core::index::tests::{new_directory, text_doc};
    use crate::core::search::posting_iterator::PostingIteratorFlags;
    use crate::core::search::similarity::BM25Similarity;
    use crate::core::search::{DocIterator, NO_MORE_DOCS};

    fn buffer() -> SegmentBuffer {
        SegmentBuffer::new(Arc::new(FieldNumbers::new()))
    }

    #[test]
    fn test_flush_positions_and_multi_values() {
        let dir = new_directory();
        let analyzer = WhitespaceAnalyzer::default();
        let sim = BM25Similarity::default();
        let mut buf = buffer();
        let mut doc = text_doc("0", "to be or not to be");
        doc.add(Field::new("body", FieldType::text_stored(), "be quick"));
        buf.add_document(&doc, &analyzer, &sim).unwrap();
        buf.add_document(&text_doc("1", "not now"), &analyzer, &sim)
            .unwrap();

        let flushed = buf.flush(&dir, "_0", false).unwrap().unwrap();
        assert_eq!(buf.num_docs(), 0);
        assert_eq!(flushed.info.info.max_doc(), 2);
        assert!(flushed.info.info.files().contains("_0.si"));

        let reader = SegmentReader::open(&flushed.info, &IOContext::READ).unwrap();
        let mut postings = reader
            .postings(&Term::from_str("body", "be"), PostingIteratorFlags::ALL)
            .unwrap()
            .unwrap();
        assert_eq!(postings.next().unwrap(), 0);
        assert_eq!(postings.freq().unwrap(), 3);
        assert_eq!(postings.next_position().unwrap(), 1);
        assert_eq!(postings.next_position().unwrap(), 5);
        // the second value continues after the first one
        assert_eq!(postings.next_position().unwrap(), 6);
        assert_eq!(postings.start_offset().unwrap(), 19);
        assert_eq!(postings.next().unwrap(), NO_MORE_DOCS);
        assert_eq!(reader.doc_freq(&Term::from_str("id", "1")).unwrap(), 1);
    }

    #[test]
    fn test_buffered_deletes_only_hit_earlier_docs() {
        let dir = new_directory();
        let analyzer = WhitespaceAnalyzer::default();
        let sim = BM25Similarity::default();
        let mut buf = buffer();
        buf.add_document(&text_doc("a", "x"), &analyzer, &sim).unwrap();
        buf.delete_term(Term::from_str("id", "a"));
        buf.add_document(&text_doc("a", "y"), &analyzer, &sim).unwrap();
        assert_eq!(buf.delete_terms(), vec![Term::from_str("id", "a")]);

        let flushed = buf.flush(&dir, "_1", true).unwrap().unwrap();
        assert!(flushed.info.info.is_compound_file());
        assert_eq!(flushed.info.del_count(), 1);
        assert_eq!(flushed.info.del_gen(), 1);
        let reader = SegmentReader::open(&flushed.info, &IOContext::READ).unwrap();
        assert_eq!(reader.num_docs(), 1);
        let live = reader.live_docs().unwrap();
        assert!(!live.get(0).unwrap());
        assert!(live.get(1).unwrap());
    }

    #[test]
    fn test_fully_deleted_buffer_is_dropped() {
        let dir = new_directory();
        let analyzer = WhitespaceAnalyzer::default();
        let sim = BM25Similarity::default();
        let mut buf = buffer();
        buf.add_document(&text_doc("a", "x"), &analyzer, &sim).unwrap();
        buf.delete_term(Term::from_str("id", "a"));
        assert!(buf.flush(&dir, "_2", false).unwrap().is_none());
        assert!(dir.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_failed_document_is_deleted() {
        let dir = new_directory();
        let analyzer = WhitespaceAnalyzer::default();
        let sim = BM25Similarity::default();
        let mut buf = buffer();
        let mut bad = Document::new();
        bad.add(Field::new("body", FieldType::text(), 42));
        assert!(buf.add_document(&bad, &analyzer, &sim).is_err());
        buf.add_document(&text_doc("b", "fine"), &analyzer, &sim)
            .unwrap();
        let flushed = buf.flush(&dir, "_3", false).unwrap().unwrap();
        assert_eq!(flushed.info.info.max_doc(), 2);
        assert_eq!(flushed.info.del_count(), 1);
    }
}
