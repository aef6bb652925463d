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

use crate::core::codec::field_infos::{
    write_field_infos, FieldInfo, FieldInfos, FieldInfosBuilder, FieldNumbers,
};
use crate::core::codec::norms::write_norms;
use crate::core::codec::postings::PostingsWriter;
use crate::core::codec::segment_infos::{SegmentInfo, SegmentWriteState};
use crate::core::codec::stored_fields::StoredFieldsWriter;
use crate::core::index::merge::{
    MergeState, OneMerge, PayloadProcessor, PayloadProcessorProvider, ReaderPayloadProcessor,
};
use crate::core::index::reader::LeafReader;
use crate::core::index::{Status, StoredFieldVisitor, TermIterator};
use crate::core::search::posting_iterator::PostingIteratorFlags;
use crate::core::search::{DocIterator, NO_MORE_DOCS};
use crate::core::store::directory::DirectoryRc;
use crate::core::store::IOContext;
use crate::core::util::VariantValue;
use crate::error::ErrorKind::{IllegalArgument, IllegalState};
use crate::error::Result;

use std::sync::Arc;

/// The SegmentMerger combines two or more segments, represented by their
/// readers, into a single segment. Deleted documents are compacted away
/// and the remaining ones are renumbered in reader order.
pub struct SegmentMerger {
    directory: DirectoryRc,
    context: IOContext,
    pub merge_state: MergeState,
    field_infos_builder: FieldInfosBuilder,
    payload_processor_provider: Option<Arc<dyn PayloadProcessorProvider>>,
}

impl SegmentMerger {
    /// `segment_info` describes the new segment, its `max_doc` is still
    /// unset.
    pub fn new(
        merge: &OneMerge,
        segment_info: SegmentInfo,
        directory: DirectoryRc,
        field_numbers: Arc<FieldNumbers>,
        context: IOContext,
        payload_processor_provider: Option<Arc<dyn PayloadProcessorProvider>>,
    ) -> Result<SegmentMerger> {
        if !context.is_merge() {
            bail!(IllegalArgument("IOContext should be merge!".into()));
        }
        let merge_state = MergeState::new(
            merge.readers.clone(),
            merge.live_docs.clone(),
            segment_info,
        )?;
        Ok(SegmentMerger {
            directory,
            context,
            merge_state,
            field_infos_builder: FieldInfosBuilder::new(field_numbers),
            payload_processor_provider,
        })
    }

    /// True if any merging should happen
    pub fn should_merge(&self) -> bool {
        self.merge_state.segment_info.max_doc() > 0
    }

    /// Merges the readers into the directory passed to the constructor,
    /// checking `merge` for abort along the way.
    pub fn merge(&mut self, merge: &mut OneMerge) -> Result<()> {
        if !self.should_merge() {
            bail!(IllegalState("Merge would result in 0 document segment".into()));
        }
        for reader in &self.merge_state.readers {
            reader.check_integrity()?;
        }
        merge.check_aborted()?;

        let field_infos = Arc::new(self.merge_field_infos()?);
        self.merge_state.merge_field_infos = Some(Arc::clone(&field_infos));

        let num_merged = self.merge_stored_fields(&field_infos, merge)?;
        debug_assert_eq!(num_merged, self.merge_state.segment_info.max_doc());
        merge.check_aborted()?;

        self.merge_postings(&field_infos, merge)?;
        merge.check_aborted()?;

        if field_infos.has_norms {
            self.merge_norms(&field_infos)?;
            merge.check_aborted()?;
        }

        write_field_infos(
            self.directory.as_ref(),
            &self.merge_state.segment_info,
            &field_infos,
            &self.context,
        )?;
        debug!(
            "merged {} docs of {} segments into {}",
            num_merged,
            self.merge_state.readers.len(),
            self.merge_state.segment_info.name
        );
        Ok(())
    }

    fn merge_field_infos(&mut self) -> Result<FieldInfos> {
        for reader in &self.merge_state.readers {
            self.field_infos_builder.add_infos(reader.field_infos())?;
        }
        self.field_infos_builder.finish()
    }

    fn merge_stored_fields(&self, field_infos: &FieldInfos, merge: &mut OneMerge) -> Result<i32> {
        let state = &self.merge_state;
        let mut writer =
            StoredFieldsWriter::new(self.directory.as_ref(), &state.segment_info, &self.context)?;
        let mut doc_count = 0;
        for (i, reader) in state.readers.iter().enumerate() {
            let doc_map = &state.doc_maps[i];
            for doc in 0..state.max_docs[i] {
                if doc_map.get(doc) < 0 {
                    continue;
                }
                writer.start_document();
                let mut visitor = MergeFieldsVisitor {
                    writer: &mut writer,
                    field_infos,
                };
                reader.document(doc, &mut visitor)?;
                writer.finish_document()?;
                doc_count += 1;
                merge.check_abort(300.0)?;
            }
        }
        writer.finish(doc_count as usize)?;
        Ok(doc_count)
    }

    fn merge_postings(&self, field_infos: &Arc<FieldInfos>, merge: &mut OneMerge) -> Result<()> {
        let state = &self.merge_state;
        let write_state = SegmentWriteState::new(
            Arc::clone(&self.directory),
            state.segment_info.clone(),
            Arc::clone(field_infos),
            self.context,
        );
        let mut writer = PostingsWriter::new(&write_state)?;

        let mut processors: Vec<Option<Box<dyn ReaderPayloadProcessor>>> =
            Vec::with_capacity(state.readers.len());
        for reader in &state.readers {
            let processor = match &self.payload_processor_provider {
                Some(provider) if field_infos.has_payloads => {
                    provider.reader_processor(reader.name())?
                }
                _ => None,
            };
            processors.push(processor);
        }

        let mut infos: Vec<&Arc<FieldInfo>> = field_infos
            .by_name
            .values()
            .filter(|info| info.index_options.is_indexed())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        for info in infos {
            self.merge_field_postings(&mut writer, info, &mut processors, merge)?;
        }
        writer.close()
    }

    fn merge_field_postings(
        &self,
        writer: &mut PostingsWriter,
        info: &Arc<FieldInfo>,
        processors: &mut [Option<Box<dyn ReaderPayloadProcessor>>],
        merge: &mut OneMerge,
    ) -> Result<()> {
        let state = &self.merge_state;
        let mut subs = Vec::new();
        for (ord, reader) in state.readers.iter().enumerate() {
            if let Some(terms) = reader.terms(&info.name)? {
                let mut iter = terms.iterator()?;
                if let Some(term) = iter.next()? {
                    subs.push(TermsSub { ord, iter, term });
                }
            }
        }
        if subs.is_empty() {
            return Ok(());
        }

        let options = info.index_options;
        let mut flags = if options.has_freqs() {
            PostingIteratorFlags::FREQS
        } else {
            PostingIteratorFlags::NONE
        };
        if options.has_positions() {
            flags |= PostingIteratorFlags::POSITIONS;
            if info.has_store_payloads {
                flags |= PostingIteratorFlags::PAYLOADS;
            }
            if options.has_offsets() {
                flags |= PostingIteratorFlags::OFFSETS;
            }
        }

        writer.start_field(Arc::clone(info))?;
        while !subs.is_empty() {
            let min = match subs.iter().map(|s| &s.term).min() {
                Some(term) => term.clone(),
                None => break,
            };
            writer.start_term(&min)?;
            let mut units = 0.0;
            let mut i = 0;
            // subs stay in reader order, so merged doc ids ascend
            while i < subs.len() {
                if subs[i].term != min {
                    i += 1;
                    continue;
                }
                let sub = &mut subs[i];
                let processor = match processors[sub.ord].as_mut() {
                    Some(p) => p.processor(&info.name, &min)?,
                    None => None,
                };
                units += self.copy_postings(writer, info, sub, flags, processor)?;
                match sub.iter.next()? {
                    Some(term) => {
                        sub.term = term;
                        i += 1;
                    }
                    None => {
                        subs.remove(i);
                    }
                }
            }
            writer.finish_term()?;
            merge.check_abort(units + 1.0)?;
        }
        writer.finish_field()
    }

    /// Copies the postings of the current term of `sub`, returns the work
    /// done in abort check units.
    fn copy_postings(
        &self,
        writer: &mut PostingsWriter,
        info: &FieldInfo,
        sub: &mut TermsSub,
        flags: u16,
        mut processor: Option<Box<dyn PayloadProcessor>>,
    ) -> Result<f64> {
        let doc_map = &self.merge_state.doc_maps[sub.ord];
        let options = info.index_options;
        let mut postings = sub.iter.postings(flags)?;
        let mut units = 0.0;
        loop {
            let doc = postings.next()?;
            if doc == NO_MORE_DOCS {
                break;
            }
            let new_doc = doc_map.get(doc);
            if new_doc < 0 {
                continue;
            }
            let freq = if options.has_freqs() {
                postings.freq()?
            } else {
                1
            };
            writer.start_doc(new_doc, freq)?;
            if options.has_positions() {
                for _ in 0..freq {
                    let position = postings.next_position()?;
                    let (start, end) = if options.has_offsets() {
                        (postings.start_offset()?, postings.end_offset()?)
                    } else {
                        (-1, -1)
                    };
                    let mut payload = if info.has_store_payloads {
                        postings.payload()?
                    } else {
                        Vec::new()
                    };
                    if let Some(p) = processor.as_mut() {
                        if !payload.is_empty() {
                            p.process(&mut payload)?;
                        }
                    }
                    let payload = if payload.is_empty() {
                        None
                    } else {
                        Some(payload.as_slice())
                    };
                    writer.add_position(position, payload, start, end)?;
                }
            }
            units += f64::from(freq);
        }
        Ok(units)
    }

    fn merge_norms(&self, field_infos: &FieldInfos) -> Result<()> {
        let state = &self.merge_state;
        let max_doc = state.segment_info.max_doc() as usize;
        let mut norms = Vec::new();
        for info in field_infos.iter().filter(|i| i.has_norms()) {
            let mut values = vec![0u8; max_doc];
            for (i, reader) in state.readers.iter().enumerate() {
                let source = match reader.norm_values(&info.name)? {
                    Some(source) => source,
                    None => continue,
                };
                let doc_map = &state.doc_maps[i];
                for doc in 0..state.max_docs[i] {
                    let new_doc = doc_map.get(doc);
                    if new_doc >= 0 {
                        values[new_doc as usize] = source.get(doc);
                    }
                }
            }
            norms.push((info.number, values));
        }
        write_norms(
            self.directory.as_ref(),
            &state.segment_info,
            &norms,
            &self.context,
        )
    }
}

struct TermsSub {
    ord: usize,
    iter: Box<dyn TermIterator>,
    term: Vec<u8>,
}

/// Copies every stored field of a document into the merged segment.
struct MergeFieldsVisitor<'a> {
    writer: &'a mut StoredFieldsWriter,
    field_infos: &'a FieldInfos,
}

impl<'a> MergeFieldsVisitor<'a> {
    fn write(&mut self, field_info: &FieldInfo, value: VariantValue) -> Result<()> {
        match self.field_infos.field_info_by_name(&field_info.name) {
            Some(info) => self.writer.write_field(info, &value),
            None => bail!(IllegalState(format!(
                "field '{}' is missing in the merged field infos",
                field_info.name
            ))),
        }
    }
}

impl<'a> StoredFieldVisitor for MergeFieldsVisitor<'a> {
    fn binary_field(&mut self, field_info: &FieldInfo, value: Vec<u8>) -> Result<()> {
        self.write(field_info, VariantValue::Binary(value))
    }

    fn string_field(&mut self, field_info: &FieldInfo, value: Vec<u8>) -> Result<()> {
        self.write(field_info, VariantValue::VString(String::from_utf8(value)?))
    }

    fn int_field(&mut self, field_info: &FieldInfo, value: i32) -> Result<()> {
        self.write(field_info, VariantValue::Int(value))
    }

    fn long_field(&mut self, field_info: &FieldInfo, value: i64) -> Result<()> {
        self.write(field_info, VariantValue::Long(value))
    }

    fn float_field(&mut self, field_info: &FieldInfo, value: f32) -> Result<()> {
        self.write(field_info, VariantValue::Float(value))
    }

    fn double_field(&mut self, field_info: &FieldInfo, value: f64) -> Result<()> {
        self.write(field_info, VariantValue::Double(value))
    }

    fn needs_field(&self, _field_info: &FieldInfo) -> Status {
        Status::Yes
    }
}
