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

use crate::core::codec::codec_util;
use crate::core::codec::field_infos::FieldInfo;
use crate::core::codec::segment_infos::{segment_file_name, SegmentInfo};
use crate::core::codec::stored_fields::*;
use crate::core::store::directory::Directory;
use crate::core::store::io::{DataOutput, IndexOutput};
use crate::core::store::IOContext;
use crate::core::util::packed::{get_mutable_by_ratio, unsigned_bits_required, COMPACT};
use crate::core::util::VariantValue;
use crate::error::ErrorKind::{IllegalArgument, IllegalState};
use crate::error::Result;

/// Writes the stored fields of a new segment, one document at a time.
pub struct StoredFieldsWriter {
    fields_out: Box<dyn IndexOutput>,
    index_out: Option<Box<dyn IndexOutput>>,
    doc_starts: Vec<i64>,
    pending: Vec<u8>,
    pending_count: i32,
    in_doc: bool,
}

impl StoredFieldsWriter {
    pub fn new(
        directory: &dyn Directory,
        si: &SegmentInfo,
        context: &IOContext,
    ) -> Result<StoredFieldsWriter> {
        let open = |ext: &str, codec: &str| -> Result<Box<dyn IndexOutput>> {
            let name = segment_file_name(&si.name, "", ext);
            let mut out = directory.create_output(&name, context)?;
            codec_util::write_index_header(out.as_mut(), codec, VERSION_CURRENT, &si.id, "")?;
            Ok(out)
        };
        let fields_out = open(FIELDS_EXTENSION, FIELDS_CODEC)?;
        let index_out = open(FIELDS_INDEX_EXTENSION, FIELDS_INDEX_CODEC)?;
        Ok(StoredFieldsWriter {
            fields_out,
            index_out: Some(index_out),
            doc_starts: Vec::new(),
            pending: Vec::new(),
            pending_count: 0,
            in_doc: false,
        })
    }

    pub fn start_document(&mut self) {
        debug_assert!(!self.in_doc);
        self.in_doc = true;
        self.pending.clear();
        self.pending_count = 0;
    }

    pub fn write_field(&mut self, info: &FieldInfo, value: &VariantValue) -> Result<()> {
        if !self.in_doc {
            bail!(IllegalState("write_field called outside of a document".into()));
        }
        let out = &mut self.pending;
        out.write_vint(info.number as i32)?;
        match value {
            VariantValue::VString(s) => {
                out.write_byte(TYPE_STRING)?;
                out.write_string(s)?;
            }
            VariantValue::Binary(b) => {
                out.write_byte(TYPE_BINARY)?;
                out.write_vint(b.len() as i32)?;
                out.write_bytes(b, 0, b.len())?;
            }
            VariantValue::Bool(b) => {
                out.write_byte(TYPE_INT)?;
                out.write_zint(*b as i32)?;
            }
            VariantValue::Int(i) => {
                out.write_byte(TYPE_INT)?;
                out.write_zint(*i)?;
            }
            VariantValue::Long(l) => {
                out.write_byte(TYPE_LONG)?;
                out.write_zlong(*l)?;
            }
            VariantValue::Float(f) => {
                out.write_byte(TYPE_FLOAT)?;
                out.write_int(f.to_bits() as i32)?;
            }
            VariantValue::Double(d) => {
                out.write_byte(TYPE_DOUBLE)?;
                out.write_long(d.to_bits() as i64)?;
            }
        }
        self.pending_count += 1;
        Ok(())
    }

    pub fn finish_document(&mut self) -> Result<()> {
        if !self.in_doc {
            bail!(IllegalState("finish_document called outside of a document".into()));
        }
        self.doc_starts.push(self.fields_out.file_pointer());
        self.fields_out.write_vint(self.pending_count)?;
        self.fields_out
            .write_bytes(&self.pending, 0, self.pending.len())?;
        self.in_doc = false;
        Ok(())
    }

    /// Writes the index and the footers. `num_docs` must match the number of
    /// documents written.
    pub fn finish(&mut self, num_docs: usize) -> Result<()> {
        if num_docs != self.doc_starts.len() {
            bail!(IllegalArgument(format!(
                "wrote {} stored documents but the segment has {}",
                self.doc_starts.len(),
                num_docs
            )));
        }
        let mut index_out = match self.index_out.take() {
            Some(out) => out,
            None => bail!(IllegalState("stored fields writer is already finished".into())),
        };
        let end = self.fields_out.file_pointer();
        let bits = unsigned_bits_required(end).max(1);
        let mut starts = get_mutable_by_ratio(num_docs + 1, bits, COMPACT);
        for (i, start) in self.doc_starts.iter().enumerate() {
            starts.set(i, *start);
        }
        starts.set(num_docs, end);

        index_out.write_vint(num_docs as i32)?;
        let mut packed: Vec<u8> = Vec::new();
        starts.save(&mut packed)?;
        index_out.write_bytes(&packed, 0, packed.len())?;
        codec_util::write_footer(index_out.as_mut())?;
        codec_util::write_footer(self.fields_out.as_mut())
    }
}
