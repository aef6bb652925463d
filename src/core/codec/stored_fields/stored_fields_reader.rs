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
use crate::core::codec::field_infos::{FieldInfo, FieldInfos};
use crate::core::codec::segment_infos::{segment_file_name, SegmentInfo};
use crate::core::codec::stored_fields::*;
use crate::core::index::{Status, StoredFieldVisitor};
use crate::core::store::directory::Directory;
use crate::core::store::io::{DataInput, IndexInput};
use crate::core::store::IOContext;
use crate::core::util::packed::{get_reader, Reader};
use crate::core::util::DocId;
use crate::error::ErrorKind::{CorruptIndex, IllegalArgument};
use crate::error::Result;

/// Random access to the stored fields of a segment.
pub struct StoredFieldsReader {
    field_infos: Arc<FieldInfos>,
    fields_in: Box<dyn IndexInput>,
    doc_starts: Box<dyn Reader>,
    num_docs: usize,
}

impl StoredFieldsReader {
    pub fn open(
        directory: &dyn Directory,
        si: &SegmentInfo,
        field_infos: Arc<FieldInfos>,
        context: &IOContext,
    ) -> Result<StoredFieldsReader> {
        let index_name = segment_file_name(&si.name, "", FIELDS_INDEX_EXTENSION);
        let mut index_in = directory.open_checksum_input(&index_name, context)?;
        codec_util::check_index_header(
            index_in.as_mut(),
            FIELDS_INDEX_CODEC,
            VERSION_START,
            VERSION_CURRENT,
            &si.id,
            "",
        )?;
        let num_docs = index_in.read_vint()?;
        if num_docs != si.max_doc() {
            bail!(CorruptIndex(format!(
                "{}: {} stored docs but max_doc is {}",
                index_name,
                num_docs,
                si.max_doc()
            )));
        }
        let doc_starts = get_reader(index_in.as_mut())?;
        codec_util::check_footer(index_in.as_mut())?;

        let fields_name = segment_file_name(&si.name, "", FIELDS_EXTENSION);
        let mut fields_in = directory.open_input(&fields_name, context)?;
        codec_util::check_index_header(
            fields_in.as_mut(),
            FIELDS_CODEC,
            VERSION_START,
            VERSION_CURRENT,
            &si.id,
            "",
        )?;
        codec_util::retrieve_checksum(fields_in.as_mut())?;

        Ok(StoredFieldsReader {
            field_infos,
            fields_in,
            doc_starts,
            num_docs: num_docs as usize,
        })
    }

    pub fn check_integrity(&self) -> Result<()> {
        codec_util::checksum_entire_file(self.fields_in.as_ref())?;
        Ok(())
    }

    /// Feeds the stored fields of `doc` to `visitor`.
    pub fn visit_document(&self, doc: DocId, visitor: &mut dyn StoredFieldVisitor) -> Result<()> {
        if doc < 0 || doc as usize >= self.num_docs {
            bail!(IllegalArgument(format!(
                "doc {} out of bounds [0, {})",
                doc, self.num_docs
            )));
        }
        let mut input = self.fields_in.clone()?;
        input.seek(self.doc_starts.get(doc as usize))?;
        let num_fields = input.read_vint()?;
        for _ in 0..num_fields {
            let number = input.read_vint()?;
            let info = match self.field_infos.field_info_by_number(number as u32) {
                Some(info) => info,
                None => bail!(CorruptIndex(format!(
                    "unknown stored field number {} in {}",
                    number,
                    input.name()
                ))),
            };
            let kind = input.read_byte()?;
            match visitor.needs_field(info) {
                Status::Yes => read_field(input.as_mut(), visitor, info, kind)?,
                Status::No => skip_field(input.as_mut(), kind)?,
                Status::Stop => return Ok(()),
            }
        }
        Ok(())
    }
}

fn read_field<T: IndexInput + ?Sized>(
    input: &mut T,
    visitor: &mut dyn StoredFieldVisitor,
    info: &FieldInfo,
    kind: u8,
) -> Result<()> {
    match kind {
        TYPE_STRING | TYPE_BINARY => {
            let len = input.read_vint()? as usize;
            let mut bytes = vec![0u8; len];
            input.read_bytes(&mut bytes, 0, len)?;
            if kind == TYPE_STRING {
                visitor.string_field(info, bytes)
            } else {
                visitor.binary_field(info, bytes)
            }
        }
        TYPE_INT => visitor.int_field(info, input.read_zint()?),
        TYPE_LONG => visitor.long_field(info, input.read_zlong()?),
        TYPE_FLOAT => visitor.float_field(info, f32::from_bits(input.read_int()? as u32)),
        TYPE_DOUBLE => visitor.double_field(info, f64::from_bits(input.read_long()? as u64)),
        _ => bail!(CorruptIndex(format!("unknown stored field type: {}", kind))),
    }
}

fn skip_field<T: IndexInput + ?Sized>(input: &mut T, kind: u8) -> Result<()> {
    match kind {
        TYPE_STRING | TYPE_BINARY => {
            let len = input.read_vint()? as usize;
            input.skip_bytes(len)
        }
        TYPE_INT => input.read_zint().map(|_| ()),
        TYPE_LONG => input.read_zlong().map(|_| ()),
        TYPE_FLOAT => input.skip_bytes(4),
        TYPE_DOUBLE => input.skip_bytes(8),
        _ => bail!(CorruptIndex(format!("unknown stored field type: {}", kind))),
    }
}
