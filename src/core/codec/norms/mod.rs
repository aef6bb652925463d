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

//! Per-document norm bytes of indexed fields.
//!
//! A single `.nvd` file stores, for every field with norms, its number
//! followed by one byte per document.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::codec::codec_util;
use crate::core::codec::field_infos::FieldInfos;
use crate::core::codec::segment_infos::{segment_file_name, SegmentInfo};
use crate::core::store::directory::Directory;
use crate::core::store::io::{DataInput, DataOutput};
use crate::core::store::IOContext;
use crate::core::util::{Accountable, DocId};
use crate::error::ErrorKind::{CorruptIndex, IllegalArgument};
use crate::error::Result;

pub const NORMS_EXTENSION: &str = "nvd";
const NORMS_CODEC: &str = "QuarryNorms";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

/// The norms of one field, one byte per document.
#[derive(Debug, Clone)]
pub struct NormValues {
    bytes: Vec<u8>,
}

impl NormValues {
    pub fn new(bytes: Vec<u8>) -> NormValues {
        NormValues { bytes }
    }

    pub fn get(&self, doc: DocId) -> u8 {
        self.bytes[doc as usize]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Accountable for NormValues {
    fn ram_bytes_used(&self) -> usize {
        self.bytes.capacity()
    }
}

/// Writes the norms of a segment. `norms` maps field numbers to exactly
/// `max_doc` bytes each.
pub fn write_norms(
    directory: &dyn Directory,
    si: &SegmentInfo,
    norms: &[(u32, Vec<u8>)],
    context: &IOContext,
) -> Result<()> {
    let name = segment_file_name(&si.name, "", NORMS_EXTENSION);
    let mut out = directory.create_output(&name, context)?;
    codec_util::write_index_header(out.as_mut(), NORMS_CODEC, VERSION_CURRENT, &si.id, "")?;
    out.write_vint(norms.len() as i32)?;
    for (number, values) in norms {
        if values.len() != si.max_doc() as usize {
            bail!(IllegalArgument(format!(
                "field {} has {} norms but max_doc is {}",
                number,
                values.len(),
                si.max_doc()
            )));
        }
        out.write_vint(*number as i32)?;
        out.write_bytes(values, 0, values.len())?;
    }
    codec_util::write_footer(out.as_mut())
}

/// Norms of every field of a segment, loaded in memory.
#[derive(Default)]
pub struct NormsReader {
    norms: HashMap<u32, Arc<NormValues>>,
}

impl NormsReader {
    pub fn open(
        directory: &dyn Directory,
        si: &SegmentInfo,
        field_infos: &FieldInfos,
        context: &IOContext,
    ) -> Result<NormsReader> {
        let name = segment_file_name(&si.name, "", NORMS_EXTENSION);
        let mut input = directory.open_checksum_input(&name, context)?;
        codec_util::check_index_header(
            input.as_mut(),
            NORMS_CODEC,
            VERSION_START,
            VERSION_CURRENT,
            &si.id,
            "",
        )?;
        let num_fields = input.read_vint()?;
        let max_doc = si.max_doc() as usize;
        let mut norms = HashMap::with_capacity(num_fields.max(0) as usize);
        for _ in 0..num_fields {
            let number = input.read_vint()? as u32;
            match field_infos.field_info_by_number(number) {
                Some(info) if info.has_norms() => {}
                _ => bail!(CorruptIndex(format!(
                    "{}: field {} does not have norms",
                    name, number
                ))),
            }
            let mut bytes = vec![0u8; max_doc];
            input.read_bytes(&mut bytes, 0, max_doc)?;
            norms.insert(number, Arc::new(NormValues::new(bytes)));
        }
        codec_util::check_footer(input.as_mut())?;
        Ok(NormsReader { norms })
    }

    pub fn norms(&self, field_number: u32) -> Option<Arc<NormValues>> {
        self.norms.get(&field_number).map(Arc::clone)
    }
}

impl Accountable for NormsReader {
    fn ram_bytes_used(&self) -> usize {
        self.norms.values().map(|n| n.ram_bytes_used()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::field_infos::FieldInfosBuilder;
    use crate::core::index::IndexOptions;
    use crate::core::store::directory::{DirectoryRc, RAMDirectory};
    use crate::core::util::random_id;

    #[test]
    fn test_norms_round_trip() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let si = SegmentInfo::new(
            "_2",
            4,
            Arc::clone(&dir),
            false,
            HashMap::new(),
            random_id(),
            HashMap::new(),
        );
        let mut builder = FieldInfosBuilder::default();
        let number = builder
            .get_or_add("body", IndexOptions::DocsAndFreqs, false, false)
            .unwrap()
            .number;
        builder.get_or_add("id", IndexOptions::Docs, true, false).unwrap();
        let infos = builder.finish().unwrap();

        write_norms(dir.as_ref(), &si, &[(number, vec![1, 2, 3, 4])], &IOContext::Default)
            .unwrap();
        let reader = NormsReader::open(dir.as_ref(), &si, &infos, &IOContext::READ).unwrap();
        let norms = reader.norms(number).unwrap();
        assert_eq!(norms.get(2), 3);
        assert_eq!(norms.len(), 4);
        let id = infos.field_info_by_name("id").unwrap().number;
        assert!(reader.norms(id).is_none());
    }

    #[test]
    fn test_wrong_norm_count_is_rejected() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let si = SegmentInfo::new(
            "_3",
            4,
            Arc::clone(&dir),
            false,
            HashMap::new(),
            random_id(),
            HashMap::new(),
        );
        assert!(write_norms(dir.as_ref(), &si, &[(0, vec![1])], &IOContext::Default).is_err());
    }
}
