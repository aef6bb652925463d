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
use crate::core::codec::field_infos::{FieldInfo, FieldInfos};
use crate::core::codec::segment_infos::{segment_file_name, SegmentInfo};
use crate::core::index::IndexOptions;
use crate::core::store::directory::Directory;
use crate::core::store::io::{DataOutput, IndexInput};
use crate::core::store::IOContext;
use crate::error::{ErrorKind::CorruptIndex, Result};

/// Extension of field infos
pub const FIELD_INFOS_EXTENSION: &str = "fnm";

// Codec header
const CODEC_NAME: &str = "QuarryFieldInfos";
const FORMAT_START: i32 = 0;
const FORMAT_CURRENT: i32 = FORMAT_START;

// Field flags
const OMIT_NORMS: u8 = 0x1;
const STORE_PAYLOADS: u8 = 0x2;

fn read_field_infos_from_index<T: IndexInput + ?Sized>(
    input: &mut T,
    segment_info: &SegmentInfo,
) -> Result<Vec<FieldInfo>> {
    codec_util::check_index_header(
        input,
        CODEC_NAME,
        FORMAT_START,
        FORMAT_CURRENT,
        &segment_info.id,
        "",
    )?;

    let size = input.read_vint()?;
    if size < 0 {
        bail!(CorruptIndex(format!("invalid field count: {}", size)));
    }
    let mut infos = Vec::with_capacity(size as usize);
    for _ in 0..size {
        let name = input.read_string()?;
        let field_number = input.read_vint()?;
        if field_number < 0 {
            bail!(CorruptIndex(format!(
                "invalid field number for field: {}, field_number={}",
                name, field_number
            )));
        }
        let index_options = IndexOptions::from_byte(input.read_byte()?)?;
        let bits = input.read_byte()?;
        let attributes = input.read_map_of_strings()?;
        infos.push(FieldInfo::new(
            name,
            field_number as u32,
            index_options,
            bits & OMIT_NORMS != 0,
            bits & STORE_PAYLOADS != 0,
            attributes,
        )?);
    }
    Ok(infos)
}

/// Reads the `.fnm` file of a segment.
pub fn read_field_infos(
    directory: &dyn Directory,
    segment_info: &SegmentInfo,
    context: &IOContext,
) -> Result<FieldInfos> {
    let file_name = segment_file_name(&segment_info.name, "", FIELD_INFOS_EXTENSION);
    let mut input = directory.open_checksum_input(&file_name, context)?;
    let infos = read_field_infos_from_index(input.as_mut(), segment_info)?;
    codec_util::check_footer(input.as_mut())?;
    FieldInfos::new(infos)
}

/// Writes the `.fnm` file of a segment, fields in number order.
pub fn write_field_infos(
    directory: &dyn Directory,
    segment_info: &SegmentInfo,
    infos: &FieldInfos,
    context: &IOContext,
) -> Result<()> {
    let file_name = segment_file_name(&segment_info.name, "", FIELD_INFOS_EXTENSION);
    let mut output = directory.create_output(&file_name, context)?;
    codec_util::write_index_header(
        output.as_mut(),
        CODEC_NAME,
        FORMAT_CURRENT,
        &segment_info.id,
        "",
    )?;
    output.write_vint(infos.len() as i32)?;
    for fi in infos.iter() {
        output.write_string(&fi.name)?;
        output.write_vint(fi.number as i32)?;
        output.write_byte(fi.index_options.as_byte())?;
        let mut bits = 0u8;
        if fi.omit_norms {
            bits |= OMIT_NORMS;
        }
        if fi.has_store_payloads {
            bits |= STORE_PAYLOADS;
        }
        output.write_byte(bits)?;
        output.write_map_of_strings(&fi.attributes)?;
    }
    codec_util::write_footer(output.as_mut())
}
