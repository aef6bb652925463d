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
use crate::core::codec::segment_infos::{
    segment_file_name, SegmentInfo, SEGMENT_USE_COMPOUND_NO, SEGMENT_USE_COMPOUND_YES,
};
use crate::core::store::directory::{Directory, DirectoryRc};
use crate::core::store::io::{DataOutput, IndexInput};
use crate::core::store::IOContext;
use crate::core::util::ID_LENGTH;
use crate::error::ErrorKind::CorruptIndex;
use crate::error::Result;

/// Extension of the per-segment info file.
pub const SI_EXTENSION: &str = "si";
const CODEC_NAME: &str = "QuarrySegmentInfo";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

fn read_segment_info_from_index<T: IndexInput + ?Sized>(
    input: &mut T,
    dir: &DirectoryRc,
    segment: &str,
    id: [u8; ID_LENGTH],
) -> Result<SegmentInfo> {
    codec_util::check_index_header(input, CODEC_NAME, VERSION_START, VERSION_CURRENT, &id, "")?;
    let doc_count = input.read_int()?;
    if doc_count < 0 {
        bail!(CorruptIndex(format!("invalid docCount: {}", doc_count)));
    }
    let is_compound_file = match input.read_byte()? {
        SEGMENT_USE_COMPOUND_YES => true,
        SEGMENT_USE_COMPOUND_NO => false,
        b => bail!(CorruptIndex(format!("invalid compound file flag: {}", b))),
    };

    let diagnostics = input.read_map_of_strings()?;
    let files = input.read_set_of_strings()?;
    let attributes = input.read_map_of_strings()?;

    let mut si = SegmentInfo::new(
        segment,
        doc_count,
        Arc::clone(dir),
        is_compound_file,
        diagnostics,
        id,
        attributes,
    );
    si.set_files(&files)?;

    Ok(si)
}

/// Reads the `.si` file of segment `segment_name`.
pub fn read_segment_info(
    directory: &DirectoryRc,
    segment_name: &str,
    segment_id: [u8; ID_LENGTH],
    context: &IOContext,
) -> Result<SegmentInfo> {
    let file_name = segment_file_name(segment_name, "", SI_EXTENSION);
    let mut checksum = directory.open_checksum_input(&file_name, context)?;
    let segment_info =
        read_segment_info_from_index(checksum.as_mut(), directory, segment_name, segment_id)?;
    codec_util::check_footer(checksum.as_mut())?;
    Ok(segment_info)
}

/// Writes the `.si` file of `info` and registers it in the segment's file
/// set.
pub fn write_segment_info(
    dir: &dyn Directory,
    info: &mut SegmentInfo,
    io_context: &IOContext,
) -> Result<()> {
    let file_name = segment_file_name(&info.name, "", SI_EXTENSION);
    info.add_file(&file_name)?;

    let mut output = dir.create_output(&file_name, io_context)?;
    codec_util::write_index_header(output.as_mut(), CODEC_NAME, VERSION_CURRENT, &info.id, "")?;
    output.write_int(info.max_doc())?;
    let flag = if info.is_compound_file() {
        SEGMENT_USE_COMPOUND_YES
    } else {
        SEGMENT_USE_COMPOUND_NO
    };
    output.write_byte(flag)?;
    output.write_map_of_strings(&info.diagnostics)?;
    output.write_set_of_strings(info.files())?;
    output.write_map_of_strings(info.attributes())?;
    codec_util::write_footer(output.as_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::directory::RAMDirectory;
    use crate::core::util::random_id;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_write_and_read_si() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let id = random_id();
        let mut diagnostics = HashMap::new();
        diagnostics.insert("source".to_string(), "flush".to_string());
        let mut si = SegmentInfo::new("_2", 7, Arc::clone(&dir), true, diagnostics, id, HashMap::new());
        si.put_attribute("k".into(), "v".into()).unwrap();
        let mut files = HashSet::new();
        files.insert("_2.cfs".to_string());
        files.insert("_2.cfe".to_string());
        si.set_files(&files).unwrap();
        write_segment_info(dir.as_ref(), &mut si, &IOContext::Default).unwrap();

        let read = read_segment_info(&dir, "_2", id, &IOContext::READ).unwrap();
        assert_eq!(read.max_doc(), 7);
        assert!(read.is_compound_file());
        assert_eq!(read.diagnostics["source"], "flush");
        assert_eq!(read.attribute("k"), Some("v"));
        assert_eq!(read.files().len(), 3);
        assert!(read.files().contains("_2.si"));

        // a different id is a different segment
        assert!(read_segment_info(&dir, "_2", random_id(), &IOContext::READ).is_err());
    }
}
