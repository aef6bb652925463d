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

use crate::core::codec::codec_util::{check_footer, check_index_header};
use crate::core::codec::codec_util::{write_footer, write_index_header};
use crate::core::codec::segment_infos::{file_name_from_generation, SegmentCommitInfo};
use crate::core::store::directory::Directory;
use crate::core::store::io::{DataInput, DataOutput};
use crate::core::store::IOContext;
use crate::core::util::bit_util::bits2words;
use crate::core::util::{to_base36, Bits, FixedBitSet};
use crate::error::ErrorKind::{CorruptIndex, IllegalArgument};
use crate::error::Result;

pub const LIVE_DOCS_EXTENSION: &str = "liv";
const CODEC_NAME: &str = "QuarryLiveDocs";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

/// Name of the live docs file of `segment` at `del_gen`, `None` when the
/// segment has no deletions.
pub fn live_docs_file_name(segment: &str, del_gen: i64) -> Option<String> {
    if del_gen <= 0 {
        None
    } else {
        file_name_from_generation(segment, LIVE_DOCS_EXTENSION, del_gen)
    }
}

/// Creates live docs with all bits set.
pub fn new_live_docs(size: usize) -> FixedBitSet {
    FixedBitSet::with_all_set(size)
}

/// Reads the live docs of `info` at its current deletion generation.
pub fn read_live_docs(
    dir: &dyn Directory,
    info: &SegmentCommitInfo,
    context: &IOContext,
) -> Result<FixedBitSet> {
    let gen = info.del_gen();
    let name = match live_docs_file_name(&info.info.name, gen) {
        Some(name) => name,
        None => bail!(IllegalArgument(format!("segment {} has no deletions", info.info.name))),
    };
    let length = info.info.max_doc() as usize;

    let mut input = dir.open_checksum_input(&name, context)?;
    check_index_header(
        input.as_mut(),
        CODEC_NAME,
        VERSION_START,
        VERSION_CURRENT,
        info.info.get_id(),
        &to_base36(gen as u64),
    )?;
    let num_words = bits2words(length);
    let mut words = Vec::with_capacity(num_words);
    for _ in 0..num_words {
        words.push(input.read_long()? as u64);
    }
    check_footer(input.as_mut())?;

    let bits = FixedBitSet::from_words(words, length)?;
    let deleted = length - bits.cardinality();
    if deleted != info.del_count() as usize {
        bail!(CorruptIndex(format!(
            "{}: bits.deleted={} info.del_count={}",
            name,
            deleted,
            info.del_count()
        )));
    }
    Ok(bits)
}

/// Writes `bits` as the live docs of `info` at its next write generation.
/// The caller advances the generation once the file is durable.
pub fn write_live_docs(
    dir: &dyn Directory,
    info: &SegmentCommitInfo,
    bits: &FixedBitSet,
    new_del_count: i32,
    context: &IOContext,
) -> Result<String> {
    let gen = info.next_write_del_gen();
    let name = match live_docs_file_name(&info.info.name, gen) {
        Some(name) => name,
        None => bail!(IllegalArgument(format!("invalid deletion generation {}", gen))),
    };
    let deleted = bits.len() - bits.cardinality();
    if deleted != (info.del_count() + new_del_count) as usize {
        bail!(CorruptIndex(format!(
            "{}: bits.deleted={} info.del_count={} new_del_count={}",
            name,
            deleted,
            info.del_count(),
            new_del_count
        )));
    }

    let mut output = dir.create_output(&name, context)?;
    write_index_header(
        output.as_mut(),
        CODEC_NAME,
        VERSION_CURRENT,
        info.info.get_id(),
        &to_base36(gen as u64),
    )?;
    for word in bits.words() {
        output.write_long(*word as i64)?;
    }
    write_footer(output.as_mut())?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::segment_infos::SegmentInfo;
    use crate::core::store::directory::{DirectoryRc, RAMDirectory};
    use crate::core::util::random_id;

    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_file_names() {
        assert_eq!(live_docs_file_name("_a", -1), None);
        assert_eq!(live_docs_file_name("_a", 1), Some("_a_1.liv".to_string()));
        assert_eq!(live_docs_file_name("_a", 36), Some("_a_10.liv".to_string()));
    }

    #[test]
    fn test_write_advance_read() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let si = SegmentInfo::new(
            "_0",
            70,
            Arc::clone(&dir),
            false,
            HashMap::new(),
            random_id(),
            HashMap::new(),
        );
        let info = SegmentCommitInfo::new(Arc::new(si), 0, -1);
        let mut bits = new_live_docs(70);
        bits.clear(3);
        bits.clear(65);

        let name = write_live_docs(dir.as_ref(), &info, &bits, 2, &IOContext::Default).unwrap();
        assert_eq!(name, "_0_1.liv");
        info.advance_del_gen();
        info.set_del_count(2).unwrap();
        assert!(info.files().contains(&name));

        let read = read_live_docs(dir.as_ref(), &info, &IOContext::READ).unwrap();
        assert!(!read.get_bit(3));
        assert!(!read.get_bit(65));
        assert!(read.get_bit(64));
        assert_eq!(read.cardinality(), 68);
    }

    #[test]
    fn test_mismatched_delete_count_is_corrupt() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let si = SegmentInfo::new(
            "_1",
            10,
            Arc::clone(&dir),
            false,
            HashMap::new(),
            random_id(),
            HashMap::new(),
        );
        let info = SegmentCommitInfo::new(Arc::new(si), 0, -1);
        let mut bits = new_live_docs(10);
        bits.clear(0);
        assert!(write_live_docs(dir.as_ref(), &info, &bits, 3, &IOContext::Default).is_err());
    }
}
