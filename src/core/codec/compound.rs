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

//! Compound files pack the files of a segment into two files.
//!
//! * `.cfs`: header, the concatenated data of every sub-file (each keeps
//!   its own header and footer), footer.
//! * `.cfe`: header, file count, then `(name without segment, offset,
//!   length)` per sub-file, footer.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::core::codec::codec_util;
use crate::core::codec::segment_infos::{segment_file_name, strip_segment_name, SegmentInfo};
use crate::core::store::directory::{Directory, DirectoryRc};
use crate::core::store::io::{DataInput, DataOutput, IndexInput, IndexOutput};
use crate::core::store::{IOContext, Lock};
use crate::error::ErrorKind::{CorruptIndex, UnsupportedOperation};
use crate::error::Result;

pub const DATA_EXTENSION: &str = "cfs";
pub const ENTRIES_EXTENSION: &str = "cfe";
const DATA_CODEC: &str = "QuarryCompoundData";
const ENTRY_CODEC: &str = "QuarryCompoundEntries";
const VERSION_START: i32 = 0;
const VERSION_CURRENT: i32 = VERSION_START;

/// Packs every file of `si` into its compound file. Returns the names of
/// the two compound files; the caller deletes the packed files.
pub fn write_compound_file(
    dir: &dyn Directory,
    si: &SegmentInfo,
    context: &IOContext,
) -> Result<Vec<String>> {
    let data_file = segment_file_name(&si.name, "", DATA_EXTENSION);
    let entries_file = segment_file_name(&si.name, "", ENTRIES_EXTENSION);

    let mut data = dir.create_output(&data_file, context)?;
    let mut entries = dir.create_output(&entries_file, context)?;
    codec_util::write_index_header(data.as_mut(), DATA_CODEC, VERSION_CURRENT, si.get_id(), "")?;
    codec_util::write_index_header(
        entries.as_mut(),
        ENTRY_CODEC,
        VERSION_CURRENT,
        si.get_id(),
        "",
    )?;

    let mut files: Vec<&String> = si.files().iter().collect();
    files.sort();
    entries.write_vint(files.len() as i32)?;
    for file in files {
        let start_offset = data.file_pointer();
        copy_verified(dir, file, data.as_mut())?;
        let length = data.file_pointer() - start_offset;

        entries.write_string(strip_segment_name(file))?;
        entries.write_long(start_offset)?;
        entries.write_long(length)?;
    }

    codec_util::write_footer(data.as_mut())?;
    codec_util::write_footer(entries.as_mut())?;
    Ok(vec![data_file, entries_file])
}

/// Copies `file` into `out`, verifying its checksum on the way.
fn copy_verified(dir: &dyn Directory, file: &str, out: &mut dyn IndexOutput) -> Result<()> {
    let mut input = dir.open_checksum_input(file, &IOContext::READ_ONCE)?;
    let footer = codec_util::footer_length();
    if (input.len() as usize) < footer {
        bail!(CorruptIndex(format!("{} is too short to hold a footer", file)));
    }
    let len = input.len() as usize - footer;
    let mut bytes = vec![0u8; len];
    input.read_bytes(&mut bytes, 0, len)?;
    let checksum = codec_util::check_footer(input.as_mut())?;

    out.write_bytes(&bytes, 0, len)?;
    // the footer of the incoming file, not the running checksum of `out`
    out.write_int(codec_util::FOOTER_MAGIC)?;
    out.write_int(0)?;
    out.write_long(checksum)
}

#[derive(Debug, Clone, Copy)]
struct FileEntry {
    offset: i64,
    length: i64,
}

/// Read-only `Directory` over the sub-files of a compound file.
pub struct CompoundFileDirectory {
    directory: DirectoryRc,
    name: String,
    entries: BTreeMap<String, FileEntry>,
    input: Box<dyn IndexInput>,
}

impl CompoundFileDirectory {
    pub fn open(
        directory: DirectoryRc,
        si: &SegmentInfo,
        context: &IOContext,
    ) -> Result<CompoundFileDirectory> {
        let data_file = segment_file_name(&si.name, "", DATA_EXTENSION);
        let entries_file = segment_file_name(&si.name, "", ENTRIES_EXTENSION);
        let (version, entries) = Self::read_entries(si, directory.as_ref(), &entries_file)?;

        let mut expected_length = codec_util::index_header_length(DATA_CODEC, "") as i64;
        for e in entries.values() {
            expected_length += e.length;
        }
        expected_length += codec_util::footer_length() as i64;

        let mut input = directory.open_input(&data_file, context)?;
        codec_util::check_index_header(
            input.as_mut(),
            DATA_CODEC,
            version,
            version,
            si.get_id(),
            "",
        )?;
        codec_util::retrieve_checksum(input.as_mut())?;
        if input.len() as i64 != expected_length {
            bail!(CorruptIndex(format!(
                "{}: length should be {} bytes, but is {} instead",
                data_file,
                expected_length,
                input.len()
            )));
        }
        Ok(CompoundFileDirectory {
            directory,
            name: si.name.clone(),
            entries,
            input,
        })
    }

    fn read_entries(
        si: &SegmentInfo,
        directory: &dyn Directory,
        entries_file: &str,
    ) -> Result<(i32, BTreeMap<String, FileEntry>)> {
        let mut input = directory.open_checksum_input(entries_file, &IOContext::READ_ONCE)?;
        let version = codec_util::check_index_header(
            input.as_mut(),
            ENTRY_CODEC,
            VERSION_START,
            VERSION_CURRENT,
            si.get_id(),
            "",
        )?;
        let num_entries = input.read_vint()?;
        let mut mappings = BTreeMap::new();
        for _ in 0..num_entries {
            let id = input.read_string()?;
            let offset = input.read_long()?;
            let length = input.read_long()?;
            if mappings
                .insert(id.clone(), FileEntry { offset, length })
                .is_some()
            {
                bail!(CorruptIndex(format!(
                    "duplicate cfs entry id={} in {}",
                    id, entries_file
                )));
            }
        }
        codec_util::check_footer(input.as_mut())?;
        Ok((version, mappings))
    }

    fn entry(&self, name: &str) -> Result<FileEntry> {
        match self.entries.get(strip_segment_name(name)) {
            Some(e) => Ok(*e),
            None => bail!(::std::io::Error::new(
                ::std::io::ErrorKind::NotFound,
                format!(
                    "no sub-file {} in compound file {}.{}",
                    name, self.name, DATA_EXTENSION
                ),
            )),
        }
    }

    fn read_only<T>(&self, op: &'static str) -> Result<T> {
        bail!(UnsupportedOperation(Cow::Owned(format!(
            "{} on read-only compound file {}",
            op, self.name
        ))))
    }
}

impl Directory for CompoundFileDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        Ok(self
            .entries
            .keys()
            .map(|n| format!("{}{}", self.name, n))
            .collect())
    }

    fn file_length(&self, name: &str) -> Result<i64> {
        self.entry(name).map(|e| e.length)
    }

    fn create_output(&self, _name: &str, _ctx: &IOContext) -> Result<Box<dyn IndexOutput>> {
        self.read_only("create_output")
    }

    fn open_input(&self, name: &str, _ctx: &IOContext) -> Result<Box<dyn IndexInput>> {
        let entry = self.entry(name)?;
        self.input.slice(name, entry.offset, entry.length)
    }

    fn obtain_lock(&self, _name: &str) -> Result<Box<dyn Lock>> {
        self.read_only("obtain_lock")
    }

    fn lock_id(&self) -> String {
        self.directory.lock_id()
    }

    fn delete_file(&self, _name: &str) -> Result<()> {
        self.read_only("delete_file")
    }

    fn sync(&self, _names: &HashSet<String>) -> Result<()> {
        self.read_only("sync")
    }

    fn sync_meta_data(&self) -> Result<()> {
        Ok(())
    }

    fn rename(&self, _source: &str, _dest: &str) -> Result<()> {
        self.read_only("rename")
    }
}

impl fmt::Display for CompoundFileDirectory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CompoundFileDirectory({}, {})", self.name, self.directory)
    }
}

/// Opens the directory the files of `si` are read from.
pub fn segment_directory(
    directory: &DirectoryRc,
    si: &SegmentInfo,
    context: &IOContext,
) -> Result<DirectoryRc> {
    if si.is_compound_file() {
        Ok(Arc::new(CompoundFileDirectory::open(
            Arc::clone(directory),
            si,
            context,
        )?))
    } else {
        Ok(Arc::clone(directory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::field_infos::{read_field_infos, write_field_infos, FieldInfosBuilder};
    use crate::core::index::IndexOptions;
    use crate::core::store::directory::RAMDirectory;
    use crate::core::util::random_id;

    use std::collections::HashMap;

    #[test]
    fn test_pack_and_read_sub_files() {
        let dir: DirectoryRc = Arc::new(RAMDirectory::new());
        let mut si = SegmentInfo::new(
            "_5",
            1,
            Arc::clone(&dir),
            false,
            HashMap::new(),
            random_id(),
            HashMap::new(),
        );
        let mut builder = FieldInfosBuilder::default();
        builder.get_or_add("f", IndexOptions::Docs, false, false).unwrap();
        let infos = builder.finish().unwrap();
        write_field_infos(dir.as_ref(), &si, &infos, &IOContext::Default).unwrap();
        si.add_file("_5.fnm").unwrap();

        let written = write_compound_file(dir.as_ref(), &si, &IOContext::Default).unwrap();
        assert_eq!(written, vec!["_5.cfs".to_string(), "_5.cfe".to_string()]);
        dir.delete_file("_5.fnm").unwrap();
        si.set_use_compound_file();

        let cfs = segment_directory(&dir, &si, &IOContext::READ).unwrap();
        assert_eq!(cfs.list_all().unwrap(), vec!["_5.fnm".to_string()]);
        let read = read_field_infos(cfs.as_ref(), &si, &IOContext::READ).unwrap();
        assert!(read.field_info_by_name("f").is_some());
        assert!(cfs.delete_file("_5.fnm").is_err());
        assert!(cfs.open_input("_5.tim", &IOContext::READ).is_err());
    }
}
