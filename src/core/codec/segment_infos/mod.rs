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

mod segment_infos;

pub use self::segment_infos::*;

mod segment_infos_format;

pub use self::segment_infos_format::*;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;

use regex::Regex;

use crate::core::codec::field_infos::FieldInfos;
use crate::core::codec::live_docs::live_docs_file_name;
use crate::core::store::directory::DirectoryRc;
use crate::core::store::IOContext;
use crate::core::util::{from_base36, to_base36, ID_LENGTH};

use crate::error::{
    ErrorKind::{IllegalArgument, IllegalState},
    Result,
};

// index file names
pub const INDEX_FILE_SEGMENTS: &str = "segments";
pub const INDEX_FILE_PENDING_SEGMENTS: &str = "pending_segments";

pub const CODEC_FILE_PATTERN: &str = r"^_[a-z0-9]+(_.*)?\..*$";

lazy_static! {
    static ref CODEC_FILE_REGEX: Regex = Regex::new(CODEC_FILE_PATTERN).unwrap();
}

/// Returns true if `filename` looks like a per-segment codec file.
pub fn is_codec_file(filename: &str) -> bool {
    CODEC_FILE_REGEX.is_match(filename)
}

// locates the boundary of the segment name, or None
fn index_of_segment_name(filename: &str) -> Option<usize> {
    if filename.len() < 2 {
        return None;
    }
    // If it is a .liv file, there's an '_' after the first character
    let filename = &filename[1..];
    if let Some(i) = filename.find('_') {
        return Some(i + 1);
    }
    filename.find('.').map(|i| i + 1)
}

pub fn strip_segment_name(name: &str) -> &str {
    if let Some(idx) = index_of_segment_name(name) {
        &name[idx..]
    } else {
        name
    }
}

pub fn segment_file_name(name: &str, suffix: &str, ext: &str) -> String {
    if !ext.is_empty() || !suffix.is_empty() {
        debug_assert!(!ext.starts_with('.'));
        let mut filename = String::with_capacity(name.len() + 2 + suffix.len() + ext.len());
        filename.push_str(name);
        if !suffix.is_empty() {
            filename.push('_');
            filename.push_str(suffix);
        }
        if !ext.is_empty() {
            filename.push('.');
            filename.push_str(ext);
        }
        filename
    } else {
        String::from(name)
    }
}

/// Computes the full file name from base, extension and generation. A
/// generation of -1 means the file does not exist, 0 means no generation
/// suffix.
pub fn file_name_from_generation(base: &str, ext: &str, gen: i64) -> Option<String> {
    if gen == -1 {
        None
    } else if gen == 0 {
        Some(segment_file_name(base, "", ext))
    } else {
        let mut res = String::with_capacity(base.len() + 14 + ext.len());
        res.push_str(base);
        res.push('_');
        res += &to_base36(gen as u64);
        if !ext.is_empty() {
            res.push('.');
            res.push_str(ext);
        }
        Some(res)
    }
}

/// Returns the generation from this file name, or 0 if there is no
/// generation.
pub fn parse_generation(filename: &str) -> Result<i64> {
    debug_assert!(filename.starts_with('_'));
    let parts: Vec<&str> = strip_extension(filename)[1..].split('_').collect();
    // segment.ext or segment_gen.ext
    if parts.len() == 2 {
        Ok(from_base36(parts[1])? as i64)
    } else {
        Ok(0)
    }
}

/// Parses the segment name out of the given file name, or returns the file
/// name if it does not contain a '.' and '_'.
pub fn parse_segment_name(filename: &str) -> &str {
    if let Some(idx) = index_of_segment_name(filename) {
        &filename[..idx]
    } else {
        filename
    }
}

/// Removes the extension (anything after the first '.'),
/// otherwise returns the original filename.
fn strip_extension(filename: &str) -> &str {
    if let Some(idx) = filename.find('.') {
        &filename[..idx]
    } else {
        filename
    }
}

pub const SEGMENT_USE_COMPOUND_YES: u8 = 0x01;
pub const SEGMENT_USE_COMPOUND_NO: u8 = 0xff;

/// Information about a segment such as its name, directory, and files
/// related to the segment.
#[derive(Serialize)]
pub struct SegmentInfo {
    pub name: String,
    pub max_doc: i32,
    #[serde(skip)]
    pub directory: DirectoryRc,
    #[serde(skip)]
    is_compound_file: AtomicBool,
    pub id: [u8; ID_LENGTH],
    pub diagnostics: HashMap<String, String>,
    attributes: HashMap<String, String>,
    set_files: HashSet<String>,
}

impl SegmentInfo {
    pub fn new(
        name: &str,
        max_doc: i32,
        directory: DirectoryRc,
        is_compound_file: bool,
        diagnostics: HashMap<String, String>,
        id: [u8; ID_LENGTH],
        attributes: HashMap<String, String>,
    ) -> SegmentInfo {
        SegmentInfo {
            name: String::from(name),
            max_doc,
            directory,
            is_compound_file: AtomicBool::new(is_compound_file),
            id,
            diagnostics,
            attributes,
            set_files: HashSet::new(),
        }
    }

    pub fn max_doc(&self) -> i32 {
        debug_assert!(self.max_doc >= 0);
        self.max_doc
    }

    pub fn set_max_doc(&mut self, max_doc: i32) -> Result<()> {
        if self.max_doc != -1 {
            bail!(IllegalState("max_doc was already set".into()));
        }
        self.max_doc = max_doc;
        Ok(())
    }

    pub fn is_compound_file(&self) -> bool {
        self.is_compound_file.load(AtomicOrdering::Acquire)
    }

    pub fn set_use_compound_file(&self) {
        self.is_compound_file.store(true, AtomicOrdering::Release)
    }

    pub fn get_id(&self) -> &[u8] {
        &self.id
    }

    /// Return all files referenced by this SegmentInfo.
    pub fn files(&self) -> &HashSet<String> {
        &self.set_files
    }

    pub fn set_files(&mut self, files: &HashSet<String>) -> Result<()> {
        self.set_files = HashSet::with_capacity(files.len());
        self.add_files(files)
    }

    pub fn add_file(&mut self, file: &str) -> Result<()> {
        check_file_name(file)?;
        let file = self.named_for_this_segment(file);
        self.set_files.insert(file);
        Ok(())
    }

    pub fn add_files(&mut self, files: &HashSet<String>) -> Result<()> {
        for f in files {
            check_file_name(f)?;
        }
        for f in files {
            let file = self.named_for_this_segment(&f);
            self.set_files.insert(file);
        }
        Ok(())
    }

    fn named_for_this_segment(&self, file: &str) -> String {
        let mut name = self.name.clone();
        name.push_str(strip_segment_name(file));
        name
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attributes are append only: a key may be set again only to the value
    /// it already holds.
    pub fn put_attribute(&mut self, key: String, value: String) -> Result<()> {
        if let Some(existing) = self.attributes.get(&key) {
            if existing != &value {
                bail!(IllegalState(format!(
                    "segment {} attribute '{}' is already set to '{}'",
                    self.name, key, existing
                )));
            }
            return Ok(());
        }
        self.attributes.insert(key, value);
        Ok(())
    }
}

fn check_file_name(file: &str) -> Result<()> {
    if !is_codec_file(file) {
        bail!(IllegalArgument(format!("invalid codec file_name: {}", file)));
    }
    if file.to_lowercase().ends_with(".tmp") {
        bail!(IllegalArgument(format!(
            "invalid codec file_name {}, can't end with .tmp extension",
            file
        )));
    }
    Ok(())
}

impl Clone for SegmentInfo {
    fn clone(&self) -> Self {
        SegmentInfo {
            name: self.name.clone(),
            max_doc: self.max_doc,
            is_compound_file: AtomicBool::new(self.is_compound_file()),
            directory: Arc::clone(&self.directory),
            id: self.id,
            diagnostics: self.diagnostics.clone(),
            attributes: self.attributes.clone(),
            set_files: self.set_files.clone(),
        }
    }
}

impl Hash for SegmentInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.name.as_bytes());
    }
}

impl fmt::Debug for SegmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Ok(s) = ::serde_json::to_string_pretty(self) {
            write!(f, "{}", s)?;
        }

        Ok(())
    }
}

/// Embeds a read-only `SegmentInfo` and adds per-commit fields.
pub struct SegmentCommitInfo {
    pub info: Arc<SegmentInfo>,
    /// How many deleted docs in the segment.
    del_count: AtomicI32,
    /// Generation number of the live docs file (-1 if there are no deletes
    /// yet).
    del_gen: AtomicI64,
    /// Normally 1+del_gen, unless a failure was hit on the last attempt to
    /// write.
    next_write_del_gen: AtomicI64,
    size_in_bytes: AtomicI64,
}

impl SegmentCommitInfo {
    pub fn new(info: Arc<SegmentInfo>, del_count: i32, del_gen: i64) -> SegmentCommitInfo {
        SegmentCommitInfo {
            info,
            del_count: AtomicI32::new(del_count),
            del_gen: AtomicI64::new(del_gen),
            next_write_del_gen: AtomicI64::new(if del_gen == -1 { 1i64 } else { del_gen + 1 }),
            size_in_bytes: AtomicI64::new(-1),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// All files in use by this segment, including the current live docs
    /// file.
    pub fn files(&self) -> HashSet<String> {
        let mut files = self.info.files().clone();
        if let Some(liv) = live_docs_file_name(&self.info.name, self.del_gen()) {
            files.insert(liv);
        }
        files
    }

    pub fn has_deletions(&self) -> bool {
        self.del_gen() != -1
    }

    pub fn del_count(&self) -> i32 {
        self.del_count.load(AtomicOrdering::Acquire)
    }

    pub fn set_del_count(&self, del_count: i32) -> Result<()> {
        if del_count < 0 || del_count > self.info.max_doc() {
            bail!(IllegalArgument(format!(
                "invalid del_count {} for segment {}",
                del_count, self.info.name
            )));
        }
        self.del_count.store(del_count, AtomicOrdering::Release);
        Ok(())
    }

    pub fn num_docs(&self) -> i32 {
        self.info.max_doc() - self.del_count()
    }

    pub fn del_gen(&self) -> i64 {
        self.del_gen.load(AtomicOrdering::Acquire)
    }

    pub fn next_write_del_gen(&self) -> i64 {
        self.next_write_del_gen.load(AtomicOrdering::Acquire)
    }

    /// Called after a failed write of a live docs file, so the next attempt
    /// does not reuse the partially written file name.
    pub fn advance_next_write_del_gen(&self) {
        self.next_write_del_gen.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Called once a new live docs file was written; the deletion
    /// generation only ever increases.
    pub fn advance_del_gen(&self) {
        self.del_gen.store(
            self.next_write_del_gen.load(AtomicOrdering::Acquire),
            AtomicOrdering::Release,
        );
        self.next_write_del_gen.fetch_add(1, AtomicOrdering::AcqRel);
        self.size_in_bytes.store(-1, AtomicOrdering::Release);
    }

    pub fn size_in_bytes(&self) -> i64 {
        let mut size = self.size_in_bytes.load(AtomicOrdering::Acquire);
        if size == -1 {
            let mut sum = 0;
            for name in self.files() {
                match self.info.directory.file_length(&name) {
                    Ok(l) => {
                        sum += l;
                    }
                    Err(e) => {
                        warn!("get file '{}' length failed by '{:?}'", name, e);
                    }
                }
            }
            size = sum;
            self.size_in_bytes.store(size, AtomicOrdering::Release);
        }
        size
    }
}

impl Clone for SegmentCommitInfo {
    fn clone(&self) -> Self {
        let info = SegmentCommitInfo::new(Arc::clone(&self.info), self.del_count(), self.del_gen());
        info.next_write_del_gen
            .store(self.next_write_del_gen(), AtomicOrdering::Release);
        info
    }
}

impl Hash for SegmentCommitInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.info.hash(state);
    }
}

impl Eq for SegmentCommitInfo {}

impl PartialEq for SegmentCommitInfo {
    fn eq(&self, other: &SegmentCommitInfo) -> bool {
        self.info.name.eq(&other.info.name)
    }
}

impl fmt::Display for SegmentCommitInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}{}",
            self.info.name,
            if self.info.is_compound_file() { "c" } else { "C" },
            self.info.max_doc
        )?;
        if self.del_count() > 0 {
            write!(f, "/{}", self.del_count())?;
        }
        if self.has_deletions() {
            write!(f, ":delGen={}", self.del_gen())?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for SegmentCommitInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Holder of common parameters used while writing a segment.
pub struct SegmentWriteState {
    /// Directory where this segment will be written to, normally a
    /// `TrackingDirectoryWrapper`.
    pub directory: DirectoryRc,
    pub segment_info: SegmentInfo,
    pub field_infos: Arc<FieldInfos>,
    pub context: IOContext,
}

impl SegmentWriteState {
    pub fn new(
        directory: DirectoryRc,
        segment_info: SegmentInfo,
        field_infos: Arc<FieldInfos>,
        context: IOContext,
    ) -> Self {
        SegmentWriteState {
            directory,
            segment_info,
            field_infos,
            context,
        }
    }
}

/// Holder of common parameters used while reading a segment.
pub struct SegmentReadState<'a> {
    /// Directory where the segment is read from, either the index directory
    /// or its compound file.
    pub directory: DirectoryRc,
    pub segment_info: &'a SegmentInfo,
    pub field_infos: Arc<FieldInfos>,
    pub context: IOContext,
}

impl<'a> SegmentReadState<'a> {
    pub fn new(
        directory: DirectoryRc,
        segment_info: &'a SegmentInfo,
        field_infos: Arc<FieldInfos>,
        context: IOContext,
    ) -> SegmentReadState<'a> {
        SegmentReadState {
            directory,
            segment_info,
            field_infos,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::directory::RAMDirectory;
    use crate::core::util::random_id;

    fn new_info(name: &str) -> SegmentInfo {
        SegmentInfo::new(
            name,
            10,
            Arc::new(RAMDirectory::new()),
            false,
            HashMap::new(),
            random_id(),
            HashMap::new(),
        )
    }

    #[test]
    fn test_file_names() {
        assert_eq!(segment_file_name("_3", "", "tim"), "_3.tim");
        assert_eq!(
            file_name_from_generation(INDEX_FILE_SEGMENTS, "", 37),
            Some("segments_11".to_string())
        );
        assert_eq!(file_name_from_generation("_a", "liv", -1), None);
        assert_eq!(parse_generation("_a_11.liv").unwrap(), 37);
        assert_eq!(parse_generation("_a.tim").unwrap(), 0);
        assert_eq!(parse_segment_name("_a_11.liv"), "_a");
        assert_eq!(parse_segment_name("_a.tim"), "_a");
        assert_eq!(strip_segment_name("_a.tim"), ".tim");
        assert!(is_codec_file("_a.tim"));
        assert!(!is_codec_file("segments_2"));
    }

    #[test]
    fn test_attributes_are_append_only() {
        let mut si = new_info("_0");
        si.put_attribute("k".into(), "v".into()).unwrap();
        si.put_attribute("k".into(), "v".into()).unwrap();
        assert!(si.put_attribute("k".into(), "other".into()).is_err());
        assert_eq!(si.attribute("k"), Some("v"));
    }

    #[test]
    fn test_files_are_renamed_for_segment() {
        let mut si = new_info("_5");
        let mut files = HashSet::new();
        files.insert("_5.tim".to_string());
        files.insert("_5.doc".to_string());
        si.set_files(&files).unwrap();
        assert_eq!(si.files().len(), 2);
        assert!(si.add_file("write.lock").is_err());
        assert!(si.add_file("_5.tmp").is_err());
    }

    #[test]
    fn test_del_gen_only_increases() {
        let sci = SegmentCommitInfo::new(Arc::new(new_info("_1")), 0, -1);
        assert!(!sci.has_deletions());
        assert_eq!(sci.next_write_del_gen(), 1);
        sci.advance_del_gen();
        assert_eq!(sci.del_gen(), 1);
        sci.advance_next_write_del_gen();
        sci.advance_del_gen();
        assert_eq!(sci.del_gen(), 3);
        assert!(sci.files().contains("_1_3.liv"));

        let snapshot = sci.clone();
        sci.advance_del_gen();
        assert_eq!(snapshot.del_gen(), 3);
        assert_eq!(snapshot, sci);
        assert!(sci.set_del_count(11).is_err());
    }
}
