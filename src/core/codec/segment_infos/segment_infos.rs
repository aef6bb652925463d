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

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::core::codec::codec_util::{
    check_footer, check_header_no_magic, check_index_header_suffix, write_footer,
    write_index_header, CODEC_MAGIC,
};
use crate::core::codec::segment_infos::{
    file_name_from_generation, read_segment_info, SegmentCommitInfo,
    INDEX_FILE_PENDING_SEGMENTS, INDEX_FILE_SEGMENTS,
};
use crate::core::codec::CODEC_NAME;
use crate::core::index::merge::OneMerge;
use crate::core::index::writer::CommitPoint;
use crate::core::store::directory::{Directory, DirectoryRc};
use crate::core::store::io::{DataInput, DataOutput, IndexInput, IndexOutput};
use crate::core::store::IOContext;
use crate::core::util::{from_base36, random_id, to_base36, ID_LENGTH};
use crate::error::ErrorKind::{CorruptIndex, IllegalState, IndexNotFound};
use crate::error::Result;

const SEGMENT_VERSION_START: i32 = 1;
/// Adds the user data map at the end of the commit.
const SEGMENT_VERSION_USER_DATA: i32 = 2;
const SEGMENT_VERSION_CURRENT: i32 = SEGMENT_VERSION_USER_DATA;

/// A collection of segment infos with methods for operating on those
/// segments in relation to the directory.
///
/// The active segments in the index are stored in the segment info file,
/// `segments_N`. There may be one or more `segments_N` files in the index;
/// however, the one with the largest generation is the active one (when
/// older segments_N files are present it's because they temporarily cannot
/// be deleted, or a custom `IndexDeletionPolicy` is in use).
pub struct SegmentInfos {
    /// Used to name new segments.
    pub counter: i32,
    /// Counts how often the index has been changed.
    pub version: i64,
    // generation of the "segments_N" for the next commit
    pub generation: i64,
    // generation of the "segments_N" file we last successfully read or
    // wrote; this is normally the same as generation except if a failure
    // interrupted a commit
    pub last_generation: i64,
    pub segments: Vec<Arc<SegmentCommitInfo>>,
    /// Id for this commit.
    pub id: [u8; ID_LENGTH],
    /// Opaque map that the application can use to store data with the
    /// commit.
    pub user_data: HashMap<String, String>,
    // Only true after prepare_commit has been called and
    // before finish_commit is called
    pending_commit: bool,
}

impl Default for SegmentInfos {
    fn default() -> Self {
        SegmentInfos {
            counter: 0,
            version: 0,
            generation: 0,
            last_generation: 0,
            segments: vec![],
            id: random_id(),
            user_data: HashMap::new(),
            pending_commit: false,
        }
    }
}

impl SegmentInfos {
    /// return generation of the next pending_segments_N that will be written
    fn next_pending_generation(&self) -> i64 {
        if self.generation == -1 {
            1
        } else {
            self.generation + 1
        }
    }

    /// Get the segments_N filename in use by this segment infos.
    pub fn segment_file_name(&self) -> Option<String> {
        file_name_from_generation(INDEX_FILE_SEGMENTS, "", self.last_generation)
    }

    /// Name of the segments file the next commit will write.
    pub fn next_segment_file_name(&self) -> Option<String> {
        file_name_from_generation(INDEX_FILE_SEGMENTS, "", self.next_pending_generation())
    }

    /// Returns number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_pending_commit(&self) -> bool {
        self.pending_commit
    }

    pub fn rollback_commit(&mut self, dir: &dyn Directory) {
        if self.pending_commit {
            self.pending_commit = false;

            // Must carefully compute file name from "generation"
            // since last_generation isn't incremented:
            if let Some(pending) =
                file_name_from_generation(INDEX_FILE_PENDING_SEGMENTS, "", self.generation)
            {
                // Suppress so we keep returning the original error in our caller
                if let Err(e) = dir.delete_file(&pending) {
                    warn!(
                        "SegmentInfos: rollback_commit delete file '{}' failed by '{:?}'",
                        &pending, e
                    );
                }
            }
        }
    }

    /// Starts a commit: writes and syncs `pending_segments_N`, which readers
    /// ignore. Once this is called you must call `finish_commit` to complete
    /// the commit or `rollback_commit` to abort it.
    ///
    /// `changed()` should be called prior to this method if changes have
    /// been made to this instance.
    pub fn prepare_commit(&mut self, dir: &dyn Directory) -> Result<()> {
        if self.pending_commit {
            bail!(IllegalState("prepare_commit was already called".into()));
        }
        self.write_dir(dir)
    }

    fn write_dir(&mut self, directory: &dyn Directory) -> Result<()> {
        let next_generation = self.next_pending_generation();
        let segment_file_name =
            pending_segments_file_name(next_generation);
        // Always advance the generation on write:
        self.generation = next_generation;

        match self.do_write_dir(directory, &segment_file_name) {
            Ok(()) => {
                self.pending_commit = true;
                Ok(())
            }
            Err(e) => {
                if let Err(err) = directory.delete_file(&segment_file_name) {
                    warn!(
                        "delete file '{}' failed by: '{:?}'",
                        &segment_file_name, err
                    );
                }
                Err(e)
            }
        }
    }

    fn do_write_dir(&mut self, directory: &dyn Directory, segment_file_name: &str) -> Result<()> {
        {
            let mut segn_output =
                directory.create_output(segment_file_name, &IOContext::Default)?;
            self.write_output(segn_output.as_mut())?;
        }

        let mut sync_files = HashSet::with_capacity(1);
        sync_files.insert(segment_file_name.to_string());
        directory.sync(&sync_files)
    }

    /// Write ourselves to the provided `IndexOutput`
    pub fn write_output(&self, output: &mut dyn IndexOutput) -> Result<()> {
        write_index_header(
            output,
            INDEX_FILE_SEGMENTS,
            SEGMENT_VERSION_CURRENT,
            &self.id,
            &to_base36(self.generation as u64),
        )?;

        output.write_long(self.version)?;
        output.write_int(self.counter)?;
        output.write_int(self.len() as i32)?;

        for commit in &self.segments {
            output.write_string(&commit.info.name)?;
            output.write_bytes(commit.info.get_id(), 0, ID_LENGTH)?;
            output.write_string(CODEC_NAME)?;
            output.write_long(commit.del_gen())?;
            let del_count = commit.del_count();
            if del_count < 0 || del_count > commit.info.max_doc() {
                bail!(IllegalState(format!(
                    "cannot write segment {}: invalid del_count {}",
                    commit.info.name, del_count
                )));
            }
            output.write_int(del_count)?;
        }
        output.write_map_of_strings(&self.user_data)?;
        write_footer(output)
    }

    /// Returns all file names referenced by the segments, plus the segments
    /// file itself when `include_segments_file` is set. The returned
    /// collection is recomputed on each invocation.
    pub fn files(&self, include_segments_file: bool) -> HashSet<String> {
        let mut files = HashSet::new();
        if include_segments_file {
            if let Some(segment_file_name) = self.segment_file_name() {
                files.insert(segment_file_name);
            }
        }
        for info in &self.segments {
            files.extend(info.files());
        }
        files
    }

    /// Renames `pending_segments_N` to `segments_N`, returns the committed
    /// file name.
    pub fn finish_commit(&mut self, dir: &dyn Directory) -> Result<String> {
        if !self.pending_commit {
            bail!(IllegalState("prepare_commit was not called".into()));
        }

        let src = pending_segments_file_name(self.generation);
        let dest = segments_file_name(self.generation);

        if let Err(e) = dir.rename(&src, &dest).and_then(|()| dir.sync_meta_data()) {
            self.rollback_commit(dir);
            return Err(e);
        }

        self.pending_commit = false;
        self.last_generation = self.generation;
        Ok(dest)
    }

    /// Writes and commits a new `segments_N` in one step.
    pub fn commit(&mut self, dir: &dyn Directory) -> Result<String> {
        self.prepare_commit(dir)?;
        self.finish_commit(dir)
    }

    pub fn total_max_doc(&self) -> i32 {
        self.segments.iter().map(|s| s.info.max_doc()).sum()
    }

    /// Set the generation to be used for the next commit
    pub fn set_next_write_generation(&mut self, generation: i64) -> Result<()> {
        if generation < self.generation {
            bail!(IllegalState("cannot decrease generation".into()));
        }
        self.generation = generation;
        Ok(())
    }

    pub fn update_generation(&mut self, other: &SegmentInfos) {
        self.last_generation = other.last_generation;
        self.generation = other.generation;
    }

    /// Point in time copies of the segments, to restore on rollback.
    pub fn create_backup_segment_infos(&self) -> Vec<Arc<SegmentCommitInfo>> {
        self.segments
            .iter()
            .map(|s| Arc::new(s.as_ref().clone()))
            .collect()
    }

    pub fn rollback_segment_infos(&mut self, infos: Vec<Arc<SegmentCommitInfo>>) {
        self.segments = infos;
    }

    pub fn add(&mut self, si: Arc<SegmentCommitInfo>) {
        self.segments.push(si);
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn remove(&mut self, si: &SegmentCommitInfo) {
        self.segments.retain(|s| s.info.name != si.info.name);
    }

    pub fn changed(&mut self) {
        self.version += 1;
    }

    pub fn set_user_data(&mut self, data: HashMap<String, String>, do_increment_version: bool) {
        self.user_data = data;
        if do_increment_version {
            self.changed();
        }
    }

    /// Applies all changes caused by committing a merge: the merged away
    /// segments are replaced, in place of the first one, by the merged
    /// segment, or just dropped when `drop_segment` is set.
    pub fn apply_merge_changes(&mut self, merge: &OneMerge, drop_segment: bool) {
        let merged_away: HashSet<&str> = merge.segments.iter().map(|s| s.name()).collect();

        let mut inserted = false;
        let mut kept = Vec::with_capacity(self.segments.len());
        for seg in self.segments.drain(..) {
            if merged_away.contains(seg.name()) {
                if !inserted && !drop_segment {
                    if let Some(info) = merge.info.as_ref() {
                        kept.push(Arc::clone(info));
                        inserted = true;
                    }
                }
            } else {
                kept.push(seg);
            }
        }

        // All merged segments may have been dropped concurrently; the new
        // segment then goes first unless it should be dropped too.
        if !inserted && !drop_segment {
            if let Some(info) = merge.info.as_ref() {
                kept.insert(0, Arc::clone(info));
            }
        }
        self.segments = kept;
    }

    /// Read a particular `segments_N` file. This may fail if a commit is in
    /// progress.
    pub fn read_commit(directory: &DirectoryRc, segment_file_name: &str) -> Result<Self> {
        let generation = generation_from_segments_file_name(segment_file_name)?;
        let mut input = directory.open_checksum_input(segment_file_name, &IOContext::READ)?;
        let infos = Self::read_commit_generation(directory, input.as_mut(), generation)?;
        check_footer(input.as_mut())?;
        Ok(infos)
    }

    fn read_commit_generation<T: IndexInput + ?Sized>(
        directory: &DirectoryRc,
        input: &mut T,
        generation: i64,
    ) -> Result<Self> {
        let magic = input.read_int()?;
        if magic != CODEC_MAGIC {
            bail!(CorruptIndex(format!(
                "invalid magic number {} in {}",
                magic,
                input.name()
            )));
        }
        let resource = input.name().to_string();
        check_header_no_magic(
            input,
            &resource,
            INDEX_FILE_SEGMENTS,
            SEGMENT_VERSION_START,
            SEGMENT_VERSION_CURRENT,
        )?;

        let mut id = [0; ID_LENGTH];
        input.read_bytes(&mut id, 0, ID_LENGTH)?;
        check_index_header_suffix(input, &to_base36(generation as u64))?;

        let version = input.read_long()?;
        let counter = input.read_int()?;
        let num_segs = input.read_int()?;
        if num_segs < 0 {
            bail!(CorruptIndex(format!("invalid segment count: {}", num_segs)));
        }

        let mut segments = Vec::with_capacity(num_segs as usize);
        for _ in 0..num_segs {
            let seg_name = input.read_string()?;
            let mut segment_id = [0; ID_LENGTH];
            input.read_bytes(&mut segment_id, 0, ID_LENGTH)?;
            let codec = input.read_string()?;
            if codec != CODEC_NAME {
                bail!(CorruptIndex(format!(
                    "segment {} was written by unknown codec {}",
                    seg_name, codec
                )));
            }
            let info = read_segment_info(directory, &seg_name, segment_id, &IOContext::READ)?;
            let del_gen = input.read_long()?;
            let del_count = input.read_int()?;
            if del_count < 0 || del_count > info.max_doc() {
                bail!(CorruptIndex(format!(
                    "invalid deletion count: {} vs maxDoc={}",
                    del_count,
                    info.max_doc()
                )));
            }
            segments.push(Arc::new(SegmentCommitInfo::new(
                Arc::new(info),
                del_count,
                del_gen,
            )));
        }
        let user_data = input.read_map_of_strings()?;

        Ok(SegmentInfos {
            counter,
            version,
            generation,
            last_generation: generation,
            segments,
            id,
            user_data,
            pending_commit: false,
        })
    }

    /// Reads the most recent commit of `directory`.
    pub fn read_latest_commit(directory: &DirectoryRc) -> Result<Self> {
        run_with_find_segment_file(directory, None, |dir: (&DirectoryRc, &str)| {
            SegmentInfos::read_commit(dir.0, dir.1)
        })
    }
}

impl Clone for SegmentInfos {
    fn clone(&self) -> Self {
        Self {
            counter: self.counter,
            version: self.version,
            generation: self.generation,
            last_generation: self.last_generation,
            segments: self.create_backup_segment_infos(),
            id: self.id,
            user_data: self.user_data.clone(),
            pending_commit: self.pending_commit,
        }
    }
}

impl fmt::Debug for SegmentInfos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}:", self.segment_file_name())?;
        for s in &self.segments {
            write!(f, " {}", s)?;
        }
        Ok(())
    }
}

fn segments_file_name(generation: i64) -> String {
    let mut name = String::from(INDEX_FILE_SEGMENTS);
    name.push('_');
    name.push_str(&to_base36(generation as u64));
    name
}

fn pending_segments_file_name(generation: i64) -> String {
    let mut name = String::from(INDEX_FILE_PENDING_SEGMENTS);
    name.push('_');
    name.push_str(&to_base36(generation as u64));
    name
}

/// Name of the most recent `segments_N` file in `files`.
pub fn get_last_commit_segments_filename(files: &[String]) -> Result<Option<String>> {
    let generation = get_last_commit_generation(files)?;
    Ok(file_name_from_generation(INDEX_FILE_SEGMENTS, "", generation))
}

/// Get the generation of the most recent commit (N in the segments_N file)
/// in a list of index files, or -1 when there is none.
pub fn get_last_commit_generation(files: &[String]) -> Result<i64> {
    let mut max = -1;
    for file_ref in files {
        if file_ref.starts_with(INDEX_FILE_SEGMENTS) {
            let gen = generation_from_segments_file_name(file_ref)?;
            if gen > max {
                max = gen;
            }
        }
    }
    Ok(max)
}

/// Parse the generation off the segments file name and return it.
pub fn generation_from_segments_file_name(file_name: &str) -> Result<i64> {
    if file_name == INDEX_FILE_SEGMENTS {
        Ok(0)
    } else if file_name.starts_with(INDEX_FILE_SEGMENTS)
        && file_name.len() > INDEX_FILE_SEGMENTS.len() + 1
    {
        Ok(from_base36(&file_name[INDEX_FILE_SEGMENTS.len() + 1..])? as i64)
    } else {
        bail!(CorruptIndex(format!(
            "file name \"{}\" is not a segments file",
            file_name
        )))
    }
}

/// Runs `do_body` against the current segments file.
///
/// A writer may commit, and delete the commit we located, between listing
/// the directory and reading the file. So on failure the lookup is retried
/// as long as a newer generation shows up; without forward progress the
/// original error is real and is returned.
pub fn run_with_find_segment_file<T, Output>(
    directory: &DirectoryRc,
    commit: Option<&CommitPoint>,
    do_body: T,
) -> Result<Output>
where
    T: Fn((&DirectoryRc, &str)) -> Result<Output>,
{
    if let Some(commit) = commit {
        return do_body((directory, commit.segments_file_name()));
    }

    let mut last_gen;
    let mut gen = -1;
    let mut err = None;
    loop {
        last_gen = gen;
        let mut files = directory.list_all()?;
        let mut files2 = directory.list_all()?;
        files.sort();
        files2.sort();
        if files != files2 {
            // list_all() is weakly consistent
            continue;
        }

        gen = get_last_commit_generation(&files)?;

        if gen == -1 {
            bail!(IndexNotFound(format!(
                "no segments* file found in {}: files: {:?}",
                directory, &files
            )));
        } else if gen > last_gen {
            let segment_file_name = segments_file_name(gen);

            match do_body((directory, &segment_file_name)) {
                Ok(r) => {
                    return Ok(r);
                }
                Err(e) => {
                    debug!(
                        "primary error on {} : err: '{:?}'. will retry: gen={}",
                        &segment_file_name, e, gen
                    );
                    err = Some(e);
                }
            }
        } else if let Some(e) = err {
            return Err(e);
        } else {
            bail!(IllegalState(format!(
                "commit generation went backwards in {}",
                directory
            )));
        }
    }
}
