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

use crate::core::codec::segment_infos::{
    generation_from_segments_file_name, is_codec_file, parse_generation, parse_segment_name,
    SegmentInfos, INDEX_FILE_PENDING_SEGMENTS, INDEX_FILE_SEGMENTS,
};
use crate::core::index::writer::IndexDeletionPolicy;
use crate::core::store::directory::DirectoryRc;
use crate::core::store::WRITE_LOCK_NAME;
use crate::error::ErrorKind::IllegalState;
use crate::error::Result;

use std::cmp::{max, Ordering};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::Arc;

/// Keeps track of each `SegmentInfos` instance that is still "live", either
/// because it corresponds to a `segments_N` file in the directory (a
/// commit) or because it is the in-memory state the writer is updating.
/// Simple reference counting maps the live instances to individual files:
/// a file is deleted once no commit point nor the in-memory state refers
/// to it.
///
/// The `IndexDeletionPolicy` is consulted on creation and once per commit
/// to decide when a commit should be removed.
///
/// The caller must hold the write lock.
pub struct IndexFileDeleter {
    /// How many commits, checkpoints and readers reference each file.
    ref_counts: HashMap<String, u32>,
    /// All commits currently in the index, oldest first.
    commits: Vec<CommitPoint>,
    /// Files inc_ref'd by the previous non-commit checkpoint.
    last_files: HashSet<String>,
    directory: DirectoryRc,
    policy: Arc<dyn IndexDeletionPolicy>,
    pub starting_commit_deleted: bool,
}

impl IndexFileDeleter {
    /// Loads every commit found in `files`, lets the policy prune them and
    /// deletes unreferenced index files, such as those left by a crashed
    /// writer.
    pub fn new(
        directory: DirectoryRc,
        policy: Arc<dyn IndexDeletionPolicy>,
        files: &[String],
        segment_infos: &mut SegmentInfos,
        initial_index_exists: bool,
    ) -> Result<IndexFileDeleter> {
        let mut deleter = IndexFileDeleter {
            ref_counts: HashMap::new(),
            commits: Vec::new(),
            last_files: HashSet::new(),
            directory,
            policy,
            starting_commit_deleted: false,
        };

        let current_segments_file = segment_infos.segment_file_name();
        let mut seen_current = false;
        if current_segments_file.is_some() {
            for file_name in files {
                if !is_index_file(file_name) {
                    continue;
                }
                deleter.ref_counts.entry(file_name.clone()).or_insert(0);
                if file_name.starts_with(INDEX_FILE_SEGMENTS) {
                    let sis = SegmentInfos::read_commit(&deleter.directory, file_name)?;
                    if sis.generation == segment_infos.generation {
                        seen_current = true;
                    }
                    deleter.inc_ref_files(&sis.files(true));
                    deleter
                        .commits
                        .push(CommitPoint::new(Arc::clone(&deleter.directory), &sis)?);
                }
            }
        }

        if let Some(current) = &current_segments_file {
            if !seen_current && initial_index_exists {
                // a stale listing missed the commit we were opened on
                let sis = SegmentInfos::read_commit(&deleter.directory, current)?;
                deleter.inc_ref_files(&sis.files(true));
                deleter
                    .commits
                    .push(CommitPoint::new(Arc::clone(&deleter.directory), &sis)?);
            }
        }
        deleter.commits.sort();

        {
            let known: Vec<&str> = deleter.ref_counts.keys().map(String::as_str).collect();
            inflate_gens(segment_infos, &known)?;
        }

        // unreferenced files are left overs of a crashed writer
        let mut to_delete = HashSet::new();
        for (file_name, count) in &deleter.ref_counts {
            if *count == 0 {
                if file_name.starts_with(INDEX_FILE_SEGMENTS) {
                    bail!(IllegalState(format!(
                        "file '{}' has ref_count=0, shouldn't happen on init",
                        file_name
                    )));
                }
                to_delete.insert(file_name.clone());
            }
        }
        for file_name in &to_delete {
            deleter.ref_counts.remove(file_name);
        }
        deleter.delete_files(&to_delete)?;

        let policy = Arc::clone(&deleter.policy);
        policy.on_init(&mut deleter.commits)?;

        // always protect the incoming state, it may not be the latest commit
        deleter.checkpoint(segment_infos, false)?;

        if let Some(current) = &current_segments_file {
            deleter.starting_commit_deleted = deleter
                .commits
                .iter()
                .any(|c| c.deleted && &c.segments_file_name == current);
        }
        deleter.delete_commits()?;
        Ok(deleter)
    }

    /// Called by the writer after each consistent change of `segment_infos`,
    /// which is also a commit when `is_commit` is set.
    ///
    /// Files of the new state are inc_ref'd and those of the previous
    /// checkpoint dec_ref'd. On commit the policy may drop older commits.
    pub fn checkpoint(&mut self, segment_infos: &SegmentInfos, is_commit: bool) -> Result<()> {
        self.inc_ref_files(&segment_infos.files(is_commit));

        if is_commit {
            self.commits
                .push(CommitPoint::new(Arc::clone(&self.directory), segment_infos)?);
            let policy = Arc::clone(&self.policy);
            policy.on_commit(&mut self.commits)?;
            self.delete_commits()
        } else {
            let last = mem::replace(&mut self.last_files, segment_infos.files(false));
            self.dec_ref_files(&last)
        }
    }

    pub fn exists(&self, file_name: &str) -> bool {
        self.ref_counts.get(file_name).map_or(false, |c| *c > 0)
    }

    pub fn ref_count(&self, file_name: &str) -> u32 {
        self.ref_counts.get(file_name).cloned().unwrap_or(0)
    }

    pub fn inc_ref_files(&mut self, files: &HashSet<String>) {
        for f in files {
            *self.ref_counts.entry(f.clone()).or_insert(0) += 1;
        }
    }

    /// Decrefs all provided files, deleting those no longer referenced.
    pub fn dec_ref_files(&mut self, files: &HashSet<String>) -> Result<()> {
        let mut to_delete = HashSet::new();
        for f in files {
            if self.dec_ref(f) {
                to_delete.insert(f.clone());
            }
        }
        self.delete_files(&to_delete)
    }

    pub fn dec_ref_without_error(&mut self, files: &HashSet<String>) {
        if let Err(e) = self.dec_ref_files(files) {
            warn!("IndexFileDeleter: dec_ref of {:?} failed: {:?}", files, e);
        }
    }

    /// Returns true if the file should now be deleted.
    fn dec_ref(&mut self, file_name: &str) -> bool {
        match self.ref_counts.get_mut(file_name) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.ref_counts.remove(file_name);
                true
            }
            None => {
                warn!("IndexFileDeleter: dec_ref of untracked file {}", file_name);
                false
            }
        }
    }

    /// Drops the commits the policy marked as deleted, dec_ref'ing their
    /// files.
    fn delete_commits(&mut self) -> Result<()> {
        let (deleted, kept): (Vec<CommitPoint>, Vec<CommitPoint>) =
            self.commits.drain(..).partition(|c| c.deleted);
        self.commits = kept;

        let mut res = Ok(());
        for commit in &deleted {
            debug!(
                "IndexFileDeleter: deleting commit {}",
                commit.segments_file_name
            );
            if let Err(e) = self.dec_ref_files(&commit.files) {
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }
        res
    }

    /// Deletes `segments_N` files first, so a failure midway never leaves a
    /// commit pointing at missing files.
    fn delete_files(&self, names: &HashSet<String>) -> Result<()> {
        let (segments, others): (Vec<&String>, Vec<&String>) = names
            .iter()
            .partition(|n| n.starts_with(INDEX_FILE_SEGMENTS));
        for name in segments.into_iter().chain(others) {
            debug!("IndexFileDeleter: delete file {}", name);
            if let Err(e) = self.directory.delete_file(name) {
                if self.directory.file_exists(name).unwrap_or(true) {
                    return Err(e);
                }
                warn!("IndexFileDeleter: file {} was already gone", name);
            }
        }
        Ok(())
    }

    /// Deletes the specified files, but only if they were never inc_ref'd,
    /// such as the files of an aborted merge or flush.
    pub fn delete_new_files(&self, files: &HashSet<String>) -> Result<()> {
        let fresh: HashSet<String> = files
            .iter()
            .filter(|f| !self.ref_counts.contains_key(f.as_str()))
            .cloned()
            .collect();
        self.delete_files(&fresh)
    }

    /// Re-lists the directory and deletes every index file nothing
    /// references. Called after a failure that may have left such files.
    pub fn refresh(&mut self) -> Result<()> {
        let mut to_delete = HashSet::new();
        for file_name in self.directory.list_all()? {
            if is_index_file(&file_name) && !self.ref_counts.contains_key(&file_name) {
                to_delete.insert(file_name);
            }
        }
        self.delete_files(&to_delete)
    }

    /// Commit points currently alive, oldest first.
    pub fn commits(&self) -> &[CommitPoint] {
        &self.commits
    }

    /// Releases the files of the last checkpoint.
    pub fn close(&mut self) -> Result<()> {
        if !self.last_files.is_empty() {
            let files = mem::replace(&mut self.last_files, HashSet::new());
            self.dec_ref_files(&files)?;
        }
        Ok(())
    }
}

fn is_index_file(file_name: &str) -> bool {
    file_name != WRITE_LOCK_NAME
        && (is_codec_file(file_name)
            || file_name.starts_with(INDEX_FILE_SEGMENTS)
            || file_name.starts_with(INDEX_FILE_PENDING_SEGMENTS))
}

/// Moves every generation past what the directory already holds, so a
/// writer never rewrites a file a crashed writer left behind.
fn inflate_gens(infos: &mut SegmentInfos, files: &[&str]) -> Result<()> {
    let mut max_segment_gen = i64::min_value();
    let mut max_segment_name = -1i64;
    let mut max_per_segment_gen: HashMap<&str, i64> = HashMap::new();

    for &file_name in files {
        if file_name.starts_with(INDEX_FILE_SEGMENTS) {
            if let Ok(gen) = generation_from_segments_file_name(file_name) {
                max_segment_gen = max(gen, max_segment_gen);
            }
        } else if file_name.starts_with(INDEX_FILE_PENDING_SEGMENTS) {
            let pending = &file_name[INDEX_FILE_PENDING_SEGMENTS.len() - INDEX_FILE_SEGMENTS.len()..];
            if let Ok(gen) = generation_from_segments_file_name(pending) {
                max_segment_gen = max(gen, max_segment_gen);
            }
        } else {
            let segment_name = parse_segment_name(file_name);
            if segment_name.len() > 1 {
                if let Ok(n) = i64::from_str_radix(&segment_name[1..], 36) {
                    max_segment_name = max(max_segment_name, n);
                }
            }
            let gen = parse_generation(file_name).unwrap_or(0);
            let cur = max_per_segment_gen.entry(segment_name).or_insert(0);
            *cur = max(*cur, gen);
        }
    }

    infos.set_next_write_generation(max(infos.generation, max_segment_gen))?;
    if (infos.counter as i64) < max_segment_name + 1 {
        infos.counter = (max_segment_name + 1) as i32;
    }
    for info in &infos.segments {
        if let Some(gen) = max_per_segment_gen.get(info.name()) {
            while info.next_write_del_gen() < gen + 1 {
                info.advance_next_write_del_gen();
            }
        }
    }
    Ok(())
}

/// Details of one commit, handed to the deletion policy. Commit points
/// order by generation.
#[derive(Clone)]
pub struct CommitPoint {
    files: HashSet<String>,
    segments_file_name: String,
    deleted: bool,
    directory: DirectoryRc,
    generation: i64,
    user_data: HashMap<String, String>,
    segment_count: usize,
}

impl CommitPoint {
    pub fn new(directory: DirectoryRc, segment_infos: &SegmentInfos) -> Result<CommitPoint> {
        let segments_file_name = match segment_infos.segment_file_name() {
            Some(name) => name,
            None => bail!(IllegalState("commit point without a segments file".into())),
        };
        Ok(CommitPoint {
            files: segment_infos.files(true),
            segments_file_name,
            deleted: false,
            directory,
            generation: segment_infos.generation,
            user_data: segment_infos.user_data.clone(),
            segment_count: segment_infos.len(),
        })
    }

    pub fn segments_file_name(&self) -> &str {
        &self.segments_file_name
    }

    pub fn file_names(&self) -> &HashSet<String> {
        &self.files
    }

    pub fn directory(&self) -> &DirectoryRc {
        &self.directory
    }

    /// Marks this commit for deletion; its files are released once the
    /// policy returns.
    pub fn delete(&mut self) {
        self.deleted = true;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn user_data(&self) -> &HashMap<String, String> {
        &self.user_data
    }
}

impl Ord for CommitPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation.cmp(&other.generation)
    }
}

impl PartialOrd for CommitPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for CommitPoint {}

impl PartialEq for CommitPoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.directory, &other.directory) && self.generation == other.generation
    }
}

impl fmt::Debug for CommitPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CommitPoint({})", self.segments_file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::tests::*;
    use crate::core::index::writer::{IndexWriter, NoDeletionPolicy};
    use crate::core::store::io::DataOutput;
    use crate::core::store::IOContext;

    #[test]
    fn test_keep_only_last_commit() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a b", "c d"], 1);
        writer.add_document(text_doc("2", "e")).unwrap();
        writer.commit().unwrap();
        let files = dir.list_all().unwrap();
        let segments: Vec<&String> = files
            .iter()
            .filter(|f| f.starts_with(INDEX_FILE_SEGMENTS))
            .collect();
        assert_eq!(segments, vec!["segments_2"]);
        writer.close().unwrap();
    }

    #[test]
    fn test_no_deletion_policy_keeps_generations() {
        let dir = new_directory();
        let mut config = manual_config();
        config.deletion_policy = Arc::new(NoDeletionPolicy);
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for i in 0..3 {
            writer.add_document(text_doc(&i.to_string(), "x")).unwrap();
            writer.commit().unwrap();
        }
        writer.close().unwrap();
        for gen in 1..=3 {
            assert!(dir.file_exists(&format!("segments_{}", gen)).unwrap());
        }
    }

    #[test]
    fn test_refresh_removes_orphans() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a"], 1);
        writer.close().unwrap();
        {
            let mut out = dir.create_output("_9.fnm", &IOContext::Default).unwrap();
            out.write_byte(1).unwrap();
        }
        dir.create_output("notes.txt", &IOContext::Default).unwrap();

        let mut infos = SegmentInfos::read_latest_commit(&dir).unwrap();
        let files = dir.list_all().unwrap();
        let deleter = IndexFileDeleter::new(
            Arc::clone(&dir),
            Arc::new(crate::core::index::writer::KeepOnlyLastCommitDeletionPolicy),
            &files,
            &mut infos,
            true,
        )
        .unwrap();
        assert!(!dir.file_exists("_9.fnm").unwrap());
        assert!(dir.file_exists("notes.txt").unwrap());
        assert!(deleter.exists("segments_1"));
        // the orphan's name is never reused
        assert!(infos.counter >= 10);
        assert_eq!(deleter.commits().len(), 1);
    }
}
