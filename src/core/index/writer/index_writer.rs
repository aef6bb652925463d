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

use crate::core::codec::compound::{segment_directory, write_compound_file};
use crate::core::codec::field_infos::{read_field_infos, FieldNumbers};
use crate::core::codec::segment_infos::{
    get_last_commit_segments_filename, write_segment_info, SegmentCommitInfo, SegmentInfo,
    SegmentInfos,
};
use crate::core::doc::Document;
use crate::core::index::merge::{
    MergeAbortHandle, MergeContext, MergeState, MergerTrigger, OneMerge, SegmentMerger,
};
use crate::core::index::reader::{IndexReader, StandardDirectoryReader};
use crate::core::index::writer::{
    IndexFileDeleter, IndexWriterConfig, OpenMode, ReaderPool, SegmentBuffer,
};
use crate::core::index::Term;
use crate::core::store::directory::{Directory, DirectoryRc, TrackingDirectoryWrapper};
use crate::core::store::{obtain_lock_with_timeout, IOContext, Lock, WRITE_LOCK_NAME};
use crate::core::util::{random_id, to_base36};
use crate::core::index::ErrorKind::MergeAborted;
use crate::error::ErrorKind::{self, AlreadyClosed, IllegalArgument, IllegalState, IndexNotFound};
use crate::error::Result;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// An `IndexWriter` creates and maintains an index.
///
/// Documents are added to an in-memory `SegmentBuffer` that is written out
/// as a new segment when it grows past the configured limits, or on
/// `flush`, `commit` and `get_reader`. Deletions are buffered as terms and
/// applied to the flushed segments at the same points.
///
/// Changes become durable with `commit`, which writes a new `segments_N`
/// file; `rollback` (or `close` when `commit_on_close` is off) discards
/// everything since the last commit.
///
/// Each flush or merge that changes the segment list is a "check point"
/// handed to the `IndexFileDeleter`, which removes files no longer
/// referenced by a commit, the current state or an open near real time
/// reader.
///
/// `IndexWriter` is a cheap handle, clones share the same writer.
#[derive(Clone)]
pub struct IndexWriter {
    inner: Arc<IndexWriterInner>,
}

pub struct IndexWriterInner {
    directory: DirectoryRc,
    config: IndexWriterConfig,
    write_lock: Box<dyn Lock>,
    closed: AtomicBool,
    field_numbers: Arc<FieldNumbers>,
    // lock order is commit_lock -> buffer -> state
    commit_lock: Mutex<()>,
    buffer: Mutex<SegmentBuffer>,
    state: Mutex<WriterState>,
}

/// The segment level state of the writer, guarded by one lock.
struct WriterState {
    segment_infos: SegmentInfos,
    deleter: IndexFileDeleter,
    reader_pool: ReaderPool,

    change_count: u64,
    last_commit_change_count: u64,
    /// Last committed state, restored by `rollback`.
    rollback_infos: SegmentInfos,
    /// Set between `prepare_commit` and `finish_commit`.
    pending_commit: Option<PendingCommit>,

    pending_merges: VecDeque<OneMerge>,
    running_merges: HashMap<u32, MergeAbortHandle>,
    merging_segments: HashSet<String>,
    /// Segments a running `force_merge` must merge, `true` for the ones
    /// present when it started.
    segments_to_merge: HashMap<String, bool>,
    merge_id_gen: AtomicU32,
    stop_merges: bool,
}

struct PendingCommit {
    infos: SegmentInfos,
    files: HashSet<String>,
    change_count: u64,
}

impl IndexWriter {
    /// Opens or creates the index in `directory` according to
    /// `config.open_mode`, holding the write lock until closed.
    pub fn new(directory: DirectoryRc, config: IndexWriterConfig) -> Result<IndexWriter> {
        let write_lock = obtain_lock_with_timeout(
            directory.as_ref(),
            WRITE_LOCK_NAME,
            config.write_lock_timeout,
        )?;
        let files = directory.list_all()?;
        let last_segments_file = get_last_commit_segments_filename(&files)?;

        let create = match config.open_mode {
            OpenMode::Create => true,
            OpenMode::Append => {
                if last_segments_file.is_none() {
                    bail!(IndexNotFound(format!(
                        "no segments* file found in {}: files: {:?}",
                        directory, files
                    )));
                }
                false
            }
            OpenMode::CreateOrAppend => last_segments_file.is_none(),
        };

        let mut change_count = 0;
        let mut initial_index_exists = true;
        let mut segment_infos = match (&last_segments_file, create) {
            (Some(file_name), false) => SegmentInfos::read_commit(&directory, file_name)?,
            (Some(file_name), true) => {
                // keep the generation so the next commit supersedes the old
                // index, readers may still have it open
                let mut infos = SegmentInfos::read_commit(&directory, file_name)?;
                infos.clear();
                infos
            }
            (None, _) => {
                initial_index_exists = false;
                SegmentInfos::default()
            }
        };
        if create {
            // the empty index must be committed even without further changes
            segment_infos.changed();
            change_count += 1;
        }
        let rollback_infos = segment_infos.clone();

        let field_numbers = Arc::new(FieldNumbers::new());
        for info in &segment_infos.segments {
            let dir = segment_directory(&info.info.directory, &info.info, &IOContext::READ)?;
            let field_infos = read_field_infos(dir.as_ref(), &info.info, &IOContext::READ)?;
            for fi in field_infos.iter() {
                field_numbers.add_or_get(&fi.name, fi.number)?;
            }
        }

        let deleter = IndexFileDeleter::new(
            Arc::clone(&directory),
            Arc::clone(&config.deletion_policy),
            &files,
            &mut segment_infos,
            initial_index_exists,
        )?;
        if deleter.starting_commit_deleted {
            // the policy deleted the commit we opened, so closing without
            // further changes must still write a new one
            segment_infos.changed();
            change_count += 1;
        }
        debug!(
            "IndexWriter: init {} on {:?} with {} segments, create={}",
            directory,
            segment_infos.segment_file_name(),
            segment_infos.len(),
            create
        );

        let state = WriterState {
            segment_infos,
            deleter,
            reader_pool: ReaderPool::new(config.reader_pooling),
            change_count,
            last_commit_change_count: 0,
            rollback_infos,
            pending_commit: None,
            pending_merges: VecDeque::new(),
            running_merges: HashMap::new(),
            merging_segments: HashSet::new(),
            segments_to_merge: HashMap::new(),
            merge_id_gen: AtomicU32::new(0),
            stop_merges: false,
        };
        let inner = IndexWriterInner {
            directory,
            config,
            write_lock,
            closed: AtomicBool::new(false),
            buffer: Mutex::new(SegmentBuffer::new(Arc::clone(&field_numbers))),
            field_numbers,
            commit_lock: Mutex::new(()),
            state: Mutex::new(state),
        };
        Ok(IndexWriter {
            inner: Arc::new(inner),
        })
    }

    pub(crate) fn from_inner(inner: Arc<IndexWriterInner>) -> IndexWriter {
        IndexWriter { inner }
    }

    pub fn config(&self) -> &IndexWriterConfig {
        &self.inner.config
    }

    /// The directory this writer writes to.
    pub fn directory(&self) -> &DirectoryRc {
        &self.inner.directory
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.is_open() {
            bail!(AlreadyClosed("this IndexWriter is closed".into()));
        }
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<WriterState>> {
        Ok(self.inner.state.lock()?)
    }

    /// Adds a document to this index. A document that fails analysis still
    /// takes a doc id but is marked deleted.
    pub fn add_document(&self, doc: Document) -> Result<()> {
        self.update_document_internal(None, &[doc])
    }

    /// Atomically adds a block of documents with sequentially assigned doc
    /// ids, so they always end up adjacent in one segment.
    pub fn add_documents(&self, docs: &[Document]) -> Result<()> {
        self.update_document_internal(None, docs)
    }

    /// Deletes the documents containing `term`, then adds `doc`.
    pub fn update_document(&self, term: Term, doc: Document) -> Result<()> {
        self.update_document_internal(Some(term), &[doc])
    }

    fn update_document_internal(&self, delete_term: Option<Term>, docs: &[Document]) -> Result<()> {
        self.ensure_open()?;
        let should_flush = {
            let mut buffer = self.inner.buffer.lock()?;
            if let Some(term) = delete_term {
                buffer.delete_term(term);
            }
            for doc in docs {
                buffer.add_document(
                    doc,
                    self.inner.config.analyzer.as_ref(),
                    self.inner.config.similarity.as_ref(),
                )?;
            }
            self.should_flush(&buffer)
        };
        if should_flush {
            self.flush_and_merge(MergerTrigger::SegmentFlush)?;
        }
        Ok(())
    }

    /// Deletes the documents containing any of `terms`.
    pub fn delete_documents(&self, terms: &[Term]) -> Result<()> {
        self.ensure_open()?;
        let should_flush = {
            let mut buffer = self.inner.buffer.lock()?;
            for term in terms {
                buffer.delete_term(term.clone());
            }
            self.should_flush(&buffer)
        };
        if should_flush {
            self.flush_and_merge(MergerTrigger::SegmentFlush)?;
        }
        Ok(())
    }

    /// Deletes every document of the index. Pending merges are aborted;
    /// nothing is durable until the next commit.
    pub fn delete_all(&self) -> Result<()> {
        self.ensure_open()?;
        let mut buffer = self.inner.buffer.lock()?;
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        buffer.clear();
        state.abort_merges();
        state.reader_pool.drop_all(&self.inner.directory, false)?;
        state.segment_infos.clear();
        self.inner.field_numbers.clear()?;
        state.changed();
        state.checkpoint()?;
        debug!("IndexWriter: delete_all");
        Ok(())
    }

    fn should_flush(&self, buffer: &SegmentBuffer) -> bool {
        let config = &self.inner.config;
        if let Some(max_docs) = config.max_buffered_docs {
            if buffer.num_docs() as u32 >= max_docs {
                return true;
            }
        }
        config.flush_on_ram() && buffer.bytes_used() >= config.ram_buffer_size()
    }

    /// Writes the buffered documents as a new segment and applies the
    /// buffered deletes, then lets the merge policy look for merges.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.flush_and_merge(MergerTrigger::FullFlush)
    }

    fn flush_and_merge(&self, trigger: MergerTrigger) -> Result<()> {
        if self.flush_internal()? {
            self.maybe_merge_with(trigger)?;
        }
        Ok(())
    }

    /// Returns true if the segments changed.
    fn flush_internal(&self) -> Result<bool> {
        let mut buffer = self.inner.buffer.lock()?;
        let mut guard = self.lock_state()?;
        self.do_flush(&mut buffer, &mut guard)
    }

    fn do_flush(&self, buffer: &mut SegmentBuffer, state: &mut WriterState) -> Result<bool> {
        let mut changed = false;
        let delete_terms = buffer.delete_terms();
        if !delete_terms.is_empty() && state.apply_deletes(&delete_terms)? {
            changed = true;
        }

        if buffer.num_docs() > 0 {
            let name = state.new_segment_name();
            let flushed = buffer.flush(
                &self.inner.directory,
                &name,
                self.inner.config.use_compound_file,
            );
            let flushed = match flushed {
                Ok(flushed) => flushed,
                Err(e) => {
                    // the buffer dropped its files, refresh catches leftovers
                    if let Err(err) = state.deleter.refresh() {
                        warn!("IndexWriter: refresh after failed flush: {:?}", err);
                    }
                    return Err(e);
                }
            };
            if let Some(flushed) = flushed {
                debug!("IndexWriter: publish flushed segment {}", flushed.info);
                state.segment_infos.add(flushed.info);
                changed = true;
            }
        } else {
            buffer.clear();
        }

        if changed {
            state.changed();
            state.checkpoint()?;
        }
        Ok(changed)
    }

    /// Commits all pending changes: flushes the buffer, writes pending
    /// deletes and publishes a new `segments_N` file. Commits with nothing
    /// changed since the last commit are skipped.
    pub fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        let _commit = self.inner.commit_lock.lock()?;
        let prepared = self.lock_state()?.pending_commit.is_some();
        if !prepared {
            self.prepare_commit_internal()?;
        }
        self.finish_commit()
    }

    /// First phase of a two-phase commit: writes and syncs the new segments
    /// file under a pending name. Follow with `commit` to publish it or
    /// `rollback` to drop it.
    pub fn prepare_commit(&self) -> Result<()> {
        self.ensure_open()?;
        let _commit = self.inner.commit_lock.lock()?;
        self.prepare_commit_internal()
    }

    fn prepare_commit_internal(&self) -> Result<()> {
        if self.lock_state()?.pending_commit.is_some() {
            bail!(IllegalState(
                "prepare_commit was already called with no corresponding call to commit".into()
            ));
        }
        debug!("IndexWriter: prepare_commit: flush");
        let any_changes = {
            let mut buffer = self.inner.buffer.lock()?;
            let mut guard = self.lock_state()?;
            let state = &mut *guard;
            let mut changed = self.do_flush(&mut buffer, state)?;
            if state.reader_pool.commit(&self.inner.directory)? {
                state.changed();
                state.checkpoint()?;
                changed = true;
            }
            changed
        };
        if any_changes {
            self.maybe_merge_with(MergerTrigger::FullFlush)?;
        }

        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        // merges may have left deletes carried over from merged segments
        if state.reader_pool.commit(&self.inner.directory)? {
            state.changed();
            state.checkpoint()?;
        }
        if state.change_count == state.last_commit_change_count {
            debug!("IndexWriter: prepare_commit: no changes pending, skip");
            return Ok(());
        }

        let mut to_commit = state.segment_infos.clone();
        let files = to_commit.files(false);
        // protect the files of the commit until it is finished
        state.deleter.inc_ref_files(&files);
        let res = self
            .inner
            .directory
            .sync(&files)
            .and_then(|()| to_commit.prepare_commit(self.inner.directory.as_ref()));
        if let Err(e) = res {
            state.deleter.dec_ref_without_error(&files);
            return Err(e);
        }
        debug!(
            "IndexWriter: prepared commit {:?}",
            to_commit.next_segment_file_name()
        );
        state.pending_commit = Some(PendingCommit {
            infos: to_commit,
            files,
            change_count: state.change_count,
        });
        Ok(())
    }

    fn finish_commit(&self) -> Result<()> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        let mut pending = match state.pending_commit.take() {
            Some(pending) => pending,
            None => {
                debug!("IndexWriter: commit: nothing pending, skip");
                return Ok(());
            }
        };

        let committed = match pending.infos.finish_commit(self.inner.directory.as_ref()) {
            Ok(name) => name,
            Err(e) => {
                state.deleter.dec_ref_without_error(&pending.files);
                return Err(e);
            }
        };
        state.segment_infos.update_generation(&pending.infos);
        state.last_commit_change_count = pending.change_count;
        state.rollback_infos = pending.infos.clone();

        let res = state.deleter.checkpoint(&pending.infos, true);
        state.deleter.dec_ref_without_error(&pending.files);
        res?;
        debug!(
            "IndexWriter: commit: wrote segments file \"{}\" with {} segments",
            committed,
            pending.infos.len()
        );
        Ok(())
    }

    /// Stores `data` with the next commit.
    pub fn set_commit_data(&self, data: HashMap<String, String>) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        state.segment_infos.set_user_data(data, true);
        state.change_count += 1;
        Ok(())
    }

    /// User data of the current (possibly uncommitted) state.
    pub fn commit_data(&self) -> Result<HashMap<String, String>> {
        Ok(self.lock_state()?.segment_infos.user_data.clone())
    }

    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        let buffer = self.inner.buffer.lock()?;
        let state = self.lock_state()?;
        Ok(buffer.has_changes()
            || state.change_count != state.last_commit_change_count
            || state.reader_pool.any_pending_deletes())
    }

    /// Discards every change since the last commit and closes the writer.
    pub fn rollback(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let _commit = self.inner.commit_lock.lock()?;
        self.rollback_internal()
    }

    fn rollback_internal(&self) -> Result<()> {
        let mut buffer = self.inner.buffer.lock()?;
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("IndexWriter: rollback");
        buffer.clear();
        state.stop_merges = true;
        state.abort_merges();

        if let Some(mut pending) = state.pending_commit.take() {
            pending.infos.rollback_commit(self.inner.directory.as_ref());
            state.deleter.dec_ref_without_error(&pending.files);
        }

        let mut res = state.reader_pool.drop_all(&self.inner.directory, false);
        let mut restored = state.rollback_infos.clone();
        restored.update_generation(&state.segment_infos);
        state.segment_infos = restored;
        state.change_count = state.last_commit_change_count;

        for step in &[
            state.deleter.checkpoint(&state.segment_infos, false),
            state.deleter.refresh(),
            state.deleter.close(),
            self.inner.config.merge_scheduler.close(),
            self.inner.write_lock.close(),
        ] {
            if let Err(e) = step {
                warn!("IndexWriter: rollback step failed: {:?}", e);
                if res.is_ok() {
                    res = Err(format!("{:?}", e).into());
                }
            }
        }
        res
    }

    /// Closes the writer, committing pending changes first when
    /// `commit_on_close` is set and discarding them otherwise. Calling it
    /// again is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        if self.inner.config.commit_on_close {
            if let Err(e) = self.commit() {
                if let Err(err) = self.rollback() {
                    warn!("IndexWriter: rollback after failed close: {:?}", err);
                }
                return Err(e);
            }
        }
        let _commit = self.inner.commit_lock.lock()?;
        self.rollback_internal()
    }

    /// Returns a near real time reader over all committed and uncommitted
    /// changes. Buffered documents are flushed and buffered deletes
    /// applied first; the reader keeps its segment files alive until it is
    /// closed.
    pub fn get_reader(&self, apply_all_deletes: bool) -> Result<StandardDirectoryReader> {
        self.ensure_open()?;
        let any_changes = self.flush_internal()?;

        let reader = {
            let mut guard = self.lock_state()?;
            let state = &mut *guard;
            let infos = state.segment_infos.clone();
            let mut readers = Vec::with_capacity(state.segment_infos.len());
            for info in &state.segment_infos.segments {
                let rld = state.reader_pool.get_or_create(info);
                readers.push(rld.readonly_clone()?);
                state.reader_pool.release(info.name());
            }

            let files = infos.files(false);
            state.deleter.inc_ref_files(&files);
            let reader = StandardDirectoryReader::new(
                Arc::clone(&self.inner.directory),
                readers,
                infos,
                Some(Arc::downgrade(&self.inner)),
                apply_all_deletes,
            );
            let writer = Arc::downgrade(&self.inner);
            reader.add_close_listener(Box::new(move |_| {
                if let Some(inner) = writer.upgrade() {
                    inner.state.lock()?.deleter.dec_ref_files(&files)?;
                }
                Ok(())
            }))?;
            reader
        };
        debug!("IndexWriter: get_reader {}", reader);

        if any_changes {
            self.maybe_merge_with(MergerTrigger::FullFlush)?;
        }
        Ok(reader)
    }

    /// Whether `infos` still describes the writer's state, i.e. a reader
    /// opened on it sees every change.
    pub fn is_current(&self, infos: &SegmentInfos) -> Result<bool> {
        let buffer = self.inner.buffer.lock()?;
        let state = self.lock_state()?;
        Ok(infos.version == state.segment_infos.version && !buffer.has_changes())
    }

    /// Documents in the index including deletions and buffered documents.
    pub fn max_doc(&self) -> Result<i32> {
        let buffer = self.inner.buffer.lock()?;
        let state = self.lock_state()?;
        Ok(buffer.num_docs() + state.segment_infos.total_max_doc())
    }

    /// Documents in the index, counting applied deletions and all buffered
    /// documents.
    pub fn num_docs(&self) -> Result<i32> {
        let buffer = self.inner.buffer.lock()?;
        let state = self.lock_state()?;
        let flushed: i32 = state
            .segment_infos
            .segments
            .iter()
            .map(|info| state.reader_pool.num_docs(info))
            .sum();
        Ok(buffer.num_docs() + flushed)
    }

    pub fn segment_count(&self) -> Result<usize> {
        Ok(self.lock_state()?.segment_infos.len())
    }

    /// A point in time copy of the writer's current segments.
    pub fn segment_infos(&self) -> Result<SegmentInfos> {
        Ok(self.lock_state()?.segment_infos.clone())
    }

    /// Asks the merge policy for merges and runs them with the merge
    /// scheduler.
    pub fn maybe_merge(&self) -> Result<()> {
        self.ensure_open()?;
        self.maybe_merge_with(MergerTrigger::Explicit)
    }

    fn maybe_merge_with(&self, trigger: MergerTrigger) -> Result<()> {
        let found = self.update_pending_merges(trigger, None)?;
        let res = self
            .inner
            .config
            .merge_scheduler
            .merge(self, trigger, found);
        self.drop_pending_merges()?;
        res
    }

    /// Merges down to at most `max_num_segments` segments. Segments flushed
    /// while this runs are left alone.
    pub fn force_merge(&self, max_num_segments: u32) -> Result<()> {
        self.ensure_open()?;
        if max_num_segments < 1 {
            bail!(IllegalArgument(format!(
                "max_num_segments must be >= 1, got {}",
                max_num_segments
            )));
        }
        debug!("IndexWriter: force_merge to {} segments", max_num_segments);
        self.flush_internal()?;
        {
            let mut guard = self.lock_state()?;
            let state = &mut *guard;
            state.segments_to_merge.clear();
            for info in &state.segment_infos.segments {
                state.segments_to_merge.insert(info.name().to_string(), true);
            }
        }

        let res = self.run_forced_merges(max_num_segments);
        self.lock_state()?.segments_to_merge.clear();
        res
    }

    fn run_forced_merges(&self, max_num_segments: u32) -> Result<()> {
        loop {
            let version = self.lock_state()?.segment_infos.version;
            let found =
                self.update_pending_merges(MergerTrigger::Explicit, Some(max_num_segments))?;
            if !found {
                return Ok(());
            }
            let res = self
                .inner
                .config
                .merge_scheduler
                .merge(self, MergerTrigger::Explicit, true);
            self.drop_pending_merges()?;
            res?;
            if self.lock_state()?.segment_infos.version == version {
                // the scheduler ran nothing, asking again finds the same
                debug!("IndexWriter: force_merge made no progress, stop");
                return Ok(());
            }
        }
    }

    /// Registers the merges the policy selects, returns true if any was
    /// registered.
    fn update_pending_merges(
        &self,
        trigger: MergerTrigger,
        max_num_segments: Option<u32>,
    ) -> Result<bool> {
        let mut guard = self.lock_state()?;
        if guard.stop_merges || !self.is_open() {
            return Ok(false);
        }
        let spec = {
            let state: &WriterState = &*guard;
            let policy = &self.inner.config.merge_policy;
            match max_num_segments {
                Some(max) => policy.find_forced_merges(
                    &state.segment_infos,
                    max,
                    &state.segments_to_merge,
                    state,
                )?,
                None => policy.find_merges(trigger, &state.segment_infos, state)?,
            }
        };
        let mut found = false;
        if let Some(spec) = spec {
            for mut merge in spec.merges {
                merge.max_num_segments = max_num_segments;
                if guard.register_merge(merge) {
                    found = true;
                }
            }
        }
        Ok(found)
    }

    /// The next registered merge to run, called by the merge scheduler.
    pub fn next_merge(&self) -> Result<Option<OneMerge>> {
        let mut state = self.lock_state()?;
        if state.stop_merges {
            return Ok(None);
        }
        Ok(state.pending_merges.pop_front())
    }

    pub fn has_pending_merges(&self) -> Result<bool> {
        Ok(!self.lock_state()?.pending_merges.is_empty())
    }

    fn drop_pending_merges(&self) -> Result<()> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        while let Some(merge) = state.pending_merges.pop_front() {
            debug!("IndexWriter: drop pending merge {}", merge);
            state.release_merge_segments(&merge);
        }
        Ok(())
    }

    /// Runs `merge`, called by the merge scheduler. The merge is committed
    /// into the writer's segments unless it was aborted, in which case its
    /// files are removed and `MergeAborted` is returned.
    pub fn merge(&self, merge: &mut OneMerge) -> Result<()> {
        let res = self
            .merge_init(merge)
            .and_then(|si| self.merge_middle(merge, si));
        let finished = self.merge_finish(merge);
        res?;
        finished
    }

    fn merge_init(&self, merge: &mut OneMerge) -> Result<SegmentInfo> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        state
            .running_merges
            .insert(merge.id, merge.abort_handle());
        merge.check_aborted()?;

        for info in &merge.segments {
            let rld = state.reader_pool.get_or_create(info);
            let reader = Arc::clone(rld.reader()?);
            merge.live_docs.push(rld.live_docs().cloned());
            merge.readers.push(reader);
        }

        let name = state.new_segment_name();
        let mut diagnostics = HashMap::new();
        diagnostics.insert("source".to_string(), "merge".to_string());
        diagnostics.insert(
            "merge_max_num_segments".to_string(),
            merge
                .max_num_segments
                .map_or_else(|| "-1".to_string(), |n| n.to_string()),
        );
        debug!("IndexWriter: merge seg={} {}", name, merge);
        Ok(SegmentInfo::new(
            &name,
            -1,
            Arc::clone(&self.inner.directory),
            false,
            diagnostics,
            random_id(),
            HashMap::new(),
        ))
    }

    fn merge_middle(&self, merge: &mut OneMerge, si: SegmentInfo) -> Result<()> {
        let tracking = Arc::new(TrackingDirectoryWrapper::new(Arc::clone(
            &self.inner.directory,
        )));
        let res = self.do_merge_middle(merge, si, &tracking);
        if res.is_err() {
            if let Ok(files) = tracking.create_files() {
                let state = self.lock_state()?;
                if let Err(e) = state.deleter.delete_new_files(&files) {
                    warn!("IndexWriter: delete files of failed merge: {:?}", e);
                }
            }
        }
        res
    }

    fn do_merge_middle(
        &self,
        merge: &mut OneMerge,
        si: SegmentInfo,
        tracking: &Arc<TrackingDirectoryWrapper>,
    ) -> Result<()> {
        let context = IOContext::Merge(merge.store_merge_info());
        let dir: DirectoryRc = Arc::clone(tracking) as DirectoryRc;
        let mut merger = SegmentMerger::new(
            merge,
            si,
            Arc::clone(&dir),
            Arc::clone(&self.inner.field_numbers),
            context,
            self.inner.config.payload_processor_provider.clone(),
        )?;
        merge.check_aborted()?;

        if !merger.should_merge() {
            // every document was deleted, the merged segment is dropped
            let si = merger.merge_state.segment_info.clone();
            merge.info = Some(Arc::new(SegmentCommitInfo::new(Arc::new(si), 0, -1)));
            merge.merge_state = Some(merger.merge_state);
            return self.commit_merge(merge);
        }

        merger.merge(merge)?;
        let mut si = merger.merge_state.segment_info.clone();
        si.set_files(&tracking.create_files()?)?;

        let use_compound_file = {
            let guard = self.lock_state()?;
            let state: &WriterState = &*guard;
            let probe = SegmentCommitInfo::new(Arc::new(si.clone()), 0, -1);
            self.inner
                .config
                .merge_policy
                .use_compound_file(&state.segment_infos, &probe, state)
        };
        if use_compound_file {
            merge.check_aborted()?;
            let originals = si.files().clone();
            let compound = write_compound_file(dir.as_ref(), &si, &context)?;
            for file in &originals {
                dir.delete_file(file)?;
            }
            si.set_files(&compound.into_iter().collect())?;
            si.set_use_compound_file();
        }
        write_segment_info(dir.as_ref(), &mut si, &context)?;

        merge.info = Some(Arc::new(SegmentCommitInfo::new(Arc::new(si), 0, -1)));
        merge.merge_state = Some(merger.merge_state);
        self.commit_merge(merge)
    }

    /// Replaces the merged segments with the new one, carrying over the
    /// deletions that happened while the merge ran.
    fn commit_merge(&self, merge: &mut OneMerge) -> Result<()> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        merge.check_aborted()?;

        let info = match &merge.info {
            Some(info) => Arc::clone(info),
            None => bail!(IllegalState(format!("merge {} has no merged segment", merge))),
        };
        for seg in &merge.segments {
            if !state
                .segment_infos
                .segments
                .iter()
                .any(|s| s.name() == seg.name())
            {
                // delete_all or rollback removed it meanwhile
                merge.abort();
                bail!(ErrorKind::Index(MergeAborted(format!(
                    "segment {} is no longer in the index",
                    seg.name()
                ))));
            }
        }

        let carried = match &merge.merge_state {
            Some(merge_state) => state.deletes_during_merge(merge, merge_state),
            None => Vec::new(),
        };
        let max_doc = info.info.max_doc();
        let drop_segment = max_doc == 0 || carried.len() as i32 == max_doc;

        if !drop_segment && !carried.is_empty() {
            let rld = state.reader_pool.get_or_create(&info);
            for doc in &carried {
                rld.delete(*doc)?;
            }
            debug!(
                "IndexWriter: carried {} deletes into merged segment {}",
                carried.len(),
                info
            );
        }

        state.segment_infos.apply_merge_changes(merge, drop_segment);
        for seg in &merge.segments {
            state.reader_pool.drop(seg.name());
        }
        if drop_segment {
            debug!("IndexWriter: merged segment {} is 100% deleted, drop it", info);
            state.reader_pool.drop(info.name());
            state.deleter.delete_new_files(&info.files())?;
        } else if merge.max_num_segments.is_some() {
            state
                .segments_to_merge
                .entry(info.name().to_string())
                .or_insert(false);
        }
        state.changed();
        state.checkpoint()?;
        debug!(
            "IndexWriter: commit merge {}, {} segments now",
            merge,
            state.segment_infos.len()
        );
        Ok(())
    }

    fn merge_finish(&self, merge: &mut OneMerge) -> Result<()> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        state.running_merges.remove(&merge.id);
        state.release_merge_segments(merge);
        merge.readers.clear();
        merge.live_docs.clear();
        Ok(())
    }
}

impl fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IndexWriter({})", self.inner.directory)
    }
}

impl WriterState {
    fn new_segment_name(&mut self) -> String {
        let name = format!("_{}", to_base36(self.segment_infos.counter as u64));
        self.segment_infos.counter += 1;
        name
    }

    fn changed(&mut self) {
        self.change_count += 1;
        self.segment_infos.changed();
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.deleter.checkpoint(&self.segment_infos, false)
    }

    /// Applies delete terms to every flushed segment and drops segments
    /// left without live documents. Returns true if anything was deleted.
    fn apply_deletes(&mut self, terms: &[Term]) -> Result<bool> {
        let mut deleted = 0;
        let segments = self.segment_infos.segments.clone();
        for info in &segments {
            let rld = self.reader_pool.get_or_create(info);
            for term in terms {
                deleted += rld.delete_term(term)?;
            }
            self.reader_pool.release(info.name());
        }
        if deleted == 0 {
            return Ok(false);
        }

        for info in &segments {
            if self.reader_pool.num_docs(info) == 0 && !self.merging_segments.contains(info.name())
            {
                debug!("IndexWriter: drop 100% deleted segment {}", info);
                self.segment_infos.remove(info);
                self.reader_pool.drop(info.name());
            }
        }
        debug!(
            "IndexWriter: applied {} delete terms, {} docs deleted",
            terms.len(),
            deleted
        );
        Ok(true)
    }

    /// Doc ids, in the merged segment, of documents deleted after `merge`
    /// took its live docs snapshot.
    fn deletes_during_merge(
        &self,
        merge: &OneMerge,
        merge_state: &MergeState,
    ) -> Vec<i32> {
        let mut carried = Vec::new();
        for (i, seg) in merge.segments.iter().enumerate() {
            let current = match self.reader_pool.live_docs(seg.name()) {
                Some(live) => live,
                None => continue,
            };
            let before = &merge.live_docs[i];
            if let Some(before) = before {
                if Arc::ptr_eq(before, &current) {
                    continue;
                }
            }
            let doc_map = &merge_state.doc_maps[i];
            for doc in 0..merge_state.max_docs[i] {
                let was_live = before.as_ref().map_or(true, |b| b.get_bit(doc as usize));
                if was_live && !current.get_bit(doc as usize) {
                    carried.push(doc_map.get(doc));
                }
            }
        }
        carried
    }

    /// Returns false if the merge overlaps a merge already registered or
    /// refers to segments no longer in the index.
    fn register_merge(&mut self, mut merge: OneMerge) -> bool {
        if self.stop_merges {
            merge.abort();
            return false;
        }
        for info in &merge.segments {
            if self.merging_segments.contains(info.name()) {
                return false;
            }
            if !self.segment_infos.segments.iter().any(|s| s.name() == info.name()) {
                return false;
            }
        }
        let mut total_bytes = 0u64;
        for info in &merge.segments {
            self.merging_segments.insert(info.name().to_string());
            self.reader_pool.get_or_create(info).is_merging = true;
            total_bytes += info.size_in_bytes().max(0) as u64;
        }
        merge.total_merge_bytes = total_bytes;
        debug!("IndexWriter: registered merge {}", merge);
        self.pending_merges.push_back(merge);
        true
    }

    fn release_merge_segments(&mut self, merge: &OneMerge) {
        for info in &merge.segments {
            self.merging_segments.remove(info.name());
            if let Some(rld) = self.reader_pool.get(info.name()) {
                rld.is_merging = false;
            }
            self.reader_pool.release(info.name());
        }
    }

    /// Aborts running merges and forgets pending ones.
    fn abort_merges(&mut self) {
        while let Some(merge) = self.pending_merges.pop_front() {
            debug!("IndexWriter: abort pending merge {}", merge);
            merge.abort();
            self.release_merge_segments(&merge);
        }
        for handle in self.running_merges.values() {
            handle.abort();
        }
    }
}

impl MergeContext for WriterState {
    fn num_deleted_docs(&self, info: &SegmentCommitInfo) -> i32 {
        info.info.max_doc() - self.reader_pool.num_docs(info)
    }

    fn merging_segments(&self) -> &HashSet<String> {
        &self.merging_segments
    }

    fn next_merge_id(&self) -> u32 {
        self.merge_id_gen.fetch_add(1, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::merge::{
        LogDocMergePolicy, MergeScheduler, PayloadProcessor, PayloadProcessorProvider,
        ReaderPayloadProcessor, SerialMergeScheduler,
    };
    use crate::core::index::reader::LeafReader;
    use crate::core::index::tests::*;
    use crate::core::index;
    use crate::core::analysis::WhitespaceAnalyzer;
    use crate::core::codec::segment_infos::INDEX_FILE_SEGMENTS;
    use crate::core::doc::{Field, FieldType};
    use crate::error::{Error, ErrorKind};

    use std::sync::atomic::AtomicUsize;

    fn segments_files(dir: &DirectoryRc) -> Vec<String> {
        let mut files: Vec<String> = dir
            .list_all()
            .unwrap()
            .into_iter()
            .filter(|f| f.starts_with(INDEX_FILE_SEGMENTS))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_commit_generations() {
        let dir = new_directory();
        let writer = IndexWriter::new(Arc::clone(&dir), manual_config()).unwrap();
        writer.commit().unwrap();
        assert_eq!(segments_files(&dir), vec!["segments_1"]);

        // nothing changed, nothing written
        writer.commit().unwrap();
        assert_eq!(segments_files(&dir), vec!["segments_1"]);

        writer.add_document(text_doc("0", "a b")).unwrap();
        writer.commit().unwrap();
        assert_eq!(segments_files(&dir), vec!["segments_2"]);
        let infos = SegmentInfos::read_latest_commit(&dir).unwrap();
        assert_eq!(infos.generation, 2);
        assert_eq!(infos.total_max_doc(), 1);
        writer.close().unwrap();
        assert!(!writer.is_open());
        assert!(writer.add_document(text_doc("1", "c")).is_err());
    }

    #[test]
    fn test_write_lock_is_exclusive() {
        let dir = new_directory();
        let writer = IndexWriter::new(Arc::clone(&dir), manual_config()).unwrap();
        let mut config = manual_config();
        config.write_lock_timeout = 0;
        match IndexWriter::new(Arc::clone(&dir), config) {
            Err(Error(ErrorKind::LockObtainFailed(_), _)) => {}
            r => panic!("expected LockObtainFailed, got ok={}", r.is_ok()),
        }
        writer.close().unwrap();
        IndexWriter::new(Arc::clone(&dir), manual_config())
            .unwrap()
            .close()
            .unwrap();
    }

    #[test]
    fn test_open_modes() {
        let dir = new_directory();
        let mut config = manual_config();
        config.open_mode = OpenMode::Append;
        match IndexWriter::new(Arc::clone(&dir), config) {
            Err(Error(ErrorKind::IndexNotFound(_), _)) => {}
            r => panic!("expected IndexNotFound, got ok={}", r.is_ok()),
        }

        build_index(&dir, &["a", "b"], 1).close().unwrap();
        let mut config = manual_config();
        config.open_mode = OpenMode::Append;
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        assert_eq!(writer.num_docs().unwrap(), 2);
        writer.close().unwrap();

        let mut config = manual_config();
        config.open_mode = OpenMode::Create;
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        assert_eq!(writer.num_docs().unwrap(), 0);
        writer.close().unwrap();
        let infos = SegmentInfos::read_latest_commit(&dir).unwrap();
        assert!(infos.is_empty());
        assert_eq!(infos.generation, 2);
    }

    #[test]
    fn test_flush_by_doc_count_and_update() {
        let dir = new_directory();
        let mut config = manual_config();
        config.max_buffered_docs = Some(2);
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for i in 0..5 {
            writer.add_document(text_doc(&i.to_string(), "x")).unwrap();
        }
        assert_eq!(writer.segment_count().unwrap(), 2);
        assert_eq!(writer.max_doc().unwrap(), 5);

        writer
            .update_document(Term::from_str("id", "1"), text_doc("1", "y"))
            .unwrap();
        writer.commit().unwrap();
        assert_eq!(writer.num_docs().unwrap(), 5);
        assert_eq!(writer.max_doc().unwrap(), 6);

        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.num_docs(), 5);
        assert_eq!(reader.doc_freq(&Term::from_str("body", "y")).unwrap(), 1);
        writer.close().unwrap();
    }

    #[test]
    fn test_fully_deleted_segment_is_dropped() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b", "c"], 1);
        assert_eq!(writer.segment_count().unwrap(), 3);
        writer
            .delete_documents(&[Term::from_str("id", "1")])
            .unwrap();
        writer.commit().unwrap();
        assert_eq!(writer.segment_count().unwrap(), 2);
        assert_eq!(writer.num_docs().unwrap(), 2);
        writer.close().unwrap();
    }

    #[test]
    fn test_rollback_restores_last_commit() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b"], 1);
        writer.add_document(text_doc("2", "c")).unwrap();
        writer.flush().unwrap();
        writer.delete_documents(&[Term::from_str("id", "0")]).unwrap();
        writer.prepare_commit().unwrap();
        assert!(dir.file_exists("pending_segments_2").unwrap());
        writer.rollback().unwrap();
        assert!(!dir.file_exists("pending_segments_2").unwrap());

        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.num_docs(), 2);
        assert_eq!(segments_files(&dir), vec!["segments_1"]);
        // the flushed but uncommitted segment is gone
        assert!(!dir.file_exists("_2.si").unwrap());

        // the lock was released
        IndexWriter::new(Arc::clone(&dir), manual_config())
            .unwrap()
            .close()
            .unwrap();
    }

    #[test]
    fn test_close_without_commit() {
        let dir = new_directory();
        build_index(&dir, &["a"], 1).close().unwrap();
        let mut config = manual_config();
        config.commit_on_close = false;
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        writer.add_document(text_doc("1", "b")).unwrap();
        assert!(writer.has_uncommitted_changes().unwrap());
        writer.close().unwrap();
        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.num_docs(), 1);
    }

    #[test]
    fn test_commit_data() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a"], 1);
        let mut data = HashMap::new();
        data.insert("checkpoint".to_string(), "42".to_string());
        writer.set_commit_data(data.clone()).unwrap();
        writer.commit().unwrap();
        assert_eq!(writer.commit_data().unwrap(), data);
        writer.close().unwrap();
        let infos = SegmentInfos::read_latest_commit(&dir).unwrap();
        assert_eq!(infos.user_data, data);
    }

    #[test]
    fn test_delete_all() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b"], 1);
        writer.add_document(text_doc("2", "c")).unwrap();
        writer.delete_all().unwrap();
        assert_eq!(writer.max_doc().unwrap(), 0);
        writer.add_document(text_doc("3", "d")).unwrap();
        writer.commit().unwrap();
        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.num_docs(), 1);
        assert_eq!(reader.document(0, &[]).unwrap().get("id"), Some("3"));
        writer.close().unwrap();
    }

    #[test]
    fn test_force_merge_compacts_deletes() {
        let dir = new_directory();
        let mut config = manual_config();
        config.merge_scheduler = Arc::new(SerialMergeScheduler {});
        config.use_compound_file = false;
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for i in 0..6 {
            writer
                .add_document(text_doc(&i.to_string(), &format!("common t{}", i)))
                .unwrap();
            writer.flush().unwrap();
        }
        writer.delete_documents(&[Term::from_str("id", "2")]).unwrap();
        writer.force_merge(1).unwrap();
        assert_eq!(writer.segment_count().unwrap(), 1);
        writer.commit().unwrap();

        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.leaves().len(), 1);
        assert_eq!(reader.max_doc(), 5);
        assert!(!reader.has_deletions());
        assert_eq!(reader.doc_freq(&Term::from_str("body", "common")).unwrap(), 5);
        let mut ids: Vec<String> = (0..5)
            .map(|d| reader.document(d, &[]).unwrap().get("id").unwrap().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["0", "1", "3", "4", "5"]);
        // only the merged segment's files remain
        let names: HashSet<String> = dir
            .list_all()
            .unwrap()
            .iter()
            .filter(|f| f.starts_with('_'))
            .map(|f| f.split('.').next().unwrap().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        writer.close().unwrap();
    }

    #[test]
    fn test_log_doc_policy_merges_on_flush() {
        let dir = new_directory();
        let mut config = manual_config();
        let mut policy = LogDocMergePolicy::default();
        policy.set_merge_factor(3).unwrap();
        config.merge_policy = Arc::new(policy);
        config.merge_scheduler = Arc::new(SerialMergeScheduler {});
        config.max_buffered_docs = Some(1);
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for i in 0..3 {
            writer.add_document(text_doc(&i.to_string(), "x")).unwrap();
        }
        assert_eq!(writer.segment_count().unwrap(), 1);
        assert_eq!(writer.num_docs().unwrap(), 3);
        writer.close().unwrap();
    }

    /// Aborts the merge it runs once the payload processor of the first
    /// segment is requested.
    struct AbortingScheduler {
        aborted: Arc<AtomicUsize>,
    }

    impl MergeScheduler for AbortingScheduler {
        fn merge(
            &self,
            writer: &IndexWriter,
            _trigger: MergerTrigger,
            _new_merges_found: bool,
        ) -> Result<()> {
            while let Some(mut merge) = writer.next_merge()? {
                merge.abort();
                match writer.merge(&mut merge) {
                    Err(Error(ErrorKind::Index(index::ErrorKind::MergeAborted(_)), _)) => {
                        self.aborted.fetch_add(1, Ordering::AcqRel);
                    }
                    r => panic!("expected MergeAborted, got ok={}", r.is_ok()),
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_aborted_merge_keeps_commit_intact() {
        let dir = new_directory();
        let aborted = Arc::new(AtomicUsize::new(0));
        let mut config = manual_config();
        config.merge_scheduler = Arc::new(AbortingScheduler {
            aborted: Arc::clone(&aborted),
        });
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for i in 0..4 {
            writer.add_document(text_doc(&i.to_string(), "x")).unwrap();
            writer.flush().unwrap();
        }
        writer.commit().unwrap();
        let before: HashSet<String> = dir.list_all().unwrap().into_iter().collect();

        writer.force_merge(1).unwrap();
        assert!(aborted.load(Ordering::Acquire) >= 1);
        assert_eq!(writer.segment_count().unwrap(), 4);
        let after: HashSet<String> = dir.list_all().unwrap().into_iter().collect();
        assert_eq!(before, after);

        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.num_docs(), 4);
        assert_eq!(reader.leaves().len(), 4);
        writer.close().unwrap();
    }

    struct AbortInsideMerge;

    struct AbortOnFirstPayload;

    impl PayloadProcessorProvider for AbortInsideMerge {
        fn reader_processor(
            &self,
            _segment: &str,
        ) -> Result<Option<Box<dyn ReaderPayloadProcessor>>> {
            Ok(Some(Box::new(AbortOnFirstPayload)))
        }
    }

    impl ReaderPayloadProcessor for AbortOnFirstPayload {
        fn processor(
            &mut self,
            _field: &str,
            _term: &[u8],
        ) -> Result<Option<Box<dyn PayloadProcessor>>> {
            bail!(crate::error::ErrorKind::Index(
                index::ErrorKind::MergeAborted("stop".into())
            ))
        }
    }

    #[test]
    fn test_failed_merge_deletes_partial_files() {
        let dir = new_directory();
        let mut config = manual_config();
        config.analyzer = Arc::new(WhitespaceAnalyzer::with_payloads(false, b'|'));
        config.merge_scheduler = Arc::new(SerialMergeScheduler {});
        config.payload_processor_provider = Some(Arc::new(AbortInsideMerge));
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for i in 0..3 {
            let mut doc = text_doc(&i.to_string(), "x y");
            doc.add(Field::new("p", FieldType::text_with_payloads(), "tok|ab"));
            writer.add_document(doc).unwrap();
            writer.flush().unwrap();
        }
        writer.commit().unwrap();
        let before: HashSet<String> = dir.list_all().unwrap().into_iter().collect();

        // the scheduler absorbs the abort
        writer.force_merge(1).unwrap();
        let after: HashSet<String> = dir.list_all().unwrap().into_iter().collect();
        assert_eq!(before, after);
        assert_eq!(writer.segment_count().unwrap(), 3);
        writer.close().unwrap();
    }

    /// Runs every pending merge, publishing its abort handle while it runs.
    struct PublishingScheduler {
        running: Arc<Mutex<Option<MergeAbortHandle>>>,
        aborted: Arc<AtomicUsize>,
    }

    impl MergeScheduler for PublishingScheduler {
        fn merge(
            &self,
            writer: &IndexWriter,
            _trigger: MergerTrigger,
            _new_merges_found: bool,
        ) -> Result<()> {
            while let Some(mut merge) = writer.next_merge()? {
                *self.running.lock()? = Some(merge.abort_handle());
                let res = writer.merge(&mut merge);
                *self.running.lock()? = None;
                match res {
                    Err(Error(ErrorKind::Index(index::ErrorKind::MergeAborted(_)), _)) => {
                        self.aborted.fetch_add(1, Ordering::AcqRel);
                    }
                    r => r?,
                }
            }
            Ok(())
        }
    }

    /// Aborts the running merge from inside it, then lets merging go on and
    /// counts the terms it is asked about.
    struct AbortFromMergeThread {
        running: Arc<Mutex<Option<MergeAbortHandle>>>,
        terms_seen: Arc<AtomicUsize>,
    }

    struct CountingReaderProcessor {
        terms_seen: Arc<AtomicUsize>,
    }

    impl PayloadProcessorProvider for AbortFromMergeThread {
        fn reader_processor(
            &self,
            _segment: &str,
        ) -> Result<Option<Box<dyn ReaderPayloadProcessor>>> {
            if let Some(handle) = self.running.lock()?.as_ref() {
                handle.abort();
            }
            Ok(Some(Box::new(CountingReaderProcessor {
                terms_seen: Arc::clone(&self.terms_seen),
            })))
        }
    }

    impl ReaderPayloadProcessor for CountingReaderProcessor {
        fn processor(
            &mut self,
            _field: &str,
            _term: &[u8],
        ) -> Result<Option<Box<dyn PayloadProcessor>>> {
            self.terms_seen.fetch_add(1, Ordering::AcqRel);
            Ok(None)
        }
    }

    #[test]
    fn test_merge_aborted_while_running_stops_at_abort_check() {
        let dir = new_directory();
        let running = Arc::new(Mutex::new(None));
        let aborted = Arc::new(AtomicUsize::new(0));
        let terms_seen = Arc::new(AtomicUsize::new(0));
        let mut config = manual_config();
        config.analyzer = Arc::new(WhitespaceAnalyzer::with_payloads(false, b'|'));
        config.merge_scheduler = Arc::new(PublishingScheduler {
            running: Arc::clone(&running),
            aborted: Arc::clone(&aborted),
        });
        config.payload_processor_provider = Some(Arc::new(AbortFromMergeThread {
            running: Arc::clone(&running),
            terms_seen: Arc::clone(&terms_seen),
        }));
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();

        // one heavy term per segment, so its postings alone exceed the
        // work between two abort checks
        let body = vec!["x"; 4000].join(" ");
        for i in 0..3 {
            let mut doc = text_doc(&i.to_string(), &body);
            doc.add(Field::new("p", FieldType::text_with_payloads(), "tok|ab"));
            writer.add_document(doc).unwrap();
            writer.flush().unwrap();
        }
        writer.commit().unwrap();
        let before: HashSet<String> = dir.list_all().unwrap().into_iter().collect();

        writer.force_merge(1).unwrap();
        assert_eq!(aborted.load(Ordering::Acquire), 1);
        // only the first term of the first field was copied before the abort
        // check fired, "id" and "p" terms were never reached
        assert_eq!(terms_seen.load(Ordering::Acquire), 3);
        assert_eq!(writer.segment_count().unwrap(), 3);
        let after: HashSet<String> = dir.list_all().unwrap().into_iter().collect();
        assert_eq!(before, after);

        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.num_docs(), 3);
        assert_eq!(reader.doc_freq(&Term::from_str("body", "x")).unwrap(), 3);
        reader.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_nrt_reader_protects_files() {
        let dir = new_directory();
        let mut config = manual_config();
        config.merge_scheduler = Arc::new(SerialMergeScheduler {});
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for i in 0..3 {
            writer.add_document(text_doc(&i.to_string(), "x")).unwrap();
            writer.flush().unwrap();
        }
        let nrt = writer.get_reader(true).unwrap();
        writer.force_merge(1).unwrap();
        // the merged away segments stay readable through the reader
        assert!(dir.file_exists("_0.si").unwrap());
        assert_eq!(nrt.leaves().len(), 3);
        assert_eq!(nrt.leaves()[1].reader.doc_freq(&Term::from_str("id", "1")).unwrap(), 1);
        nrt.close().unwrap();
        assert!(!dir.file_exists("_0.si").unwrap());
        writer.close().unwrap();
    }

    #[test]
    fn test_payload_processor_rewrites_merged_payloads() {
        struct Upper;
        impl PayloadProcessor for Upper {
            fn process(&mut self, payload: &mut Vec<u8>) -> Result<()> {
                payload.make_ascii_uppercase();
                Ok(())
            }
        }
        struct UpperReader;
        impl ReaderPayloadProcessor for UpperReader {
            fn processor(
                &mut self,
                _field: &str,
                _term: &[u8],
            ) -> Result<Option<Box<dyn PayloadProcessor>>> {
                Ok(Some(Box::new(Upper)))
            }
        }
        struct Provider;
        impl PayloadProcessorProvider for Provider {
            fn reader_processor(
                &self,
                _segment: &str,
            ) -> Result<Option<Box<dyn ReaderPayloadProcessor>>> {
                Ok(Some(Box::new(UpperReader)))
            }
        }

        use crate::core::search::posting_iterator::PostingIteratorFlags;
        use crate::core::search::DocIterator;

        let dir = new_directory();
        let mut config = manual_config();
        config.analyzer = Arc::new(WhitespaceAnalyzer::with_payloads(false, b'|'));
        config.merge_scheduler = Arc::new(SerialMergeScheduler {});
        config.payload_processor_provider = Some(Arc::new(Provider));
        let writer = IndexWriter::new(Arc::clone(&dir), config).unwrap();
        for payload in &["ab", "cd"] {
            let mut doc = Document::new();
            doc.add(Field::new(
                "p",
                FieldType::text_with_payloads(),
                format!("tok|{}", payload),
            ));
            writer.add_document(doc).unwrap();
            writer.flush().unwrap();
        }
        writer.force_merge(1).unwrap();
        writer.commit().unwrap();

        let reader = StandardDirectoryReader::open(Arc::clone(&dir)).unwrap();
        let leaf = &reader.leaves()[0].reader;
        assert!(leaf
            .field_infos()
            .field_info_by_name("p")
            .map_or(false, |fi| fi.has_store_payloads));
        let mut postings = leaf
            .postings(&Term::from_str("p", "tok"), PostingIteratorFlags::PAYLOADS)
            .unwrap()
            .unwrap();
        let mut payloads = Vec::new();
        while postings.next().unwrap() != crate::core::search::NO_MORE_DOCS {
            postings.next_position().unwrap();
            payloads.push(postings.payload().unwrap());
        }
        payloads.sort();
        assert_eq!(payloads, vec![b"AB".to_vec(), b"CD".to_vec()]);
        writer.close().unwrap();
    }
}
