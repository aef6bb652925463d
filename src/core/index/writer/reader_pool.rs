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

use crate::core::codec::live_docs::{new_live_docs, write_live_docs};
use crate::core::codec::segment_infos::SegmentCommitInfo;
use crate::core::index::reader::{LeafReader, SegmentReader};
use crate::core::index::Term;
use crate::core::search::posting_iterator::PostingIteratorFlags;
use crate::core::search::{DocIterator, NO_MORE_DOCS};
use crate::core::store::directory::{Directory, DirectoryRc, TrackingDirectoryWrapper};
use crate::core::store::IOContext;
use crate::core::util::{DocId, FixedBitSet};
use crate::error::ErrorKind::IllegalState;
use crate::error::Result;

use std::collections::HashMap;
use std::sync::Arc;

/// Tracks the open reader and the in-memory deletions of one segment the
/// writer knows about.
///
/// Live docs are copy on write: once handed to a near real time reader they
/// are cloned before the next deletion.
pub struct ReadersAndUpdates {
    pub info: Arc<SegmentCommitInfo>,
    reader: Option<Arc<SegmentReader>>,
    live_docs: Option<Arc<FixedBitSet>>,
    /// Deletions done against `live_docs` since they were loaded or last
    /// written.
    pending_delete_count: i32,
    pub is_merging: bool,
}

impl ReadersAndUpdates {
    pub fn new(info: Arc<SegmentCommitInfo>) -> ReadersAndUpdates {
        ReadersAndUpdates {
            info,
            reader: None,
            live_docs: None,
            pending_delete_count: 0,
            is_merging: false,
        }
    }

    pub fn pending_delete_count(&self) -> i32 {
        self.pending_delete_count
    }

    /// Live docs in the segment, counting the pending deletions.
    pub fn num_docs(&self) -> i32 {
        self.info.num_docs() - self.pending_delete_count
    }

    /// The reader at the segment's current deletion generation, opened on
    /// first use.
    pub fn reader(&mut self) -> Result<&Arc<SegmentReader>> {
        if self.reader.is_none() {
            let reader = SegmentReader::open(&self.info, &IOContext::READ)?;
            if self.live_docs.is_none() {
                self.live_docs = reader.live_docs_bits().cloned();
            }
            self.reader = Some(Arc::new(reader));
        }
        match &self.reader {
            Some(reader) => Ok(reader),
            None => bail!(IllegalState(format!(
                "no reader for segment {}",
                self.info.name()
            ))),
        }
    }

    /// Current live docs, `None` while the segment has no deletion at all.
    pub fn live_docs(&self) -> Option<&Arc<FixedBitSet>> {
        self.live_docs.as_ref()
    }

    /// Marks `doc` deleted, returns false if it already was.
    pub fn delete(&mut self, doc: DocId) -> Result<bool> {
        self.reader()?;
        let max_doc = self.info.info.max_doc() as usize;
        let live = self
            .live_docs
            .get_or_insert_with(|| Arc::new(new_live_docs(max_doc)));
        if doc < 0 || doc as usize >= max_doc {
            bail!(IllegalState(format!(
                "doc {} out of bounds for segment {}",
                doc,
                self.info.name()
            )));
        }
        if !live.get_bit(doc as usize) {
            return Ok(false);
        }
        Arc::make_mut(live).clear(doc as usize);
        self.pending_delete_count += 1;
        Ok(true)
    }

    /// Deletes every document containing `term`, returns how many were
    /// newly deleted.
    pub fn delete_term(&mut self, term: &Term) -> Result<i32> {
        let reader = Arc::clone(self.reader()?);
        let mut postings = match reader.postings(term, PostingIteratorFlags::NONE)? {
            Some(postings) => postings,
            None => return Ok(0),
        };
        let mut deleted = 0;
        loop {
            let doc = postings.next()?;
            if doc == NO_MORE_DOCS {
                break;
            }
            if self.delete(doc)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// A reader reflecting the pending deletions, sharing this segment's
    /// core.
    pub fn readonly_clone(&mut self) -> Result<Arc<SegmentReader>> {
        let reader = Arc::clone(self.reader()?);
        if self.pending_delete_count == 0 {
            return Ok(reader);
        }
        Ok(Arc::new(SegmentReader::with_live_docs(
            &self.info,
            Arc::clone(reader.core()),
            self.live_docs.clone(),
            self.num_docs(),
        )))
    }

    /// Writes pending deletions as a new live docs generation. Returns true
    /// if a file was written.
    pub fn write_live_docs(&mut self, directory: &DirectoryRc) -> Result<bool> {
        let live = match &self.live_docs {
            Some(live) if self.pending_delete_count > 0 => Arc::clone(live),
            _ => return Ok(false),
        };
        let tracking = TrackingDirectoryWrapper::new(Arc::clone(directory));
        let res = write_live_docs(
            &tracking,
            &self.info,
            &live,
            self.pending_delete_count,
            &IOContext::Default,
        );
        if let Err(e) = res {
            // the next attempt must not reuse the partially written name
            self.info.advance_next_write_del_gen();
            for file in tracking.create_files()? {
                if let Err(err) = tracking.delete_file(&file) {
                    warn!("delete file '{}' failed by '{:?}'", file, err);
                }
            }
            return Err(e);
        }
        self.info.advance_del_gen();
        self.info
            .set_del_count(self.info.del_count() + self.pending_delete_count)?;
        self.pending_delete_count = 0;
        if let Some(reader) = self.reader.take() {
            self.reader = Some(Arc::new(SegmentReader::with_live_docs(
                &self.info,
                Arc::clone(reader.core()),
                Some(live),
                self.info.num_docs(),
            )));
        }
        Ok(true)
    }

    /// Forgets deletions that were not written yet.
    pub fn drop_changes(&mut self) {
        if self.pending_delete_count > 0 {
            self.pending_delete_count = 0;
            self.live_docs = None;
            self.reader = None;
        }
    }
}

/// Holds a `ReadersAndUpdates` per segment of the writer, so deletions,
/// merges and near real time readers share open segment readers.
#[derive(Default)]
pub struct ReaderPool {
    readers: HashMap<String, ReadersAndUpdates>,
    pooling: bool,
}

impl ReaderPool {
    pub fn new(pooling: bool) -> ReaderPool {
        ReaderPool {
            readers: HashMap::new(),
            pooling,
        }
    }

    pub fn get(&mut self, name: &str) -> Option<&mut ReadersAndUpdates> {
        self.readers.get_mut(name)
    }

    pub fn get_or_create(&mut self, info: &Arc<SegmentCommitInfo>) -> &mut ReadersAndUpdates {
        self.readers
            .entry(info.name().to_string())
            .or_insert_with(|| ReadersAndUpdates::new(Arc::clone(info)))
    }

    /// Live doc count of `info`, counting deletions not yet written.
    pub fn num_docs(&self, info: &SegmentCommitInfo) -> i32 {
        match self.readers.get(info.name()) {
            Some(rld) => rld.num_docs(),
            None => info.num_docs(),
        }
    }

    /// Current live docs of a pooled segment, including pending deletions.
    pub fn live_docs(&self, name: &str) -> Option<Arc<FixedBitSet>> {
        self.readers.get(name).and_then(|rld| rld.live_docs().cloned())
    }

    /// Drops the readers of a segment without writing its pending deletions.
    pub fn drop(&mut self, name: &str) {
        self.readers.remove(name);
    }

    /// Releases the readers of `name` unless pooling is on or deletions are
    /// still pending.
    pub fn release(&mut self, name: &str) {
        if self.pooling {
            return;
        }
        let idle = self
            .readers
            .get(name)
            .map_or(false, |rld| rld.pending_delete_count == 0 && !rld.is_merging);
        if idle {
            self.readers.remove(name);
        }
    }

    pub fn any_pending_deletes(&self) -> bool {
        self.readers.values().any(|r| r.pending_delete_count > 0)
    }

    /// Writes the pending deletions of every pooled segment, returns true if
    /// any live docs file was written.
    pub fn commit(&mut self, directory: &DirectoryRc) -> Result<bool> {
        let mut written = false;
        let names: Vec<String> = self.readers.keys().cloned().collect();
        for name in names {
            if let Some(rld) = self.readers.get_mut(&name) {
                if rld.write_live_docs(directory)? {
                    written = true;
                }
            }
            self.release(&name);
        }
        Ok(written)
    }

    /// Drops every pooled reader, writing pending deletions first when
    /// `save` is set.
    pub fn drop_all(&mut self, directory: &DirectoryRc, save: bool) -> Result<()> {
        let mut res = Ok(());
        for rld in self.readers.values_mut() {
            if save {
                if let Err(e) = rld.write_live_docs(directory) {
                    if res.is_ok() {
                        res = Err(e);
                    }
                }
            } else {
                rld.drop_changes();
            }
        }
        self.readers.clear();
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::tests::*;
    use crate::core::util::Bits;

    #[test]
    fn test_deletes_are_copy_on_write() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b", "c"], 3);
        let infos = writer.segment_infos().unwrap();
        writer.close().unwrap();

        let info = Arc::new(infos.segments[0].as_ref().clone());
        let mut rld = ReadersAndUpdates::new(Arc::clone(&info));
        assert_eq!(rld.delete_term(&Term::from_str("id", "1")).unwrap(), 1);
        assert!(!rld.delete(1).unwrap());
        let snapshot = rld.readonly_clone().unwrap();
        assert_eq!(snapshot.num_docs(), 2);

        rld.delete(0).unwrap();
        // the snapshot keeps its own live docs
        assert_eq!(snapshot.num_docs(), 2);
        assert!(snapshot.live_docs().unwrap().get(0).unwrap());
        assert_eq!(rld.num_docs(), 1);

        assert!(rld.write_live_docs(&dir).unwrap());
        assert_eq!(info.del_count(), 2);
        assert_eq!(info.del_gen(), 1);
        assert_eq!(rld.pending_delete_count(), 0);
        assert!(!rld.write_live_docs(&dir).unwrap());
        let reopened = SegmentReader::open(&info, &IOContext::READ).unwrap();
        assert_eq!(reopened.num_docs(), 1);
    }

    #[test]
    fn test_release_keeps_pending_deletes() {
        let dir = new_directory();
        let writer = build_index(&dir, &["a", "b"], 2);
        let infos = writer.segment_infos().unwrap();
        writer.close().unwrap();

        let info = Arc::new(infos.segments[0].as_ref().clone());
        let mut pool = ReaderPool::new(false);
        pool.get_or_create(&info).delete(0).unwrap();
        pool.release(info.name());
        assert!(pool.any_pending_deletes());
        assert_eq!(pool.num_docs(&info), 1);

        pool.drop_all(&dir, false).unwrap();
        assert!(!pool.any_pending_deletes());
        assert_eq!(pool.num_docs(&info), 2);
    }
}
